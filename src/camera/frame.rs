// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Frame helpers: spectrum extraction and 8-bit preview

use ndarray::{Array1, Array2, Axis};

/// Raw camera frame, indexed `[row, column]`
pub type Frame = Array2<u32>;

/// One value per detector column
pub type Spectrum = Array1<u64>;

/// Collapse a 2D frame into a spectrum by summing each column over all rows
pub fn spectrum(frame: &Frame) -> Spectrum {
    frame.mapv(u64::from).sum_axis(Axis(0))
}

/// 8-bit grayscale rendering of a frame, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub pixels: Vec<u8>,
    pub width: usize,
    pub height: usize,
}

/// Scale a frame so its brightest pixel maps to 255
pub fn to_preview(frame: &Frame) -> Preview {
    let (height, width) = frame.dim();
    let max = frame.iter().copied().max().unwrap_or(0);
    let pixels = if max == 0 {
        vec![0; width * height]
    } else {
        frame
            .iter()
            .map(|&v| ((u64::from(v) * 255) / u64::from(max)) as u8)
            .collect()
    };
    Preview {
        pixels,
        width,
        height,
    }
}

/// Minimum, maximum and mean pixel value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub min: u32,
    pub max: u32,
    pub mean: f64,
}

pub fn frame_stats(frame: &Frame) -> FrameStats {
    let min = frame.iter().copied().min().unwrap_or(0);
    let max = frame.iter().copied().max().unwrap_or(0);
    let mean = if frame.is_empty() {
        0.0
    } else {
        frame.iter().map(|&v| f64::from(v)).sum::<f64>() / frame.len() as f64
    };
    FrameStats { min, max, mean }
}
