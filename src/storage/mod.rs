// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Acquisition output files
//!
//! Every acquisition is identified by a Unix timestamp and produces:
//! - `<ts>_frame.csv`: the raw frame, one comma-separated row per line
//! - `<ts>_spectrum.csv`: the column-summed spectrum, one value per line
//! - `meta_<ts>.json`: camera and settings used for the acquisition
//!
//! Device parameter dumps are written as a `=== title ===` header followed by YAML.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::camera::frame::{Frame, Spectrum};
use crate::config::StorageConfig;

/// Current Unix time in seconds, used to name acquisition files
pub fn timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Binning factors as written in the metadata file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binning {
    pub h: usize,
    pub v: usize,
}

/// JSON sidecar written next to each acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionMetadata {
    pub camera_model: String,
    pub serial: String,
    pub exposure_s: f64,
    pub binning: Binning,
    /// `[x, y, width, height]`, `null` for the full detector
    pub roi: Option<[usize; 4]>,
    #[serde(rename = "cooling_setpoint_C")]
    pub cooling_setpoint_c: Option<f64>,
    /// `[rows, columns]`
    pub frame_shape: [usize; 2],
    pub timestamp: i64,
}

/// Writer for acquisition data and parameter dumps in one directory
#[derive(Debug, Clone)]
pub struct DataWriter {
    dir: PathBuf,
}

impl DataWriter {
    /// Use `dir` as output directory, creating it if needed
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;
        debug!("Writing acquisition data to {:?}", dir);
        Ok(Self { dir })
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        Self::new(&config.save_path)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write the frame and spectrum CSV files, returning their paths
    pub fn save_data(
        &self,
        frame: &Frame,
        spectrum: &Spectrum,
        timestamp: i64,
    ) -> Result<(PathBuf, PathBuf)> {
        let frame_path = self.dir.join(format!("{}_frame.csv", timestamp));
        let mut writer = create(&frame_path)?;
        for row in frame.rows() {
            let line = row
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");
            writeln!(writer, "{}", line)
                .with_context(|| format!("Failed to write frame to {:?}", frame_path))?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write frame to {:?}", frame_path))?;

        let spectrum_path = self.dir.join(format!("{}_spectrum.csv", timestamp));
        let mut writer = create(&spectrum_path)?;
        for value in spectrum {
            writeln!(writer, "{}", value)
                .with_context(|| format!("Failed to write spectrum to {:?}", spectrum_path))?;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to write spectrum to {:?}", spectrum_path))?;

        info!("Data saved to {:?} and {:?}", frame_path, spectrum_path);
        Ok((frame_path, spectrum_path))
    }

    /// Write `meta_<ts>.json`
    pub fn save_meta(&self, meta: &AcquisitionMetadata) -> Result<PathBuf> {
        let path = self.dir.join(format!("meta_{}.json", meta.timestamp));
        let json =
            serde_json::to_string_pretty(meta).context("Failed to serialize metadata")?;
        fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?;
        debug!("Metadata saved to {:?}", path);
        Ok(path)
    }

    /// Write a titled, human-readable parameter dump
    pub fn save_parameters<T: Serialize>(
        &self,
        file_name: &str,
        title: &str,
        parameters: &T,
    ) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let body =
            serde_yml::to_string(parameters).context("Failed to serialize parameters")?;
        fs::write(&path, format!("=== {} ===\n{}", title, body))
            .with_context(|| format!("Failed to write {:?}", path))?;
        info!("{} saved to {:?}", title, path);
        Ok(path)
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    Ok(BufWriter::new(file))
}
