// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Camera configuration
//!
//! This module defines the camera section of the configuration: which driver
//! to open, where the vendor SDK lives, the default acquisition settings and the
//! parameters of the simulated camera.

use serde::{Deserialize, Serialize};

use crate::camera::settings::{ReadMode, Roi};

/// Camera driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraDriverKind {
    /// Deterministic simulated camera, no hardware needed
    #[default]
    Simulated,
    /// Andor camera through the SDK2 library (requires the `andor-sdk` feature)
    AndorSdk2,
}

/// Configuration of the camera and its acquisitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Driver used to open the camera
    pub driver: CameraDriverKind,

    /// Directory containing the Andor SDK2 library.
    ///
    /// Required when `driver` is `andor_sdk2`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_path: Option<String>,

    /// Exposure used while live mode runs, in seconds
    pub live_exposure_s: f64,

    /// Default acquisition settings
    pub acquisition: AcquisitionConfig,

    /// Simulated camera parameters
    pub simulation: SimulationConfig,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            driver: CameraDriverKind::Simulated,
            sdk_path: None,
            live_exposure_s: 0.03,
            acquisition: AcquisitionConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

/// Acquisition defaults applied when the camera connects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Exposure time in seconds
    pub exposure_s: f64,

    /// Horizontal binning factor
    pub hbin: usize,

    /// Vertical binning factor
    pub vbin: usize,

    pub read_mode: ReadMode,

    /// Region of interest in unbinned pixels, full detector when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi: Option<Roi>,

    /// Number of exposures summed by an `accumulate` acquisition
    pub accumulations: u32,

    /// Maximum wait for one frame, in seconds
    pub frame_timeout_s: f64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            exposure_s: 0.05,
            hbin: 1,
            vbin: 1,
            read_mode: ReadMode::Image,
            roi: None,
            accumulations: 10,
            frame_timeout_s: 5.0,
        }
    }
}

/// Behaviour of the simulated camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// When false, opening the simulated camera fails like an unplugged device
    pub present: bool,

    /// Temperature the sensor starts at and warms back to, in °C
    pub ambient_temperature_c: f64,

    /// Cooling speed with the cooler on, in °C per second
    pub cooling_rate_c_per_s: f64,

    /// Warming speed with the cooler off, in °C per second
    pub warming_rate_c_per_s: f64,

    /// Detector width in pixels
    pub width: usize,

    /// Detector height in pixels
    pub height: usize,

    /// Uniform noise amplitude, as a fraction of full signal
    pub noise: f64,

    /// Counts per second produced by a fully lit pixel
    pub signal_counts_per_s: f64,

    /// Constant offset added to every pixel
    pub dark_counts: u32,

    /// Noise generator seed, random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    pub head_model: String,

    pub serial_number: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            present: true,
            ambient_temperature_c: 20.0,
            cooling_rate_c_per_s: 20.0,
            warming_rate_c_per_s: 5.0,
            width: 256,
            height: 128,
            noise: 0.05,
            signal_counts_per_s: 100_000.0,
            dark_counts: 100,
            seed: None,
            head_model: "Simulated Newton".to_string(),
            serial_number: "SIM-0001".to_string(),
        }
    }
}
