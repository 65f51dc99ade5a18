// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Spectrometer configuration

use serde::{Deserialize, Serialize};

/// Spectrograph driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpectrographDriverKind {
    #[default]
    Simulated,
    /// Andor Shamrock through the ShamrockCIF library (requires the `andor-sdk` feature)
    Shamrock,
}

/// Configuration of the Shamrock spectrograph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrometerConfig {
    /// Connect the spectrometer together with the camera
    pub enabled: bool,

    pub driver: SpectrographDriverKind,

    /// Directory containing the Shamrock library
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_path: Option<String>,

    /// Device index when several spectrographs are attached
    pub device_index: u32,

    pub simulation: SpectrographSimulationConfig,
}

impl Default for SpectrometerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            driver: SpectrographDriverKind::Simulated,
            sdk_path: None,
            device_index: 0,
            simulation: SpectrographSimulationConfig::default(),
        }
    }
}

/// Behaviour of the simulated spectrograph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrographSimulationConfig {
    /// When false, no spectrograph is found
    pub present: bool,

    /// Number of gratings on the turret
    pub grating_count: u32,

    /// Lowest reachable center wavelength, in meters
    pub wavelength_min_m: f64,

    /// Highest reachable center wavelength, in meters
    pub wavelength_max_m: f64,

    /// Widest slit opening, in meters
    pub max_slit_width_m: f64,

    pub serial_number: String,
}

impl Default for SpectrographSimulationConfig {
    fn default() -> Self {
        Self {
            present: true,
            grating_count: 3,
            wavelength_min_m: 200e-9,
            wavelength_max_m: 1200e-9,
            max_slit_width_m: 2.5e-3,
            serial_number: "SR-SIM-0001".to_string(),
        }
    }
}
