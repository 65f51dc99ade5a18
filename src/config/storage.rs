// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Output file locations

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where frames, spectra, metadata and parameter dumps are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving every output file, created if missing
    pub save_path: PathBuf,

    /// Camera parameter dump, relative to `save_path`
    pub camera_params_file: String,

    /// Spectrometer parameter dump, relative to `save_path`
    pub spectrometer_params_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            save_path: PathBuf::from("./data"),
            camera_params_file: "cam_params.txt".to_string(),
            spectrometer_params_file: "spec_params.txt".to_string(),
        }
    }
}
