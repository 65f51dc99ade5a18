// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the Raman control application
//!
//! This module loads, validates and applies the configuration of the
//! instrument. The configuration is backed by a YAML file and validated against
//! an embedded JSON schema before it is deserialized.
//!
//! ## Configuration Structure
//!
//! - `camera`: driver selection, SDK location, acquisition defaults, simulation
//! - `thermal`: cooling setpoints and the polling policy of the cool/warm loops
//! - `storage`: output directory and parameter dump file names
//! - `spectrometer`: Shamrock spectrograph driver and simulation
//!
//! ## Usage
//!
//! ```no_run
//! use raman_control::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Run against the simulated camera, cool to -60 °C
//! config.apply_args(true, None, None, Some(-60.0), None, None, None);
//!
//! println!("Saving to {}", config.storage.save_path.display());
//! ```

pub mod camera;
pub mod spectrometer;
pub mod storage;
pub mod thermal;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::camera::settings::Roi;

pub use camera::{AcquisitionConfig, CameraConfig, CameraDriverKind, SimulationConfig};
pub use spectrometer::{
    SpectrographDriverKind, SpectrographSimulationConfig, SpectrometerConfig,
};
pub use storage::StorageConfig;
pub use thermal::ThermalConfig;
pub use utils::output_config_schema;

/// Embedded JSON schema the YAML configuration is validated against
pub(crate) const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

/// Root configuration structure.
///
/// Every section falls back to its defaults when absent, so an empty file is a
/// valid configuration driving the simulated camera.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Camera driver and acquisition settings.
    #[serde(default)]
    pub camera: CameraConfig,

    /// Sensor cooling lifecycle.
    ///
    /// Target and safe temperatures plus the poll interval, timeout and
    /// failure tolerance of the cool and warm loops.
    #[serde(default)]
    pub thermal: ThermalConfig,

    /// Output locations.
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub spectrometer: SpectrometerConfig,
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file, creating it with defaults if missing
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        // An empty document parses to null, which means "all defaults"
        let yaml_value: serde_yml::Value = serde_yml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML configuration from {:?}", path))?;
        if yaml_value.is_null() {
            debug!("Configuration file {:?} is empty, using defaults", path);
            return Ok(Self::default());
        }

        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {:?}", path)
        })?;

        let schema: serde_json::Value =
            serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", path.display());
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            Self::create_sample_config(path)?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        let config: Config = match serde_yml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = Self::create_sample_config(path) {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    path.display(),
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            Self::create_sample_config(path)?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only the values that are provided override the file.
    ///
    /// # Parameters
    ///
    /// * `simulate` - Force the simulated camera and spectrograph
    /// * `sdk_path` - Directory of the Andor libraries
    /// * `save_path` - Output directory
    /// * `target_temperature` - Cooling setpoint in °C
    /// * `safe_temperature` - Warm-up temperature in °C
    /// * `exposure` - Acquisition exposure in seconds
    /// * `roi` - Region of interest
    #[allow(clippy::too_many_arguments)]
    pub fn apply_args(
        &mut self,
        simulate: bool,
        sdk_path: Option<String>,
        save_path: Option<PathBuf>,
        target_temperature: Option<f64>,
        safe_temperature: Option<f64>,
        exposure: Option<f64>,
        roi: Option<Roi>,
    ) {
        if simulate {
            debug!("Forcing simulated devices from command line");
            self.camera.driver = CameraDriverKind::Simulated;
            self.spectrometer.driver = SpectrographDriverKind::Simulated;
        }
        if let Some(path) = sdk_path {
            debug!("Overriding SDK path from command line: {}", path);
            self.camera.sdk_path = Some(path.clone());
            self.spectrometer.sdk_path = Some(path);
        }
        if let Some(path) = save_path {
            debug!("Overriding save path from command line: {:?}", path);
            self.storage.save_path = path;
        }
        if let Some(target) = target_temperature {
            debug!("Overriding target temperature from command line: {}", target);
            self.thermal.target_temperature_c = target;
        }
        if let Some(safe) = safe_temperature {
            debug!("Overriding safe temperature from command line: {}", safe);
            self.thermal.safe_temperature_c = safe;
        }
        if let Some(exposure) = exposure {
            debug!("Overriding exposure from command line: {}", exposure);
            self.camera.acquisition.exposure_s = exposure;
        }
        if let Some(roi) = roi {
            debug!("Overriding ROI from command line: {}", roi);
            self.camera.acquisition.roi = Some(roi);
        }
    }
}
