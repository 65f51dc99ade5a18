// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::{debug, warn};

use super::{CameraDriverKind, Config, SpectrographDriverKind, CONFIG_SCHEMA};
use crate::camera::settings::AcquisitionSettings;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./raman_control --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;
    println!("{}", formatted_schema);
    Ok(())
}

/// Validates the configuration against rules the JSON schema cannot express.
///
/// # Validation Rules
///
/// - **Temperatures**: the safe temperature must be above the cooling target
/// - **Polling**: the poll interval must be non-zero
/// - **Acquisition**: exposure, binning and ROI must be consistent with the simulated
///   detector size when the simulated camera is selected
/// - **SDK path**: hardware drivers need the directory of the vendor library
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let thermal = &config.thermal;
    if thermal.safe_temperature_c <= thermal.target_temperature_c {
        anyhow::bail!(
            "Safe temperature {} °C must be above the target temperature {} °C",
            thermal.safe_temperature_c,
            thermal.target_temperature_c
        );
    }
    if thermal.poll_interval_ms == 0 {
        anyhow::bail!("Poll interval must be greater than zero");
    }
    if thermal.timeout_s.is_none() {
        warn!("No thermal timeout configured: cool and warm loops are unbounded");
    }

    let acquisition = &config.camera.acquisition;
    if acquisition.accumulations == 0 {
        anyhow::bail!("Accumulation count must be at least 1");
    }
    if !(acquisition.frame_timeout_s > 0.0) {
        anyhow::bail!("Frame timeout must be positive");
    }
    if !(config.camera.live_exposure_s > 0.0) {
        anyhow::bail!("Live exposure must be positive");
    }

    let settings = AcquisitionSettings::from(acquisition);
    match config.camera.driver {
        CameraDriverKind::Simulated => {
            let simulation = &config.camera.simulation;
            settings
                .validate((simulation.width, simulation.height))
                .context("Invalid acquisition settings")?;
            if simulation.cooling_rate_c_per_s <= 0.0 || simulation.warming_rate_c_per_s <= 0.0 {
                anyhow::bail!("Simulated cooling and warming rates must be positive");
            }
        }
        CameraDriverKind::AndorSdk2 => {
            // the detector size is only known once the camera is open
            let detector = match settings.roi {
                Some(roi) => (
                    roi.x_end().context("Invalid acquisition settings")?,
                    roi.y_end().context("Invalid acquisition settings")?,
                ),
                None => (settings.hbin, settings.vbin),
            };
            settings
                .validate(detector)
                .context("Invalid acquisition settings")?;
            if config.camera.sdk_path.is_none() {
                anyhow::bail!("camera.sdk_path is required for the andor_sdk2 driver");
            }
        }
    }

    let spectrometer = &config.spectrometer;
    if spectrometer.enabled
        && spectrometer.driver == SpectrographDriverKind::Shamrock
        && spectrometer.sdk_path.is_none()
    {
        anyhow::bail!("spectrometer.sdk_path is required for the shamrock driver");
    }
    let simulation = &spectrometer.simulation;
    if simulation.wavelength_min_m >= simulation.wavelength_max_m {
        anyhow::bail!("Simulated spectrograph wavelength range is empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::settings::Roi;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_specific_rules(&Config::default()).is_ok());
    }

    #[test]
    fn test_safe_temperature_must_exceed_target() {
        let mut config = Config::default();
        config.thermal.safe_temperature_c = -90.0;
        assert!(validate_specific_rules(&config).is_err());
    }

    #[test]
    fn test_roi_outside_simulated_detector() {
        let mut config = Config::default();
        config.camera.acquisition.roi = Some(Roi {
            x: 200,
            y: 0,
            width: 100,
            height: 10,
        });
        assert!(validate_specific_rules(&config).is_err());
    }

    #[test]
    fn test_overflowing_roi_on_hardware_driver() {
        let mut config = Config::default();
        config.camera.driver = CameraDriverKind::AndorSdk2;
        config.camera.sdk_path = Some("/opt/andor/lib".into());
        config.camera.acquisition.roi = Some(Roi {
            x: usize::MAX,
            y: 0,
            width: 2,
            height: 1,
        });
        assert!(validate_specific_rules(&config).is_err());
    }

    #[test]
    fn test_hardware_driver_needs_sdk_path() {
        let mut config = Config::default();
        config.camera.driver = CameraDriverKind::AndorSdk2;
        assert!(validate_specific_rules(&config).is_err());

        config.camera.sdk_path = Some("/opt/andor/lib".into());
        assert!(validate_specific_rules(&config).is_ok());
    }

    #[test]
    fn test_embedded_schema_is_valid_json() {
        let schema: serde_json::Value = serde_json::from_str(CONFIG_SCHEMA).unwrap();
        assert!(jsonschema::draft202012::options().build(&schema).is_ok());
    }
}
