// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Andor Shamrock spectrograph control
//!
//! [`Spectrometer`] owns an optional [`SpectrographDriver`]. Its setters are
//! soft no-ops while disconnected (they return `Ok(false)`), and validate the
//! grating index, center wavelength and slit width once a device is attached.
//! All lengths are in meters.

pub mod drivers;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SpectrometerConfig;
use crate::error::DeviceError;
use crate::storage::DataWriter;

pub use drivers::{open_spectrograph, ShamrockSpectrograph, SimulatedSpectrograph};

/// Identification of a connected spectrograph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpectrographInfo {
    pub model: String,
    pub serial_number: String,
}

impl fmt::Display for SpectrographInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (SN {})", self.model, self.serial_number)
    }
}

/// Motorized slit of the spectrograph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slit {
    InputSide,
    InputDirect,
    OutputSide,
    OutputDirect,
}

impl Slit {
    pub const ALL: [Slit; 4] = [
        Slit::InputSide,
        Slit::InputDirect,
        Slit::OutputSide,
        Slit::OutputDirect,
    ];

    /// Slit index as numbered by the SDK, starting from 1
    pub fn index(self) -> u32 {
        match self {
            Slit::InputSide => 1,
            Slit::InputDirect => 2,
            Slit::OutputSide => 3,
            Slit::OutputDirect => 4,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|slit| slit.index() == index)
    }

    pub fn name(self) -> &'static str {
        match self {
            Slit::InputSide => "input_side",
            Slit::InputDirect => "input_direct",
            Slit::OutputSide => "output_side",
            Slit::OutputDirect => "output_direct",
        }
    }
}

impl fmt::Display for Slit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Slit {
    type Err = SpectrometerError;

    /// Accepts an index from 1 to 4 or a slit name such as `input_side`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let slit = match s.parse::<u32>() {
            Ok(index) => Slit::from_index(index),
            Err(_) => Slit::ALL.into_iter().find(|slit| slit.name() == s),
        };
        slit.ok_or_else(|| SpectrometerError::UnknownSlit(s.to_string()))
    }
}

/// Spectrograph capabilities used by the [`Spectrometer`] session
pub trait SpectrographDriver: Send {
    fn device_info(&mut self) -> Result<SpectrographInfo, DeviceError>;

    /// Move to a center wavelength in meters
    fn set_wavelength(&mut self, wavelength_m: f64) -> Result<(), DeviceError>;

    fn wavelength(&mut self) -> Result<f64, DeviceError>;

    /// Select a grating (numbered from 1). Blocks while the turret moves.
    fn set_grating(&mut self, grating: u32) -> Result<(), DeviceError>;

    fn grating(&mut self) -> Result<u32, DeviceError>;

    fn grating_count(&mut self) -> Result<u32, DeviceError>;

    /// Reachable center wavelengths `(min, max)` in meters for a grating
    fn wavelength_limits(&mut self, grating: u32) -> Result<(f64, f64), DeviceError>;

    fn set_slit_width(&mut self, slit: Slit, width_m: f64) -> Result<(), DeviceError>;

    /// Slit opening in meters, `None` when that slit is not fitted
    fn slit_width(&mut self, slit: Slit) -> Result<Option<f64>, DeviceError>;

    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Errors raised by the spectrometer session
#[derive(Error, Debug)]
pub enum SpectrometerError {
    #[error("Unknown slit {0:?}: expected 1-4, input_side, input_direct, output_side or output_direct")]
    UnknownSlit(String),

    #[error("Grating {grating} does not exist (1..={available})")]
    InvalidGrating { grating: u32, available: u32 },

    #[error("Wavelength {wavelength_m:e} m is outside {min_m:e}..={max_m:e} m")]
    WavelengthOutOfRange {
        wavelength_m: f64,
        min_m: f64,
        max_m: f64,
    },

    #[error("Slit width must be positive, got {0} m")]
    InvalidSlitWidth(f64),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Connection to the spectrograph
pub struct Spectrometer {
    config: SpectrometerConfig,
    device: Option<Box<dyn SpectrographDriver>>,
}

impl Spectrometer {
    pub fn new(config: SpectrometerConfig) -> Self {
        Self {
            config,
            device: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    /// Open the configured spectrograph, or report the one already connected
    pub fn connect(&mut self) -> Result<SpectrographInfo, SpectrometerError> {
        if let Some(device) = self.device.as_mut() {
            return Ok(device.device_info()?);
        }
        let mut device = open_spectrograph(&self.config)?;
        let info = device.device_info()?;
        info!("Spectrometer {} is connected", info);
        self.device = Some(device);
        Ok(info)
    }

    /// Attach an already opened driver
    pub fn attach(&mut self, driver: Box<dyn SpectrographDriver>) {
        self.device = Some(driver);
    }

    /// Close the spectrograph. Returns `false` if nothing was connected.
    pub fn disconnect(&mut self) -> bool {
        let Some(mut device) = self.device.take() else {
            return false;
        };
        match device.close() {
            Ok(()) => info!("Spectrometer disconnected"),
            Err(e) => warn!("Failed to disconnect spectrometer cleanly: {}", e),
        }
        true
    }

    fn connected(&mut self, action: &str) -> Option<&mut Box<dyn SpectrographDriver>> {
        if self.device.is_none() {
            warn!("Spectrometer not connected, ignoring {}", action);
        }
        self.device.as_mut()
    }

    /// Move to a center wavelength in meters.
    ///
    /// Returns `Ok(false)` without doing anything when disconnected.
    pub fn set_wavelength(&mut self, wavelength_m: f64) -> Result<bool, SpectrometerError> {
        let Some(device) = self.connected("set_wavelength") else {
            return Ok(false);
        };
        let grating = device.grating()?;
        let (min_m, max_m) = device.wavelength_limits(grating)?;
        if !(min_m..=max_m).contains(&wavelength_m) {
            return Err(SpectrometerError::WavelengthOutOfRange {
                wavelength_m,
                min_m,
                max_m,
            });
        }
        device.set_wavelength(wavelength_m)?;
        info!("Wavelength set to {:.3} nm", wavelength_m * 1e9);
        Ok(true)
    }

    /// Select a grating, counting from 1.
    ///
    /// Re-selecting the current grating is skipped unless `force` is set.
    pub fn set_grating(&mut self, grating: u32, force: bool) -> Result<bool, SpectrometerError> {
        let Some(device) = self.connected("set_grating") else {
            return Ok(false);
        };
        let available = device.grating_count()?;
        if grating == 0 || grating > available {
            return Err(SpectrometerError::InvalidGrating { grating, available });
        }
        if !force && device.grating()? == grating {
            info!("Grating {} already selected", grating);
            return Ok(true);
        }
        device.set_grating(grating)?;
        info!("Grating set to {}", grating);
        Ok(true)
    }

    /// Set a slit opening in meters
    pub fn set_slit_width(&mut self, slit: Slit, width_m: f64) -> Result<bool, SpectrometerError> {
        let Some(device) = self.connected("set_slit_width") else {
            return Ok(false);
        };
        if !(width_m > 0.0) {
            return Err(SpectrometerError::InvalidSlitWidth(width_m));
        }
        device.set_slit_width(slit, width_m)?;
        info!("Slit {} width set to {:.1} µm", slit, width_m * 1e6);
        Ok(true)
    }

    /// Flat dump of the spectrograph state, `None` when disconnected
    pub fn parameters(&mut self) -> Result<Option<BTreeMap<String, String>>, SpectrometerError> {
        let Some(device) = self.device.as_mut() else {
            return Ok(None);
        };
        let mut params = BTreeMap::new();
        let info = device.device_info()?;
        params.insert("model".to_string(), info.model);
        params.insert("serial_number".to_string(), info.serial_number);
        let grating = device.grating()?;
        params.insert("grating".to_string(), grating.to_string());
        params.insert(
            "grating_count".to_string(),
            device.grating_count()?.to_string(),
        );
        params.insert(
            "wavelength_m".to_string(),
            format!("{:e}", device.wavelength()?),
        );
        let (min_m, max_m) = device.wavelength_limits(grating)?;
        params.insert(
            "wavelength_limits_m".to_string(),
            format!("{:e}..{:e}", min_m, max_m),
        );
        for slit in Slit::ALL {
            if let Some(width) = device.slit_width(slit)? {
                params.insert(format!("slit_{}_m", slit), format!("{:e}", width));
            }
        }
        Ok(Some(params))
    }

    /// Write the parameter dump, returns its path, or `None` when disconnected
    pub fn save_parameters(
        &mut self,
        writer: &DataWriter,
        file_name: &str,
    ) -> anyhow::Result<Option<PathBuf>> {
        match self.parameters()? {
            Some(params) => Ok(Some(writer.save_parameters(
                file_name,
                "Andor Shamrock Spectrometer Parameters",
                &params,
            )?)),
            None => Ok(None),
        }
    }
}

impl Drop for Spectrometer {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    fn connected() -> Spectrometer {
        let mut spectrometer = Spectrometer::new(SpectrometerConfig::default());
        spectrometer.connect().unwrap();
        spectrometer
    }

    #[test]
    fn test_slit_parsing() {
        assert_eq!("1".parse::<Slit>().unwrap(), Slit::InputSide);
        assert_eq!("output_direct".parse::<Slit>().unwrap(), Slit::OutputDirect);
        assert_eq!(" 3 ".parse::<Slit>().unwrap(), Slit::OutputSide);
        assert!("5".parse::<Slit>().is_err());
        assert!("side".parse::<Slit>().is_err());
    }

    #[test]
    fn test_setters_are_noops_when_disconnected() {
        let mut spectrometer = Spectrometer::new(SpectrometerConfig::default());
        assert!(!spectrometer.set_wavelength(500e-9).unwrap());
        assert!(!spectrometer.set_grating(1, false).unwrap());
        assert!(!spectrometer.set_slit_width(Slit::InputSide, 1e-4).unwrap());
        assert!(spectrometer.parameters().unwrap().is_none());
        assert!(!spectrometer.disconnect());
    }

    #[test]
    fn test_missing_spectrograph_fails_to_connect() {
        let mut config = SpectrometerConfig::default();
        config.simulation.present = false;
        let mut spectrometer = Spectrometer::new(config);
        assert!(matches!(
            spectrometer.connect(),
            Err(SpectrometerError::Device(DeviceError::ConnectionFailure { .. }))
        ));
        assert!(!spectrometer.is_connected());
    }

    #[test]
    fn test_range_validation() {
        let mut spectrometer = connected();
        assert!(spectrometer.set_wavelength(532e-9).unwrap());
        assert!(matches!(
            spectrometer.set_wavelength(2e-6),
            Err(SpectrometerError::WavelengthOutOfRange { .. })
        ));
        assert!(matches!(
            spectrometer.set_grating(0, false),
            Err(SpectrometerError::InvalidGrating { .. })
        ));
        assert!(matches!(
            spectrometer.set_grating(4, false),
            Err(SpectrometerError::InvalidGrating { available: 3, .. })
        ));
        assert!(spectrometer.set_grating(2, false).unwrap());
        assert!(matches!(
            spectrometer.set_slit_width(Slit::InputSide, 0.0),
            Err(SpectrometerError::InvalidSlitWidth(_))
        ));
    }

    #[test]
    fn test_parameters_and_dump() {
        let mut spectrometer = connected();
        spectrometer.set_wavelength(785e-9).unwrap();
        spectrometer
            .set_slit_width(Slit::InputSide, 50e-6)
            .unwrap();

        let params = spectrometer.parameters().unwrap().unwrap();
        let wavelength: f64 = params["wavelength_m"].parse().unwrap();
        assert_relative_eq!(wavelength, 785e-9);
        assert!(params.contains_key("slit_input_side_m"));

        let dir = tempdir().unwrap();
        let writer = DataWriter::new(dir.path()).unwrap();
        let path = spectrometer
            .save_parameters(&writer, "spec_params.txt")
            .unwrap()
            .unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.starts_with("=== Andor Shamrock Spectrometer Parameters ==="));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut spectrometer = connected();
        assert!(spectrometer.disconnect());
        assert!(!spectrometer.disconnect());
    }
}
