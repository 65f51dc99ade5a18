// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Spectrograph drivers
//!
//! - Simulated: turret, wavelength drive and slits held in memory
//! - Shamrock: Andor Shamrock through ShamrockCIF (`andor-sdk` feature)

pub mod shamrock;
pub mod simulated;

pub use shamrock::ShamrockSpectrograph;
pub use simulated::SimulatedSpectrograph;

use log::info;

use super::SpectrographDriver;
use crate::config::{SpectrographDriverKind, SpectrometerConfig};
use crate::error::DeviceError;

/// Open the spectrograph selected in the configuration
pub fn open_spectrograph(
    config: &SpectrometerConfig,
) -> Result<Box<dyn SpectrographDriver>, DeviceError> {
    match config.driver {
        SpectrographDriverKind::Simulated => {
            info!("Opening simulated spectrograph");
            Ok(Box::new(SimulatedSpectrograph::open(&config.simulation)?))
        }
        SpectrographDriverKind::Shamrock => {
            info!("Opening Shamrock spectrograph {}", config.device_index);
            Ok(Box::new(ShamrockSpectrograph::open(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_simulated_spectrograph() {
        let config = SpectrometerConfig::default();
        let mut device = open_spectrograph(&config).unwrap();
        assert_eq!(device.device_info().unwrap().serial_number, "SR-SIM-0001");
        assert_eq!(device.grating_count().unwrap(), 3);
    }

    #[cfg(not(feature = "andor-sdk"))]
    #[test]
    fn test_shamrock_without_sdk_feature() {
        let config = SpectrometerConfig {
            driver: SpectrographDriverKind::Shamrock,
            ..SpectrometerConfig::default()
        };
        let err = open_spectrograph(&config).err().unwrap();
        assert!(err.is_connection_failure());
    }
}
