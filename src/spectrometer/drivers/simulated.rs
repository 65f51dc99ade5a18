// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-memory spectrograph
//!
//! Every grating covers the configured wavelength range. The input and output
//! side slits are fitted; the direct ports are not.

use std::collections::HashMap;

use log::debug;

use crate::config::SpectrographSimulationConfig;
use crate::error::DeviceError;
use crate::spectrometer::{Slit, SpectrographDriver, SpectrographInfo};

const DEVICE_NAME: &str = "simulated spectrograph";
const FITTED_SLITS: [Slit; 2] = [Slit::InputSide, Slit::OutputSide];
const DEFAULT_SLIT_WIDTH_M: f64 = 10e-6;

pub struct SimulatedSpectrograph {
    config: SpectrographSimulationConfig,
    grating: u32,
    wavelength_m: f64,
    slits: HashMap<Slit, f64>,
    open: bool,
}

impl SimulatedSpectrograph {
    pub fn open(config: &SpectrographSimulationConfig) -> Result<Self, DeviceError> {
        if !config.present {
            return Err(DeviceError::connection(DEVICE_NAME, "no spectrograph found"));
        }
        if config.grating_count == 0 {
            return Err(DeviceError::connection(DEVICE_NAME, "turret has no grating"));
        }
        let slits = FITTED_SLITS
            .into_iter()
            .map(|slit| (slit, DEFAULT_SLIT_WIDTH_M))
            .collect();
        Ok(Self {
            config: config.clone(),
            grating: 1,
            wavelength_m: 0.0,
            slits,
            open: true,
        })
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }
}

impl SpectrographDriver for SimulatedSpectrograph {
    fn device_info(&mut self) -> Result<SpectrographInfo, DeviceError> {
        self.ensure_open()?;
        Ok(SpectrographInfo {
            model: "Simulated Shamrock".to_string(),
            serial_number: self.config.serial_number.clone(),
        })
    }

    fn set_wavelength(&mut self, wavelength_m: f64) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let (min, max) = self.wavelength_limits(self.grating)?;
        if !(min..=max).contains(&wavelength_m) {
            return Err(DeviceError::InvalidSettings(format!(
                "wavelength {:e} m out of range",
                wavelength_m
            )));
        }
        self.wavelength_m = wavelength_m;
        Ok(())
    }

    fn wavelength(&mut self) -> Result<f64, DeviceError> {
        self.ensure_open()?;
        Ok(self.wavelength_m)
    }

    fn set_grating(&mut self, grating: u32) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if grating == 0 || grating > self.config.grating_count {
            return Err(DeviceError::InvalidSettings(format!(
                "grating {} does not exist",
                grating
            )));
        }
        debug!("Simulated turret moved to grating {}", grating);
        self.grating = grating;
        Ok(())
    }

    fn grating(&mut self) -> Result<u32, DeviceError> {
        self.ensure_open()?;
        Ok(self.grating)
    }

    fn grating_count(&mut self) -> Result<u32, DeviceError> {
        self.ensure_open()?;
        Ok(self.config.grating_count)
    }

    fn wavelength_limits(&mut self, grating: u32) -> Result<(f64, f64), DeviceError> {
        self.ensure_open()?;
        if grating == 0 || grating > self.config.grating_count {
            return Err(DeviceError::InvalidSettings(format!(
                "grating {} does not exist",
                grating
            )));
        }
        Ok((self.config.wavelength_min_m, self.config.wavelength_max_m))
    }

    fn set_slit_width(&mut self, slit: Slit, width_m: f64) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if width_m > self.config.max_slit_width_m {
            return Err(DeviceError::InvalidSettings(format!(
                "slit width {:e} m exceeds {:e} m",
                width_m, self.config.max_slit_width_m
            )));
        }
        match self.slits.get_mut(&slit) {
            Some(width) => {
                *width = width_m;
                Ok(())
            }
            None => Err(DeviceError::Unsupported(format!("{} slit not fitted", slit))),
        }
    }

    fn slit_width(&mut self, slit: Slit) -> Result<Option<f64>, DeviceError> {
        self.ensure_open()?;
        Ok(self.slits.get(&slit).copied())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrograph() -> SimulatedSpectrograph {
        SimulatedSpectrograph::open(&SpectrographSimulationConfig::default()).unwrap()
    }

    #[test]
    fn test_only_side_slits_are_fitted() {
        let mut device = spectrograph();
        assert_eq!(
            device.slit_width(Slit::InputSide).unwrap(),
            Some(DEFAULT_SLIT_WIDTH_M)
        );
        assert_eq!(device.slit_width(Slit::InputDirect).unwrap(), None);
        assert!(matches!(
            device.set_slit_width(Slit::OutputDirect, 1e-4),
            Err(DeviceError::Unsupported(_))
        ));
    }

    #[test]
    fn test_slit_width_limit() {
        let mut device = spectrograph();
        device.set_slit_width(Slit::OutputSide, 2.5e-3).unwrap();
        assert!(device.set_slit_width(Slit::OutputSide, 3e-3).is_err());
    }

    #[test]
    fn test_closed_device_rejects_calls() {
        let mut device = spectrograph();
        device.close().unwrap();
        assert!(matches!(device.grating(), Err(DeviceError::NotConnected)));
        assert!(device.close().is_err());
    }
}
