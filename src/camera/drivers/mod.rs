// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Camera drivers
//!
//! This module provides the camera driver implementations:
//! - Simulated: deterministic camera for tests and bench-top development
//! - Andor SDK2: real hardware through the vendor library (`andor-sdk` feature)

pub mod andor;
pub mod simulated;

pub use andor::AndorSdk2Camera;
pub use simulated::SimulatedCamera;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::{Deserialize, Serialize};

use crate::camera::frame::Frame;
use crate::camera::settings::{AcquisitionMode, AcquisitionSettings};
use crate::config::{CameraConfig, CameraDriverKind};
use crate::error::DeviceError;
use crate::thermal::{Clock, ThermalDevice};

/// Identification of a connected camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub controller_model: String,
    pub head_model: String,
    pub serial_number: String,
}

impl std::fmt::Display for CameraInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} | SN {}",
            self.controller_model, self.head_model, self.serial_number
        )
    }
}

/// Flat name/value dump of the camera state, written to the parameter file on connect
pub type CameraParameters = BTreeMap<String, String>;

/// Full camera capability set: thermal control plus image acquisition
pub trait CameraDriver: ThermalDevice {
    fn device_info(&mut self) -> Result<CameraInfo, DeviceError>;

    /// Sensor size `(width, height)` in pixels, independent of ROI
    fn detector_size(&mut self) -> Result<(usize, usize), DeviceError>;

    fn apply_settings(&mut self, settings: &AcquisitionSettings) -> Result<(), DeviceError>;

    fn set_exposure(&mut self, exposure_s: f64) -> Result<(), DeviceError>;

    fn start_acquisition(&mut self, mode: AcquisitionMode) -> Result<(), DeviceError>;

    /// Block until the next frame is ready
    fn wait_for_frame(&mut self, timeout: Duration) -> Result<Frame, DeviceError>;

    /// Newest frame of a running continuous acquisition, `None` if none is ready
    fn read_newest_frame(&mut self) -> Result<Option<Frame>, DeviceError>;

    fn parameters(&mut self) -> Result<CameraParameters, DeviceError>;
}

/// Open the camera selected in the configuration
pub fn open_camera(
    config: &CameraConfig,
    clock: Arc<dyn Clock>,
) -> Result<Box<dyn CameraDriver>, DeviceError> {
    match config.driver {
        CameraDriverKind::Simulated => {
            info!("Opening simulated camera");
            Ok(Box::new(SimulatedCamera::open(&config.simulation, clock)?))
        }
        CameraDriverKind::AndorSdk2 => {
            info!("Opening Andor SDK2 camera");
            Ok(Box::new(AndorSdk2Camera::open(config)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thermal::ManualClock;

    #[test]
    fn test_open_simulated_camera() {
        let config = CameraConfig::default();
        let mut camera = open_camera(&config, Arc::new(ManualClock::new())).unwrap();
        let info = camera.device_info().unwrap();
        assert_eq!(info.serial_number, config.simulation.serial_number);
        assert_eq!(camera.detector_size().unwrap(), (256, 128));
    }

    #[test]
    fn test_open_missing_simulated_camera_is_connection_failure() {
        let mut config = CameraConfig::default();
        config.simulation.present = false;
        let err = open_camera(&config, Arc::new(ManualClock::new()))
            .err()
            .unwrap();
        assert!(err.is_connection_failure());
    }

    #[cfg(not(feature = "andor-sdk"))]
    #[test]
    fn test_andor_driver_without_sdk_feature() {
        let config = CameraConfig {
            driver: CameraDriverKind::AndorSdk2,
            sdk_path: Some("/opt/andor/lib".into()),
            ..CameraConfig::default()
        };
        let err = open_camera(&config, Arc::new(ManualClock::new()))
            .err()
            .unwrap();
        assert!(err.is_connection_failure());
    }
}
