// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated camera for development and testing
//!
//! The simulation stands in for a cooled CCD:
//! - Linear thermal model: the sensor moves from its last anchor point toward the
//!   setpoint (cooler on) or ambient (cooler off) at a fixed rate, driven by the
//!   injected [`Clock`] so a [`ManualClock`](crate::thermal::ManualClock) makes it deterministic
//! - Frames are a horizontal intensity gradient plus uniform noise, scaled by exposure,
//!   with binning, ROI, full vertical binning and accumulation applied like the hardware
//! - Temperature reads can be made to fail to exercise the poll-failure policy

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{CameraDriver, CameraInfo, CameraParameters};
use crate::camera::frame::Frame;
use crate::camera::settings::{AcquisitionMode, AcquisitionSettings, ReadMode};
use crate::config::SimulationConfig;
use crate::error::DeviceError;
use crate::thermal::{Clock, TemperatureStatus, ThermalDevice};

/// Full-scale value of one unbinned pixel
const PIXEL_SATURATION: f64 = 65535.0;

/// SDK error code reported by injected read failures (DRV_ERROR_ACK)
const SIMULATED_READ_ERROR: u32 = 20013;

/// Linear thermal model of the sensor
#[derive(Debug, Clone)]
struct ThermalModel {
    ambient: f64,
    cooling_rate: f64,
    warming_rate: f64,
    cooler_on: bool,
    setpoint: Option<f64>,
    anchor_temperature: f64,
    anchor_time: Duration,
}

impl ThermalModel {
    fn new(config: &SimulationConfig, now: Duration) -> Self {
        Self {
            ambient: config.ambient_temperature_c,
            cooling_rate: config.cooling_rate_c_per_s,
            warming_rate: config.warming_rate_c_per_s,
            cooler_on: false,
            setpoint: None,
            anchor_temperature: config.ambient_temperature_c,
            anchor_time: now,
        }
    }

    fn temperature_at(&self, now: Duration) -> f64 {
        let dt = now.saturating_sub(self.anchor_time).as_secs_f64();
        let start = self.anchor_temperature;
        let goal = match (self.cooler_on, self.setpoint) {
            (true, Some(setpoint)) => setpoint,
            _ => self.ambient,
        };
        if start > goal {
            let rate = if self.cooler_on {
                self.cooling_rate
            } else {
                self.warming_rate
            };
            (start - rate * dt).max(goal)
        } else {
            (start + self.warming_rate * dt).min(goal)
        }
    }

    fn status_at(&self, now: Duration) -> TemperatureStatus {
        match (self.cooler_on, self.setpoint) {
            (false, _) => TemperatureStatus::Off,
            (true, Some(setpoint)) if (self.temperature_at(now) - setpoint).abs() < 1e-9 => {
                TemperatureStatus::Stabilized
            }
            (true, _) => TemperatureStatus::Stabilizing,
        }
    }

    fn set_cooler(&mut self, now: Duration, enabled: bool, setpoint: Option<f64>) {
        self.anchor_temperature = self.temperature_at(now);
        self.anchor_time = now;
        self.cooler_on = enabled;
        if setpoint.is_some() {
            self.setpoint = setpoint;
        }
    }
}

/// Injected temperature read failures
#[derive(Debug, Clone, Copy, Default)]
struct FailurePlan {
    after_reads: u32,
    remaining: u32,
}

/// Simulated cooled camera
pub struct SimulatedCamera {
    config: SimulationConfig,
    clock: Arc<dyn Clock>,
    thermal: ThermalModel,
    settings: AcquisitionSettings,
    acquisition: Option<AcquisitionMode>,
    rng: StdRng,
    failures: FailurePlan,
    temperature_reads: u32,
    frames_produced: u64,
    open: bool,
}

impl SimulatedCamera {
    /// Open the simulated camera; fails like the hardware when none is attached
    pub fn open(config: &SimulationConfig, clock: Arc<dyn Clock>) -> Result<Self, DeviceError> {
        if !config.present {
            return Err(DeviceError::connection(
                "simulated camera",
                "no camera attached",
            ));
        }
        let seed = config.seed.unwrap_or_else(rand::random);
        let thermal = ThermalModel::new(config, clock.now());
        info!(
            "Simulated camera {} opened at {:.1} °C ({}x{} pixels)",
            config.serial_number, config.ambient_temperature_c, config.width, config.height
        );
        Ok(Self {
            config: config.clone(),
            clock,
            thermal,
            settings: AcquisitionSettings::default(),
            acquisition: None,
            rng: StdRng::seed_from_u64(seed),
            failures: FailurePlan::default(),
            temperature_reads: 0,
            frames_produced: 0,
            open: true,
        })
    }

    /// Make `count` temperature reads fail, starting after `after_reads` successful ones
    pub fn fail_temperature_reads(mut self, after_reads: u32, count: u32) -> Self {
        self.failures = FailurePlan {
            after_reads,
            remaining: count,
        };
        self
    }

    /// Frames generated since the camera was opened
    pub fn frames_produced(&self) -> u64 {
        self.frames_produced
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }

    fn detector(&self) -> (usize, usize) {
        (self.config.width, self.config.height)
    }

    /// Signal of one unbinned pixel, before noise
    fn pixel_signal(&self, column: usize) -> f64 {
        let width = self.config.width.max(2) - 1;
        column as f64 / width as f64
    }

    fn expose(&mut self) -> Frame {
        let detector = self.detector();
        let region = self.settings.region(detector);
        let (rows, columns) = self.settings.frame_shape(detector);
        let vbin = match self.settings.read_mode {
            ReadMode::Image => self.settings.vbin,
            ReadMode::FullVerticalBinning => region.height,
        };
        let hbin = self.settings.hbin;
        let scale = self.config.signal_counts_per_s * self.settings.exposure_s;
        let noise = self.config.noise;
        let dark = f64::from(self.config.dark_counts);

        let mut frame = Array2::<u32>::zeros((rows, columns));
        for ((_, column), value) in frame.indexed_iter_mut() {
            let mut sum = 0.0;
            // the gradient runs along columns only, rows just add up
            for _ in 0..vbin {
                for dx in 0..hbin {
                    let x = region.x + column * hbin + dx;
                    let jitter = if noise > 0.0 {
                        self.rng.random_range(-noise..=noise)
                    } else {
                        0.0
                    };
                    let level = (self.pixel_signal(x) + jitter).clamp(0.0, 1.0);
                    sum += (dark + level * scale).min(PIXEL_SATURATION);
                }
            }
            *value = sum.round() as u32;
        }
        self.frames_produced += 1;
        frame
    }
}

impl ThermalDevice for SimulatedCamera {
    fn set_cooler(&mut self, enabled: bool, setpoint: Option<f64>) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let now = self.clock.now();
        self.thermal.set_cooler(now, enabled, setpoint);
        debug!(
            "Simulated cooler {} (setpoint {:?})",
            if enabled { "on" } else { "off" },
            self.thermal.setpoint
        );
        Ok(())
    }

    fn get_temperature(&mut self) -> Result<f64, DeviceError> {
        self.ensure_open()?;
        self.temperature_reads += 1;
        if self.temperature_reads > self.failures.after_reads && self.failures.remaining > 0 {
            self.failures.remaining -= 1;
            return Err(DeviceError::Sdk {
                call: "GetTemperatureF",
                code: SIMULATED_READ_ERROR,
            });
        }
        Ok(self.thermal.temperature_at(self.clock.now()))
    }

    fn get_temperature_status(&mut self) -> Result<TemperatureStatus, DeviceError> {
        self.ensure_open()?;
        Ok(self.thermal.status_at(self.clock.now()))
    }

    fn get_temperature_setpoint(&mut self) -> Result<Option<f64>, DeviceError> {
        self.ensure_open()?;
        Ok(self.thermal.setpoint)
    }

    fn acquisition_in_progress(&mut self) -> Result<bool, DeviceError> {
        self.ensure_open()?;
        Ok(self.acquisition.is_some())
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if let Some(mode) = self.acquisition.take() {
            debug!("Simulated {} acquisition aborted", mode);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.acquisition = None;
        self.open = false;
        info!("Simulated camera {} closed", self.config.serial_number);
        Ok(())
    }
}

impl CameraDriver for SimulatedCamera {
    fn device_info(&mut self) -> Result<CameraInfo, DeviceError> {
        self.ensure_open()?;
        Ok(CameraInfo {
            controller_model: "Simulated controller".to_string(),
            head_model: self.config.head_model.clone(),
            serial_number: self.config.serial_number.clone(),
        })
    }

    fn detector_size(&mut self) -> Result<(usize, usize), DeviceError> {
        self.ensure_open()?;
        Ok(self.detector())
    }

    fn apply_settings(&mut self, settings: &AcquisitionSettings) -> Result<(), DeviceError> {
        self.ensure_open()?;
        settings.validate(self.detector())?;
        self.settings = settings.clone();
        Ok(())
    }

    fn set_exposure(&mut self, exposure_s: f64) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let settings = AcquisitionSettings {
            exposure_s,
            ..self.settings.clone()
        };
        settings.validate(self.detector())?;
        self.settings = settings;
        Ok(())
    }

    fn start_acquisition(&mut self, mode: AcquisitionMode) -> Result<(), DeviceError> {
        self.ensure_open()?;
        match mode {
            AcquisitionMode::Kinetic => Err(DeviceError::Unsupported(
                "kinetic series acquisition".into(),
            )),
            AcquisitionMode::Accumulate { count: 0 } => Err(DeviceError::InvalidSettings(
                "accumulation count must be at least 1".into(),
            )),
            _ => {
                self.acquisition = Some(mode);
                debug!("Simulated {} acquisition started", mode);
                Ok(())
            }
        }
    }

    fn wait_for_frame(&mut self, _timeout: Duration) -> Result<Frame, DeviceError> {
        self.ensure_open()?;
        match self.acquisition {
            None => Err(DeviceError::Timeout(
                "a frame while no acquisition is running".into(),
            )),
            Some(AcquisitionMode::Accumulate { count }) => {
                self.acquisition = None;
                let mut total = self.expose();
                for _ in 1..count {
                    total += &self.expose();
                }
                Ok(total)
            }
            Some(AcquisitionMode::RunTillAbort { .. }) => Ok(self.expose()),
            Some(_) => {
                self.acquisition = None;
                Ok(self.expose())
            }
        }
    }

    fn read_newest_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        self.ensure_open()?;
        match self.acquisition {
            Some(mode) if mode.is_continuous() => Ok(Some(self.expose())),
            _ => Ok(None),
        }
    }

    fn parameters(&mut self) -> Result<CameraParameters, DeviceError> {
        self.ensure_open()?;
        let now = self.clock.now();
        let mut params = BTreeMap::new();
        params.insert("head_model".into(), self.config.head_model.clone());
        params.insert("serial_number".into(), self.config.serial_number.clone());
        params.insert(
            "detector_size".into(),
            format!("{}x{}", self.config.width, self.config.height),
        );
        params.insert(
            "temperature_c".into(),
            format!("{:.2}", self.thermal.temperature_at(now)),
        );
        params.insert(
            "temperature_setpoint_c".into(),
            self.thermal
                .setpoint
                .map_or_else(|| "none".to_string(), |s| format!("{:.1}", s)),
        );
        params.insert(
            "exposure_time_s".into(),
            self.settings.exposure_s.to_string(),
        );
        params.insert(
            "binning".into(),
            format!("{}x{}", self.settings.hbin, self.settings.vbin),
        );
        params.insert(
            "read_mode".into(),
            format!("{:?}", self.settings.read_mode),
        );
        params.insert(
            "roi".into(),
            self.settings.region(self.detector()).to_string(),
        );
        Ok(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::settings::Roi;
    use crate::thermal::ManualClock;
    use approx::assert_relative_eq;

    fn quiet_config() -> SimulationConfig {
        SimulationConfig {
            noise: 0.0,
            seed: Some(7),
            ..SimulationConfig::default()
        }
    }

    fn open(clock: &Arc<ManualClock>) -> SimulatedCamera {
        SimulatedCamera::open(&quiet_config(), clock.clone()).unwrap()
    }

    #[test]
    fn test_thermal_model_cools_linearly_to_setpoint() {
        let clock = Arc::new(ManualClock::new());
        let mut camera = open(&clock);

        assert_relative_eq!(camera.get_temperature().unwrap(), 20.0);
        assert_eq!(
            camera.get_temperature_status().unwrap(),
            TemperatureStatus::Off
        );

        camera.set_cooler(true, Some(-80.0)).unwrap();
        clock.advance(Duration::from_secs(2));
        assert_relative_eq!(camera.get_temperature().unwrap(), -20.0);
        assert_eq!(
            camera.get_temperature_status().unwrap(),
            TemperatureStatus::Stabilizing
        );

        clock.advance(Duration::from_secs(10));
        assert_relative_eq!(camera.get_temperature().unwrap(), -80.0);
        assert_eq!(
            camera.get_temperature_status().unwrap(),
            TemperatureStatus::Stabilized
        );
    }

    #[test]
    fn test_thermal_model_warms_to_ambient_when_cooler_off() {
        let clock = Arc::new(ManualClock::new());
        let mut camera = open(&clock);
        camera.set_cooler(true, Some(-80.0)).unwrap();
        clock.advance(Duration::from_secs(5));

        camera.set_cooler(false, None).unwrap();
        clock.advance(Duration::from_secs(4));
        assert_relative_eq!(camera.get_temperature().unwrap(), -60.0);

        clock.advance(Duration::from_secs(1000));
        assert_relative_eq!(camera.get_temperature().unwrap(), 20.0);
        assert_eq!(camera.get_temperature_setpoint().unwrap(), Some(-80.0));
    }

    #[test]
    fn test_injected_read_failures() {
        let clock = Arc::new(ManualClock::new());
        let mut camera = open(&clock).fail_temperature_reads(1, 2);

        assert!(camera.get_temperature().is_ok());
        assert!(camera.get_temperature().is_err());
        assert!(camera.get_temperature().is_err());
        assert!(camera.get_temperature().is_ok());
    }

    #[test]
    fn test_single_frame_gradient() {
        let clock = Arc::new(ManualClock::new());
        let mut camera = open(&clock);
        camera.start_acquisition(AcquisitionMode::Single).unwrap();
        let frame = camera.wait_for_frame(Duration::from_secs(1)).unwrap();

        assert_eq!(frame.dim(), (128, 256));
        assert!(frame[[0, 255]] > frame[[0, 0]]);
        assert!(!camera.acquisition_in_progress().unwrap());
    }

    #[test]
    fn test_binning_roi_and_accumulation() {
        let clock = Arc::new(ManualClock::new());
        let mut camera = open(&clock);
        let settings = AcquisitionSettings {
            hbin: 2,
            vbin: 2,
            roi: Some(Roi {
                x: 0,
                y: 0,
                width: 16,
                height: 8,
            }),
            ..AcquisitionSettings::default()
        };
        camera.apply_settings(&settings).unwrap();

        camera.start_acquisition(AcquisitionMode::Single).unwrap();
        let single = camera.wait_for_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(single.dim(), (4, 8));

        camera
            .start_acquisition(AcquisitionMode::Accumulate { count: 3 })
            .unwrap();
        let accumulated = camera.wait_for_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(accumulated[[1, 5]], single[[1, 5]] * 3);
    }

    #[test]
    fn test_full_vertical_binning_gives_one_row() {
        let clock = Arc::new(ManualClock::new());
        let mut camera = open(&clock);
        camera
            .apply_settings(&AcquisitionSettings {
                read_mode: ReadMode::FullVerticalBinning,
                ..AcquisitionSettings::default()
            })
            .unwrap();
        camera.start_acquisition(AcquisitionMode::Single).unwrap();
        assert_eq!(
            camera.wait_for_frame(Duration::from_secs(1)).unwrap().dim(),
            (1, 256)
        );
    }

    #[test]
    fn test_continuous_acquisition_and_abort() {
        let clock = Arc::new(ManualClock::new());
        let mut camera = open(&clock);
        assert!(camera.read_newest_frame().unwrap().is_none());

        camera
            .start_acquisition(AcquisitionMode::RunTillAbort { max_frames: None })
            .unwrap();
        assert!(camera.read_newest_frame().unwrap().is_some());
        assert!(camera.acquisition_in_progress().unwrap());

        camera.stop_acquisition().unwrap();
        assert!(!camera.acquisition_in_progress().unwrap());
        assert_eq!(camera.frames_produced(), 1);
    }

    #[test]
    fn test_kinetic_is_unsupported() {
        let clock = Arc::new(ManualClock::new());
        let mut camera = open(&clock);
        assert!(matches!(
            camera.start_acquisition(AcquisitionMode::Kinetic),
            Err(DeviceError::Unsupported(_))
        ));
    }

    #[test]
    fn test_closed_camera_rejects_calls() {
        let clock = Arc::new(ManualClock::new());
        let mut camera = open(&clock);
        camera.close().unwrap();
        assert!(matches!(
            camera.get_temperature(),
            Err(DeviceError::NotConnected)
        ));
    }
}
