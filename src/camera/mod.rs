// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Camera session
//!
//! [`RamanCamera`] ties a camera driver to the thermal lifecycle controller,
//! the acquisition settings and the data writer. The controller owns the driver
//! handle; the session only borrows it for one call at a time, so a cooling loop
//! running in the background keeps polling between frames.

pub mod drivers;
pub mod frame;
pub mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::config::Config;
use crate::error::DeviceError;
use crate::storage::{self, AcquisitionMetadata, Binning, DataWriter};
use crate::thermal::{
    CancelToken, Clock, LifecycleTask, PollPolicy, SystemClock, ThermalError,
    ThermalLifecycleController, ThermalState,
};
use drivers::{open_camera, CameraDriver, CameraInfo};
use frame::{Frame, Spectrum};
use settings::{AcquisitionMode, AcquisitionSettings};

/// Errors raised by the camera session
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Camera is not connected")]
    NotConnected,

    #[error("Camera is already connected")]
    AlreadyConnected,

    #[error("Acquisition cancelled before any frame was read")]
    Cancelled,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Thermal(ThermalError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<ThermalError> for CameraError {
    fn from(error: ThermalError) -> Self {
        match error {
            ThermalError::NotConnected => CameraError::NotConnected,
            ThermalError::AlreadyConnected => CameraError::AlreadyConnected,
            ThermalError::Device(e) => CameraError::Device(e),
            other => CameraError::Thermal(other),
        }
    }
}

/// Result of one acquisition
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub mode: AcquisitionMode,
    pub frame: Frame,
    pub spectrum: Spectrum,
    /// Frames read from the camera to produce `frame`
    pub frames_read: u32,
    /// Unix seconds, used to name the saved files
    pub timestamp: i64,
}

/// Files written for one acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct SavedAcquisition {
    pub frame: PathBuf,
    pub spectrum: PathBuf,
    pub metadata: PathBuf,
}

/// A connected (or connectable) Raman camera
pub struct RamanCamera {
    config: Config,
    controller: ThermalLifecycleController,
    settings: AcquisitionSettings,
    info: Option<CameraInfo>,
    live: bool,
    cancel: CancelToken,
}

impl RamanCamera {
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Session whose polling loops and simulated camera run on `clock`
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        let controller = ThermalLifecycleController::new(PollPolicy::from(&config.thermal), clock);
        Self {
            settings: AcquisitionSettings::from(&config.camera.acquisition),
            config,
            controller,
            info: None,
            live: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn controller(&self) -> &ThermalLifecycleController {
        &self.controller
    }

    pub fn info(&self) -> Option<&CameraInfo> {
        self.info.as_ref()
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.controller.is_connected()
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Token stopping a run-till-abort acquisition at its next frame
    pub fn acquisition_cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn get_temp(&self) -> ThermalState {
        self.controller.get_temp()
    }

    fn device<T>(
        &self,
        f: impl FnOnce(&mut dyn CameraDriver) -> Result<T, DeviceError>,
    ) -> Result<T, CameraError> {
        Ok(self.controller.with_device(f)?)
    }

    /// Open the camera, dump its parameters and apply default settings.
    ///
    /// When `thermal.cool_on_connect` is set, the returned task is the cooling
    /// loop already running in the background.
    pub fn connect(&mut self) -> Result<Option<LifecycleTask>, CameraError> {
        if self.controller.is_connected() {
            return Err(CameraError::AlreadyConnected);
        }
        let driver = open_camera(&self.config.camera, self.controller.clock())?;
        self.controller.connect(driver)?;

        if let Err(e) = self.initialize() {
            error!("Camera initialization failed: {}", e);
            self.controller.safe_close();
            self.info = None;
            return Err(e);
        }

        if !self.config.thermal.cool_on_connect {
            return Ok(None);
        }
        let target = self.config.thermal.target_temperature_c;
        info!("Cooling to {} °C", target);
        Ok(Some(self.controller.spawn_cool(target)?))
    }

    fn initialize(&mut self) -> Result<(), CameraError> {
        let info = self.device(|d| d.device_info())?;
        info!("Connected to camera {}", info);
        self.info = Some(info);

        if let Err(e) = self.save_parameters() {
            warn!("Could not write camera parameters: {}", e);
        }

        // full frame, 1x1 binning, image read mode
        let settings = AcquisitionSettings {
            exposure_s: self.config.camera.acquisition.exposure_s,
            ..AcquisitionSettings::default()
        };
        self.device(|d| d.apply_settings(&settings))?;
        self.settings = settings;
        self.live = false;
        Ok(())
    }

    /// Stop live mode and release the camera.
    ///
    /// With `thermal.warm_before_close` the camera is warmed up and closed on
    /// a worker, whose task is returned. Otherwise it is closed immediately.
    pub fn disconnect(&mut self) -> Result<Option<LifecycleTask>, CameraError> {
        if !self.controller.is_connected() {
            debug!("Disconnect requested but no camera is connected");
            return Ok(None);
        }
        if let Err(e) = self.stop_live() {
            warn!("Could not stop live mode: {}", e);
        }
        self.info = None;

        if !self.config.thermal.warm_before_close {
            self.controller.safe_close();
            return Ok(None);
        }
        // a cooling loop still running would reject the warm-up
        self.controller.cancel_and_wait();
        let safe = self.config.thermal.safe_temperature_c;
        info!("Warming to {} °C before closing", safe);
        Ok(Some(self.controller.spawn_warm_and_close(safe)?))
    }

    /// Validate and apply acquisition settings
    pub fn apply_settings(&mut self, settings: AcquisitionSettings) -> Result<(), CameraError> {
        if self.live {
            self.stop_live()?;
        }
        self.device(|d| d.apply_settings(&settings))?;
        debug!("Acquisition settings applied: {:?}", settings);
        self.settings = settings;
        Ok(())
    }

    /// Start continuous acquisition at the live exposure.
    ///
    /// Returns `Ok(false)` when no camera is connected.
    pub fn start_live(&mut self) -> Result<bool, CameraError> {
        if !self.controller.is_connected() {
            warn!("Camera not connected, cannot start live mode");
            return Ok(false);
        }
        if self.live {
            return Ok(true);
        }
        let exposure = self.config.camera.live_exposure_s;
        self.device(|d| {
            d.set_exposure(exposure)?;
            d.start_acquisition(AcquisitionMode::RunTillAbort { max_frames: None })
        })?;
        self.live = true;
        info!("Live mode started ({} s exposure)", exposure);
        Ok(true)
    }

    /// Leave live mode and restore the acquisition exposure
    pub fn stop_live(&mut self) -> Result<(), CameraError> {
        if !self.live {
            return Ok(());
        }
        self.live = false;
        let exposure = self.settings.exposure_s;
        self.device(|d| {
            d.stop_acquisition()?;
            d.set_exposure(exposure)
        })?;
        info!("Live mode stopped");
        Ok(())
    }

    /// Newest live frame, `None` when not live or no new frame is ready
    pub fn live_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        if !self.live {
            return Ok(None);
        }
        self.device(|d| d.read_newest_frame())
    }

    fn frame_timeout(&self, exposures: u32) -> Result<Duration, DeviceError> {
        let seconds = self.config.camera.acquisition.frame_timeout_s
            + self.settings.exposure_s * f64::from(exposures);
        Duration::try_from_secs_f64(seconds).map_err(|_| {
            DeviceError::InvalidSettings(format!(
                "frame timeout of {} s for {} exposures is out of range",
                seconds, exposures
            ))
        })
    }

    /// Acquire with the current settings. Live mode is stopped first.
    pub fn acquire(&mut self, mode: AcquisitionMode) -> Result<Acquisition, CameraError> {
        if !self.controller.is_connected() {
            return Err(CameraError::NotConnected);
        }
        if self.live {
            self.stop_live()?;
        }
        self.cancel.reset();
        info!("Starting {} acquisition", mode);

        let (frame, frames_read) = match mode {
            AcquisitionMode::RunTillAbort { max_frames } => self.run_till_abort(max_frames)?,
            AcquisitionMode::Accumulate { count } => {
                let timeout = self.frame_timeout(count)?;
                let frame = self.device(|d| {
                    d.start_acquisition(mode)?;
                    d.wait_for_frame(timeout)
                })?;
                (frame, 1)
            }
            AcquisitionMode::Single | AcquisitionMode::Kinetic => {
                let timeout = self.frame_timeout(1)?;
                let frame = self.device(|d| {
                    d.start_acquisition(mode)?;
                    d.wait_for_frame(timeout)
                })?;
                (frame, 1)
            }
        };

        let spectrum = frame::spectrum(&frame);
        debug!("Acquired frame {:?}", frame.dim());
        Ok(Acquisition {
            mode,
            frame,
            spectrum,
            frames_read,
            timestamp: storage::timestamp(),
        })
    }

    fn run_till_abort(&mut self, max_frames: Option<u32>) -> Result<(Frame, u32), CameraError> {
        let timeout = self.frame_timeout(1)?;
        self.device(|d| d.start_acquisition(AcquisitionMode::RunTillAbort { max_frames }))?;

        let mut last = None;
        let mut read = 0u32;
        let result = loop {
            if self.cancel.is_cancelled() {
                info!("Run-till-abort cancelled after {} frames", read);
                break Ok(());
            }
            if max_frames.is_some_and(|max| read >= max) {
                break Ok(());
            }
            match self.device(|d| d.wait_for_frame(timeout)) {
                Ok(frame) => {
                    last = Some(frame);
                    read += 1;
                }
                Err(e) => break Err(e),
            }
        };

        if let Err(e) = self.device(|d| d.stop_acquisition()) {
            warn!("Could not abort run-till-abort acquisition: {}", e);
        }
        result?;
        last.map(|frame| (frame, read)).ok_or(CameraError::Cancelled)
    }

    /// `count` single frames
    pub fn grab(&mut self, count: usize) -> Result<Vec<Frame>, CameraError> {
        (0..count)
            .map(|_| self.acquire(AcquisitionMode::Single).map(|a| a.frame))
            .collect()
    }

    /// Request a running run-till-abort acquisition to stop
    pub fn cancel_acquisition(&self) {
        self.cancel.cancel();
    }

    /// Write frame, spectrum and metadata of an acquisition to the save path
    pub fn save(&self, acquisition: &Acquisition) -> Result<SavedAcquisition, CameraError> {
        let writer = DataWriter::from_config(&self.config.storage)?;
        let (frame, spectrum) =
            writer.save_data(&acquisition.frame, &acquisition.spectrum, acquisition.timestamp)?;

        let (rows, columns) = acquisition.frame.dim();
        let info = self.info.as_ref();
        let meta = AcquisitionMetadata {
            camera_model: info.map_or_else(String::new, |i| i.head_model.clone()),
            serial: info.map_or_else(String::new, |i| i.serial_number.clone()),
            exposure_s: self.settings.exposure_s,
            binning: Binning {
                h: self.settings.hbin,
                v: self.settings.vbin,
            },
            roi: self
                .settings
                .roi
                .map(|roi| [roi.x, roi.y, roi.width, roi.height]),
            cooling_setpoint_c: self.get_temp().setpoint,
            frame_shape: [rows, columns],
            timestamp: acquisition.timestamp,
        };
        let metadata = writer.save_meta(&meta)?;
        Ok(SavedAcquisition {
            frame,
            spectrum,
            metadata,
        })
    }

    /// Write the camera parameter dump
    pub fn save_parameters(&self) -> Result<PathBuf, CameraError> {
        let params = self.device(|d| d.parameters())?;
        let writer = DataWriter::from_config(&self.config.storage)?;
        Ok(writer.save_parameters(
            &self.config.storage.camera_params_file,
            "Andor Camera Parameters",
            &params,
        )?)
    }
}
