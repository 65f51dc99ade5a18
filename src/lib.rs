// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Raman imaging instrument control
//!
//! This library drives a cooled Andor camera and an Andor Shamrock
//! spectrograph:
//! - [`thermal`]: cool-down and warm-up of the sensor, gating safe disconnection
//! - [`camera`]: camera drivers, acquisition settings and the acquisition session
//! - [`spectrometer`]: grating, center wavelength and slit control
//! - [`storage`]: frame, spectrum and metadata files
//! - [`config`]: YAML configuration validated against an embedded JSON schema

pub mod camera;
pub mod config;
pub mod error;
pub mod spectrometer;
pub mod storage;
pub mod thermal;

pub use camera::{Acquisition, CameraError, RamanCamera};
pub use config::Config;
pub use error::DeviceError;
pub use spectrometer::{Slit, Spectrometer, SpectrometerError};
pub use thermal::{ThermalError, ThermalLifecycleController, ThermalOutcome, ThermalState};
