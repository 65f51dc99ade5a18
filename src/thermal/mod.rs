// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Thermal lifecycle of the cooled imaging sensor
//!
//! This module moves the camera sensor between ambient and operating temperature
//! and gates device teardown on a safe temperature:
//! - [`ThermalDevice`]: the capability set a device must offer (cooler, temperature, teardown)
//! - [`ThermalLifecycleController`]: owns the device handle, runs the cool/warm polling loops
//! - [`worker`]: runs those loops on a background thread with a one-shot completion
//! - [`clock`]: injectable time source so the loops can run in virtual time
//!
//! ```text
//! Disconnected --connect--> Idle --cool--> Cooling --(reached|cancelled|timeout)--> Idle
//!                            Idle --warm--> Warming --(reached|cancelled|timeout)--> Idle
//!                            Idle --safe_close--> Disconnected
//! ```

pub mod clock;
mod controller;
pub mod worker;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ThermalConfig;
use crate::error::DeviceError;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::ThermalLifecycleController;
pub use worker::LifecycleTask;

/// Cooler and temperature capabilities required by the lifecycle controller.
///
/// Any device satisfying this trait (SDK-backed or simulated) is interchangeable.
pub trait ThermalDevice: Send {
    /// Enable or disable the cooler. `setpoint` is the target in °C when enabling.
    fn set_cooler(&mut self, enabled: bool, setpoint: Option<f64>) -> Result<(), DeviceError>;

    /// Current sensor temperature in °C
    fn get_temperature(&mut self) -> Result<f64, DeviceError>;

    /// Current stabilization status reported by the device
    fn get_temperature_status(&mut self) -> Result<TemperatureStatus, DeviceError>;

    /// Commanded setpoint in °C, `None` if the cooler was never enabled
    fn get_temperature_setpoint(&mut self) -> Result<Option<f64>, DeviceError>;

    /// Whether an acquisition is currently running
    fn acquisition_in_progress(&mut self) -> Result<bool, DeviceError>;

    /// Abort any running acquisition
    fn stop_acquisition(&mut self) -> Result<(), DeviceError>;

    /// Release the device
    fn close(&mut self) -> Result<(), DeviceError>;
}

/// Stabilization status of the sensor temperature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureStatus {
    /// Cooler is on and the temperature has not settled on the setpoint yet
    Stabilizing,
    /// Temperature reached the setpoint and is stable
    Stabilized,
    /// Temperature was stable but has drifted away from the setpoint
    Drifted,
    /// Cooler is switched off
    Off,
    /// No device, or the device could not tell
    Unknown,
}

impl fmt::Display for TemperatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TemperatureStatus::Stabilizing => "stabilizing",
            TemperatureStatus::Stabilized => "stabilized",
            TemperatureStatus::Drifted => "drifted",
            TemperatureStatus::Off => "off",
            TemperatureStatus::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// Snapshot of the thermal state, read from the device at call time and never cached
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalState {
    /// Measured temperature in °C, `None` when unknown
    pub temperature: Option<f64>,
    /// Commanded setpoint in °C
    pub setpoint: Option<f64>,
    pub status: TemperatureStatus,
}

impl ThermalState {
    /// Sentinel returned when no device is connected or the read failed
    pub fn unknown() -> Self {
        Self {
            temperature: None,
            setpoint: None,
            status: TemperatureStatus::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.temperature.is_none() && self.status == TemperatureStatus::Unknown
    }
}

impl fmt::Display for ThermalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.temperature {
            Some(t) => write!(f, "Temp: {:.2} °C | {}", t, self.status),
            None => write!(f, "Temp: -- °C | {}", self.status),
        }
    }
}

/// Lifecycle operation that holds the busy flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOperation {
    Cooling,
    Warming,
}

impl fmt::Display for LifecycleOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleOperation::Cooling => f.write_str("cooling"),
            LifecycleOperation::Warming => f.write_str("warming"),
        }
    }
}

/// Observable state of the lifecycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Disconnected,
    Idle,
    Cooling,
    Warming,
}

/// How the cool/warm loops poll the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    /// Delay between two temperature reads
    pub interval: Duration,
    /// Give up with [`ThermalOutcome::TimedOut`] after this long. `None` polls forever.
    pub timeout: Option<Duration>,
    /// Consecutive failed reads tolerated before escalating to [`ThermalError::PollFailure`]
    pub max_consecutive_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Some(Duration::from_secs(3600)),
            max_consecutive_failures: 3,
        }
    }
}

impl From<&ThermalConfig> for PollPolicy {
    fn from(config: &ThermalConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            timeout: config.timeout_s.map(Duration::from_secs),
            max_consecutive_failures: config.max_poll_failures,
        }
    }
}

/// Cooperative cancellation flag shared between the controller and its callers
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request termination; observed at the next poll iteration
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// How a cool or warm loop ended without error
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThermalOutcome {
    /// The temperature crossed the requested threshold
    Reached {
        temperature: f64,
        status: TemperatureStatus,
        ticks: u32,
    },
    /// Cancellation was requested before the threshold was crossed
    Cancelled {
        last_temperature: Option<f64>,
        ticks: u32,
    },
    /// The poll policy's timeout elapsed first
    TimedOut {
        last_temperature: Option<f64>,
        ticks: u32,
    },
}

impl ThermalOutcome {
    pub fn is_reached(&self) -> bool {
        matches!(self, ThermalOutcome::Reached { .. })
    }

    /// Number of polling intervals slept through
    pub fn ticks(&self) -> u32 {
        match *self {
            ThermalOutcome::Reached { ticks, .. }
            | ThermalOutcome::Cancelled { ticks, .. }
            | ThermalOutcome::TimedOut { ticks, .. } => ticks,
        }
    }

    /// Last temperature read before the loop ended
    pub fn temperature(&self) -> Option<f64> {
        match *self {
            ThermalOutcome::Reached { temperature, .. } => Some(temperature),
            ThermalOutcome::Cancelled {
                last_temperature, ..
            }
            | ThermalOutcome::TimedOut {
                last_temperature, ..
            } => last_temperature,
        }
    }
}

impl fmt::Display for ThermalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let temp = |t: Option<f64>| t.map_or_else(|| "--".to_string(), |t| format!("{:.2}", t));
        match *self {
            ThermalOutcome::Reached {
                temperature,
                status,
                ticks,
            } => write!(
                f,
                "reached {:.2} °C ({}) after {} polls",
                temperature, status, ticks
            ),
            ThermalOutcome::Cancelled {
                last_temperature,
                ticks,
            } => write!(
                f,
                "cancelled at {} °C after {} polls",
                temp(last_temperature),
                ticks
            ),
            ThermalOutcome::TimedOut {
                last_temperature,
                ticks,
            } => write!(
                f,
                "timed out at {} °C after {} polls",
                temp(last_temperature),
                ticks
            ),
        }
    }
}

/// Errors raised by the lifecycle controller
#[derive(Error, Debug)]
pub enum ThermalError {
    #[error("No device connected")]
    NotConnected,

    #[error("A device is already connected")]
    AlreadyConnected,

    #[error("Controller is busy {running}")]
    Busy { running: LifecycleOperation },

    #[error("Temperature polling failed {attempts} times in a row: {source}")]
    PollFailure {
        attempts: u32,
        #[source]
        source: DeviceError,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("Lifecycle worker exited without reporting a result")]
    WorkerLost,

    #[error("Could not start lifecycle worker: {0}")]
    Spawn(#[source] std::io::Error),
}
