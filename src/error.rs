// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Device-level error definitions shared by the camera and spectrometer drivers

use thiserror::Error;

/// Errors raised by a hardware (or simulated) device driver
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Could not connect to {device}: {reason}")]
    ConnectionFailure { device: String, reason: String },

    #[error("SDK call {call} failed with code {code}")]
    Sdk { call: &'static str, code: u32 },

    #[error("Device is not connected")]
    NotConnected,

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Vendor library error: {0}")]
    Library(String),
}

impl DeviceError {
    /// Shorthand for a connection failure on a named device
    pub fn connection(device: impl Into<String>, reason: impl Into<String>) -> Self {
        DeviceError::ConnectionFailure {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error happened while establishing the connection
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, DeviceError::ConnectionFailure { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_failure_message() {
        let err = DeviceError::connection("Andor SDK2 camera", "no camera found");
        assert!(err.is_connection_failure());
        assert_eq!(
            err.to_string(),
            "Could not connect to Andor SDK2 camera: no camera found"
        );
    }

    #[test]
    fn test_sdk_error_message() {
        let err = DeviceError::Sdk {
            call: "CoolerON",
            code: 20013,
        };
        assert!(!err.is_connection_failure());
        assert_eq!(err.to_string(), "SDK call CoolerON failed with code 20013");
    }
}
