// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Thermal lifecycle configuration

use serde::{Deserialize, Serialize};

/// Setpoints and polling policy of the sensor cooling lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalConfig {
    /// Operating temperature the cooler is driven to, in °C
    pub target_temperature_c: f64,

    /// Temperature the sensor must reach before the camera is released, in °C
    pub safe_temperature_c: f64,

    /// Delay between two temperature reads, in milliseconds
    pub poll_interval_ms: u64,

    /// Upper bound on one cool or warm loop, in seconds.
    ///
    /// `null` disables the bound; the loop then only ends on the target or cancellation.
    pub timeout_s: Option<u64>,

    /// Consecutive failed reads tolerated before a loop gives up
    pub max_poll_failures: u32,

    /// Start cooling as soon as the camera is connected
    pub cool_on_connect: bool,

    /// Warm up to `safe_temperature_c` before closing the camera
    pub warm_before_close: bool,
}

impl Default for ThermalConfig {
    fn default() -> Self {
        Self {
            target_temperature_c: -80.0,
            safe_temperature_c: -20.0,
            poll_interval_ms: 1000,
            timeout_s: Some(3600),
            max_poll_failures: 3,
            cool_on_connect: true,
            warm_before_close: true,
        }
    }
}
