// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Acquisition settings: exposure, binning, read mode and region of interest

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::AcquisitionConfig;
use crate::error::DeviceError;

/// Region of interest on the sensor, in unbinned pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Roi {
    /// Whole detector as a region
    pub fn full(detector: (usize, usize)) -> Self {
        Self {
            x: 0,
            y: 0,
            width: detector.0,
            height: detector.1,
        }
    }

    /// Exclusive end column, or an error if the region does not fit in `usize`
    pub fn x_end(&self) -> Result<usize, DeviceError> {
        self.x.checked_add(self.width).ok_or_else(|| self.overflow())
    }

    pub fn y_end(&self) -> Result<usize, DeviceError> {
        self.y.checked_add(self.height).ok_or_else(|| self.overflow())
    }

    fn overflow(&self) -> DeviceError {
        DeviceError::InvalidSettings(format!("ROI {} is out of range", self))
    }
}

impl FromStr for Roi {
    type Err = DeviceError;

    /// Parse `"x,y,w,h"` (integers, spaces allowed)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || DeviceError::InvalidSettings("ROI must be in format: x,y,w,h (integers)".into());
        let values = s
            .split(',')
            .map(|part| part.trim().parse::<usize>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        match values.as_slice() {
            [x, y, width, height] => Ok(Self {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            }),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

/// Sensor readout mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadMode {
    /// Full 2D image of the region
    #[default]
    Image,
    /// All rows of the region binned on-chip into a single row
    FullVerticalBinning,
}

/// Acquisition modes understood by the drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// One exposure, one frame
    Single,
    /// `count` exposures summed into one frame
    Accumulate { count: u32 },
    /// Continuous acquisition until aborted; `max_frames` bounds the session-level read loop
    RunTillAbort { max_frames: Option<u32> },
    /// Kinetic series (not implemented by any driver yet)
    Kinetic,
}

impl AcquisitionMode {
    pub fn is_continuous(&self) -> bool {
        matches!(self, AcquisitionMode::RunTillAbort { .. })
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionMode::Single => f.write_str("single"),
            AcquisitionMode::Accumulate { count } => write!(f, "accumulate({})", count),
            AcquisitionMode::RunTillAbort { .. } => f.write_str("run_till_abort"),
            AcquisitionMode::Kinetic => f.write_str("kinetic"),
        }
    }
}

/// Camera settings applied before an acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Exposure time in seconds
    pub exposure_s: f64,
    /// Horizontal binning factor
    pub hbin: usize,
    /// Vertical binning factor
    pub vbin: usize,
    pub read_mode: ReadMode,
    /// Region of interest, `None` for the full detector
    pub roi: Option<Roi>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            exposure_s: 0.05,
            hbin: 1,
            vbin: 1,
            read_mode: ReadMode::Image,
            roi: None,
        }
    }
}

impl From<&AcquisitionConfig> for AcquisitionSettings {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            exposure_s: config.exposure_s,
            hbin: config.hbin,
            vbin: config.vbin,
            read_mode: config.read_mode,
            roi: config.roi,
        }
    }
}

impl AcquisitionSettings {
    /// Region actually read out on a detector of `(width, height)` pixels
    pub fn region(&self, detector: (usize, usize)) -> Roi {
        self.roi.unwrap_or_else(|| Roi::full(detector))
    }

    /// Check the settings against a detector of `(width, height)` pixels
    pub fn validate(&self, detector: (usize, usize)) -> Result<(), DeviceError> {
        if !(self.exposure_s > 0.0) || !self.exposure_s.is_finite() {
            return Err(DeviceError::InvalidSettings(format!(
                "exposure must be positive and finite, got {}",
                self.exposure_s
            )));
        }
        if self.hbin == 0 || self.vbin == 0 {
            return Err(DeviceError::InvalidSettings(
                "binning factors must be at least 1".into(),
            ));
        }
        let region = self.region(detector);
        if region.width == 0 || region.height == 0 {
            return Err(DeviceError::InvalidSettings(format!(
                "ROI {} is empty",
                region
            )));
        }
        if region.x_end()? > detector.0 || region.y_end()? > detector.1 {
            return Err(DeviceError::InvalidSettings(format!(
                "ROI {} exceeds detector size {}x{}",
                region, detector.0, detector.1
            )));
        }
        if region.width % self.hbin != 0 || region.height % self.vbin != 0 {
            return Err(DeviceError::InvalidSettings(format!(
                "ROI {} is not a multiple of binning {}x{}",
                region, self.hbin, self.vbin
            )));
        }
        Ok(())
    }

    /// Shape `(rows, columns)` of the frames produced with these settings
    pub fn frame_shape(&self, detector: (usize, usize)) -> (usize, usize) {
        let region = self.region(detector);
        let columns = region.width / self.hbin;
        match self.read_mode {
            ReadMode::Image => (region.height / self.vbin, columns),
            ReadMode::FullVerticalBinning => (1, columns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roi_parsing() {
        let roi: Roi = "10, 20,64,32".parse().unwrap();
        assert_eq!(
            roi,
            Roi {
                x: 10,
                y: 20,
                width: 64,
                height: 32
            }
        );
        assert_eq!(roi.to_string(), "10,20,64,32");

        assert!("10,20,64".parse::<Roi>().is_err());
        assert!("a,b,c,d".parse::<Roi>().is_err());
        assert!("1,2,3,4,5".parse::<Roi>().is_err());
    }

    #[test]
    fn test_validate_against_detector() {
        let detector = (256, 128);
        let mut settings = AcquisitionSettings::default();
        assert!(settings.validate(detector).is_ok());

        settings.roi = Some(Roi {
            x: 200,
            y: 0,
            width: 100,
            height: 10,
        });
        assert!(settings.validate(detector).is_err());

        settings.roi = Some(Roi {
            x: 0,
            y: 0,
            width: 30,
            height: 10,
        });
        settings.hbin = 4;
        assert!(settings.validate(detector).is_err());

        settings.hbin = 3;
        settings.vbin = 5;
        assert!(settings.validate(detector).is_ok());

        settings.exposure_s = 0.0;
        assert!(settings.validate(detector).is_err());
        settings.exposure_s = f64::INFINITY;
        assert!(settings.validate(detector).is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_roi() {
        let settings = AcquisitionSettings {
            roi: Some(Roi {
                x: usize::MAX,
                y: 0,
                width: 2,
                height: 1,
            }),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate((256, 128)),
            Err(DeviceError::InvalidSettings(_))
        ));

        let roi: Roi = "0,18446744073709551615,1,1".parse().unwrap();
        assert!(roi.x_end().is_ok());
        assert!(roi.y_end().is_err());
    }

    #[test]
    fn test_frame_shape() {
        let detector = (256, 128);
        let mut settings = AcquisitionSettings {
            hbin: 2,
            vbin: 4,
            ..AcquisitionSettings::default()
        };
        assert_eq!(settings.frame_shape(detector), (32, 128));

        settings.read_mode = ReadMode::FullVerticalBinning;
        assert_eq!(settings.frame_shape(detector), (1, 128));
    }
}
