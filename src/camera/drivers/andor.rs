// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Andor SDK2 camera driver
//!
//! The driver talks to the vendor library through [`AndorApi`], a thin
//! one-method-per-entry-point view of the SDK returning raw status codes.
//! With the `andor-sdk` feature the API is bound at runtime with `libloading`;
//! without it [`AndorSdk2Camera::open`] reports a connection failure.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info, warn};
use ndarray::Array2;

use super::{CameraDriver, CameraInfo, CameraParameters};
use crate::camera::frame::Frame;
use crate::camera::settings::{AcquisitionMode, AcquisitionSettings, ReadMode};
use crate::config::CameraConfig;
use crate::error::DeviceError;
use crate::thermal::{TemperatureStatus, ThermalDevice};

const DEVICE_NAME: &str = "Andor SDK2 camera";

pub const DRV_SUCCESS: u32 = 20002;
pub const DRV_NO_NEW_DATA: u32 = 20024;
pub const DRV_TEMPERATURE_OFF: u32 = 20034;
pub const DRV_TEMPERATURE_NOT_STABILIZED: u32 = 20035;
pub const DRV_TEMPERATURE_STABILIZED: u32 = 20036;
pub const DRV_TEMPERATURE_NOT_REACHED: u32 = 20037;
pub const DRV_TEMPERATURE_DRIFT: u32 = 20040;
pub const DRV_ACQUIRING: u32 = 20072;

const READ_MODE_FVB: i32 = 0;
const READ_MODE_IMAGE: i32 = 4;

const ACQ_MODE_SINGLE: i32 = 1;
const ACQ_MODE_ACCUMULATE: i32 = 2;
const ACQ_MODE_RUN_TILL_ABORT: i32 = 5;

/// TTL-high shutter in automatic mode with zero transfer times
const SHUTTER_TTL_HIGH: i32 = 1;
const SHUTTER_AUTO: i32 = 0;

/// Entry points of the Andor SDK2 used by the driver.
///
/// Every method returns the SDK status code; out parameters are returned alongside it.
pub trait AndorApi: Send {
    fn initialize(&self, directory: &str) -> u32;
    fn shut_down(&self) -> u32;
    fn get_temperature_f(&self) -> (u32, f32);
    fn set_temperature(&self, celsius: i32) -> u32;
    fn cooler_on(&self) -> u32;
    fn cooler_off(&self) -> u32;
    fn get_status(&self) -> (u32, i32);
    fn abort_acquisition(&self) -> u32;
    fn get_detector(&self) -> (u32, i32, i32);
    fn get_head_model(&self) -> (u32, String);
    fn get_controller_card_model(&self) -> (u32, String);
    fn get_camera_serial_number(&self) -> (u32, i32);
    fn set_exposure_time(&self, seconds: f32) -> u32;
    fn set_read_mode(&self, mode: i32) -> u32;
    fn set_acquisition_mode(&self, mode: i32) -> u32;
    #[allow(clippy::too_many_arguments)]
    fn set_image(
        &self,
        hbin: i32,
        vbin: i32,
        hstart: i32,
        hend: i32,
        vstart: i32,
        vend: i32,
    ) -> u32;
    fn set_number_accumulations(&self, count: i32) -> u32;
    fn set_shutter(&self, kind: i32, mode: i32, closing_ms: i32, opening_ms: i32) -> u32;
    fn start_acquisition(&self) -> u32;
    fn wait_for_acquisition_timeout(&self, timeout_ms: i32) -> u32;
    fn get_acquired_data(&self, buffer: &mut [i32]) -> u32;
    fn get_most_recent_image(&self, buffer: &mut [i32]) -> u32;
}

fn check(call: &'static str, code: u32) -> Result<(), DeviceError> {
    if code == DRV_SUCCESS {
        Ok(())
    } else {
        Err(DeviceError::Sdk { call, code })
    }
}

fn to_i32(value: usize, what: &str) -> Result<i32, DeviceError> {
    i32::try_from(value)
        .map_err(|_| DeviceError::InvalidSettings(format!("{} {} is out of range", what, value)))
}

/// Andor camera driven through the SDK2 C API
pub struct AndorSdk2Camera {
    api: Box<dyn AndorApi>,
    detector: (usize, usize),
    settings: AcquisitionSettings,
    setpoint: Option<f64>,
    /// Last temperature the SDK reported outside an acquisition
    last_temperature: Option<f64>,
    acquisition: Option<AcquisitionMode>,
    open: bool,
}

impl AndorSdk2Camera {
    /// Load the SDK and initialize the first camera
    pub fn open(config: &CameraConfig) -> Result<Self, DeviceError> {
        #[cfg(feature = "andor-sdk")]
        {
            let api = library::AndorLibrary::load(config.sdk_path.as_deref())
                .map_err(|e| DeviceError::connection(DEVICE_NAME, e.to_string()))?;
            Self::with_api(Box::new(api), config.sdk_path.as_deref().unwrap_or(""))
        }
        #[cfg(not(feature = "andor-sdk"))]
        {
            warn!(
                "Andor SDK2 requested (sdk_path: {:?}) but the andor-sdk feature is disabled",
                config.sdk_path
            );
            Err(DeviceError::connection(
                DEVICE_NAME,
                "built without the andor-sdk feature",
            ))
        }
    }

    /// Initialize a camera over an already bound API
    pub fn with_api(api: Box<dyn AndorApi>, init_directory: &str) -> Result<Self, DeviceError> {
        let code = api.initialize(init_directory);
        if code != DRV_SUCCESS {
            return Err(DeviceError::connection(
                DEVICE_NAME,
                format!("Initialize returned {}", code),
            ));
        }

        let (code, width, height) = api.get_detector();
        check("GetDetector", code)?;
        let detector = (width.max(0) as usize, height.max(0) as usize);

        let mut camera = Self {
            api,
            detector,
            settings: AcquisitionSettings::default(),
            setpoint: None,
            last_temperature: None,
            acquisition: None,
            open: true,
        };
        let defaults = camera.settings.clone();
        camera.apply_settings(&defaults)?;
        info!(
            "Andor camera initialized, detector {}x{}",
            detector.0, detector.1
        );
        Ok(camera)
    }

    fn ensure_open(&self) -> Result<(), DeviceError> {
        if self.open {
            Ok(())
        } else {
            Err(DeviceError::NotConnected)
        }
    }

    fn frame_buffer(&self) -> (usize, usize, Vec<i32>) {
        let (rows, columns) = self.settings.frame_shape(self.detector);
        (rows, columns, vec![0; rows * columns])
    }

    fn into_frame(rows: usize, columns: usize, data: Vec<i32>) -> Result<Frame, DeviceError> {
        let pixels = data.into_iter().map(|v| v.max(0) as u32).collect();
        Array2::from_shape_vec((rows, columns), pixels)
            .map_err(|e| DeviceError::InvalidSettings(format!("frame shape: {}", e)))
    }

    fn read_temperature(&mut self) -> Result<(f64, TemperatureStatus), DeviceError> {
        let (code, celsius) = self.api.get_temperature_f();
        let status = match code {
            // no fresh reading while acquiring
            DRV_ACQUIRING => {
                return match self.last_temperature {
                    Some(last) => Ok((last, TemperatureStatus::Unknown)),
                    None => Err(DeviceError::Sdk {
                        call: "GetTemperatureF",
                        code,
                    }),
                }
            }
            DRV_TEMPERATURE_OFF => TemperatureStatus::Off,
            DRV_TEMPERATURE_NOT_STABILIZED | DRV_TEMPERATURE_NOT_REACHED => {
                TemperatureStatus::Stabilizing
            }
            DRV_TEMPERATURE_STABILIZED => TemperatureStatus::Stabilized,
            DRV_TEMPERATURE_DRIFT => TemperatureStatus::Drifted,
            code => {
                return Err(DeviceError::Sdk {
                    call: "GetTemperatureF",
                    code,
                })
            }
        };
        let celsius = f64::from(celsius);
        self.last_temperature = Some(celsius);
        Ok((celsius, status))
    }
}

impl ThermalDevice for AndorSdk2Camera {
    fn set_cooler(&mut self, enabled: bool, setpoint: Option<f64>) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if enabled {
            if let Some(target) = setpoint {
                check("SetTemperature", self.api.set_temperature(target.round() as i32))?;
                self.setpoint = Some(target);
            }
            check("CoolerON", self.api.cooler_on())
        } else {
            check("CoolerOFF", self.api.cooler_off())
        }
    }

    fn get_temperature(&mut self) -> Result<f64, DeviceError> {
        self.ensure_open()?;
        self.read_temperature().map(|(t, _)| t)
    }

    fn get_temperature_status(&mut self) -> Result<TemperatureStatus, DeviceError> {
        self.ensure_open()?;
        self.read_temperature().map(|(_, status)| status)
    }

    fn get_temperature_setpoint(&mut self) -> Result<Option<f64>, DeviceError> {
        self.ensure_open()?;
        Ok(self.setpoint)
    }

    fn acquisition_in_progress(&mut self) -> Result<bool, DeviceError> {
        self.ensure_open()?;
        let (code, status) = self.api.get_status();
        check("GetStatus", code)?;
        Ok(status as u32 == DRV_ACQUIRING)
    }

    fn stop_acquisition(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.acquisition = None;
        if self.acquisition_in_progress()? {
            check("AbortAcquisition", self.api.abort_acquisition())?;
            debug!("Andor acquisition aborted");
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.open = false;
        self.acquisition = None;
        check("ShutDown", self.api.shut_down())?;
        info!("Andor camera shut down");
        Ok(())
    }
}

impl CameraDriver for AndorSdk2Camera {
    fn device_info(&mut self) -> Result<CameraInfo, DeviceError> {
        self.ensure_open()?;
        let (code, controller_model) = self.api.get_controller_card_model();
        check("GetControllerCardModel", code)?;
        let (code, head_model) = self.api.get_head_model();
        check("GetHeadModel", code)?;
        let (code, serial) = self.api.get_camera_serial_number();
        check("GetCameraSerialNumber", code)?;
        Ok(CameraInfo {
            controller_model,
            head_model,
            serial_number: serial.to_string(),
        })
    }

    fn detector_size(&mut self) -> Result<(usize, usize), DeviceError> {
        self.ensure_open()?;
        Ok(self.detector)
    }

    fn apply_settings(&mut self, settings: &AcquisitionSettings) -> Result<(), DeviceError> {
        self.ensure_open()?;
        settings.validate(self.detector)?;
        let region = settings.region(self.detector);

        check(
            "SetShutter",
            self.api.set_shutter(SHUTTER_TTL_HIGH, SHUTTER_AUTO, 0, 0),
        )?;
        check(
            "SetExposureTime",
            self.api.set_exposure_time(settings.exposure_s as f32),
        )?;
        match settings.read_mode {
            ReadMode::Image => {
                check("SetReadMode", self.api.set_read_mode(READ_MODE_IMAGE))?;
                // SDK coordinates are 1-based and inclusive
                check(
                    "SetImage",
                    self.api.set_image(
                        to_i32(settings.hbin, "hbin")?,
                        to_i32(settings.vbin, "vbin")?,
                        to_i32(region.x + 1, "hstart")?,
                        to_i32(region.x_end()?, "hend")?,
                        to_i32(region.y + 1, "vstart")?,
                        to_i32(region.y_end()?, "vend")?,
                    ),
                )?;
            }
            ReadMode::FullVerticalBinning => {
                check("SetReadMode", self.api.set_read_mode(READ_MODE_FVB))?;
            }
        }
        self.settings = settings.clone();
        Ok(())
    }

    fn set_exposure(&mut self, exposure_s: f64) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let settings = AcquisitionSettings {
            exposure_s,
            ..self.settings.clone()
        };
        settings.validate(self.detector)?;
        check("SetExposureTime", self.api.set_exposure_time(exposure_s as f32))?;
        self.settings = settings;
        Ok(())
    }

    fn start_acquisition(&mut self, mode: AcquisitionMode) -> Result<(), DeviceError> {
        self.ensure_open()?;
        match mode {
            AcquisitionMode::Single => {
                check("SetAcquisitionMode", self.api.set_acquisition_mode(ACQ_MODE_SINGLE))?;
            }
            AcquisitionMode::Accumulate { count } => {
                let count = i32::try_from(count).unwrap_or(i32::MAX);
                check(
                    "SetAcquisitionMode",
                    self.api.set_acquisition_mode(ACQ_MODE_ACCUMULATE),
                )?;
                check(
                    "SetNumberAccumulations",
                    self.api.set_number_accumulations(count),
                )?;
            }
            AcquisitionMode::RunTillAbort { .. } => {
                check(
                    "SetAcquisitionMode",
                    self.api.set_acquisition_mode(ACQ_MODE_RUN_TILL_ABORT),
                )?;
            }
            AcquisitionMode::Kinetic => {
                return Err(DeviceError::Unsupported(
                    "kinetic series acquisition".into(),
                ))
            }
        }
        check("StartAcquisition", self.api.start_acquisition())?;
        self.acquisition = Some(mode);
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<Frame, DeviceError> {
        self.ensure_open()?;
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let code = self.api.wait_for_acquisition_timeout(timeout_ms);
        if code == DRV_NO_NEW_DATA {
            return Err(DeviceError::Timeout(format!(
                "frame not ready after {:?}",
                timeout
            )));
        }
        check("WaitForAcquisitionTimeOut", code)?;

        let (rows, columns, mut buffer) = self.frame_buffer();
        match self.acquisition {
            Some(mode) if mode.is_continuous() => {
                check(
                    "GetMostRecentImage",
                    self.api.get_most_recent_image(&mut buffer),
                )?;
            }
            _ => {
                check("GetAcquiredData", self.api.get_acquired_data(&mut buffer))?;
                self.acquisition = None;
            }
        }
        Self::into_frame(rows, columns, buffer)
    }

    fn read_newest_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        self.ensure_open()?;
        if !self.acquisition.is_some_and(|mode| mode.is_continuous()) {
            return Ok(None);
        }
        let (rows, columns, mut buffer) = self.frame_buffer();
        match self.api.get_most_recent_image(&mut buffer) {
            DRV_NO_NEW_DATA => Ok(None),
            code => {
                check("GetMostRecentImage", code)?;
                Self::into_frame(rows, columns, buffer).map(Some)
            }
        }
    }

    fn parameters(&mut self) -> Result<CameraParameters, DeviceError> {
        self.ensure_open()?;
        let info = self.device_info()?;
        let mut params = BTreeMap::new();
        params.insert("controller_model".into(), info.controller_model);
        params.insert("head_model".into(), info.head_model);
        params.insert("serial_number".into(), info.serial_number);
        params.insert(
            "detector_size".into(),
            format!("{}x{}", self.detector.0, self.detector.1),
        );
        match self.read_temperature() {
            Ok((t, status)) => {
                params.insert("temperature_c".into(), format!("{:.2}", t));
                params.insert("temperature_status".into(), status.to_string());
            }
            Err(e) => {
                warn!("Could not read temperature for parameter dump: {}", e);
            }
        }
        params.insert(
            "temperature_setpoint_c".into(),
            self.setpoint
                .map_or_else(|| "none".to_string(), |s| format!("{:.1}", s)),
        );
        let (code, status) = self.api.get_status();
        if code == DRV_SUCCESS {
            params.insert("status".into(), status.to_string());
        }
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
            self.settings.region(self.detector).to_string(),
        );
        Ok(params)
    }
}

#[cfg(feature = "andor-sdk")]
mod library {
    //! Runtime binding of the Andor SDK2 shared library

    use std::ffi::{c_char, c_float, c_int, c_uint, CStr, CString};

    use libloading::Library;

    use super::AndorApi;

    #[cfg(windows)]
    const LIBRARY_NAME: &str = "atmcd64d.dll";
    #[cfg(not(windows))]
    const LIBRARY_NAME: &str = "libandor.so";

    const TEXT_BUFFER: usize = 256;
    const DRV_P1INVALID: c_uint = 20066;

    type NoArgs = unsafe extern "system" fn() -> c_uint;
    type IntArg = unsafe extern "system" fn(c_int) -> c_uint;
    type FloatArg = unsafe extern "system" fn(c_float) -> c_uint;
    type IntOut = unsafe extern "system" fn(*mut c_int) -> c_uint;
    type FloatOut = unsafe extern "system" fn(*mut c_float) -> c_uint;
    type TextOut = unsafe extern "system" fn(*mut c_char) -> c_uint;
    type TwoIntOut = unsafe extern "system" fn(*mut c_int, *mut c_int) -> c_uint;
    type TextArg = unsafe extern "system" fn(*const c_char) -> c_uint;
    type SixInts =
        unsafe extern "system" fn(c_int, c_int, c_int, c_int, c_int, c_int) -> c_uint;
    type FourInts = unsafe extern "system" fn(c_int, c_int, c_int, c_int) -> c_uint;
    type BufferOut = unsafe extern "system" fn(*mut c_int, c_uint) -> c_uint;

    macro_rules! resolve {
        ($lib:expr, $name:literal, $ty:ty) => {{
            // SAFETY: the symbol type matches the SDK2 header declaration
            let symbol = unsafe { $lib.get::<$ty>(concat!($name, "\0").as_bytes()) }
                .map_err(|e| format!("missing symbol {}: {}", $name, e))?;
            *symbol
        }};
    }

    /// Function table resolved from the vendor library
    pub struct AndorLibrary {
        initialize: TextArg,
        shut_down: NoArgs,
        get_temperature_f: FloatOut,
        set_temperature: IntArg,
        cooler_on: NoArgs,
        cooler_off: NoArgs,
        get_status: IntOut,
        abort_acquisition: NoArgs,
        get_detector: TwoIntOut,
        get_head_model: TextOut,
        get_controller_card_model: TextOut,
        get_camera_serial_number: IntOut,
        set_exposure_time: FloatArg,
        set_read_mode: IntArg,
        set_acquisition_mode: IntArg,
        set_image: SixInts,
        set_number_accumulations: IntArg,
        set_shutter: FourInts,
        start_acquisition: NoArgs,
        wait_for_acquisition_timeout: IntArg,
        get_acquired_data: BufferOut,
        get_most_recent_image: BufferOut,
        // keeps the function pointers above valid
        _library: Library,
    }

    impl AndorLibrary {
        pub fn load(sdk_path: Option<&str>) -> Result<Self, String> {
            let path = match sdk_path {
                Some(dir) => std::path::Path::new(dir).join(LIBRARY_NAME),
                None => std::path::PathBuf::from(LIBRARY_NAME),
            };
            // SAFETY: loading the vendor library runs its initializers, which have no preconditions
            let library = unsafe { Library::new(&path) }
                .map_err(|e| format!("cannot load {}: {}", path.display(), e))?;

            Ok(Self {
                initialize: resolve!(library, "Initialize", TextArg),
                shut_down: resolve!(library, "ShutDown", NoArgs),
                get_temperature_f: resolve!(library, "GetTemperatureF", FloatOut),
                set_temperature: resolve!(library, "SetTemperature", IntArg),
                cooler_on: resolve!(library, "CoolerON", NoArgs),
                cooler_off: resolve!(library, "CoolerOFF", NoArgs),
                get_status: resolve!(library, "GetStatus", IntOut),
                abort_acquisition: resolve!(library, "AbortAcquisition", NoArgs),
                get_detector: resolve!(library, "GetDetector", TwoIntOut),
                get_head_model: resolve!(library, "GetHeadModel", TextOut),
                get_controller_card_model: resolve!(library, "GetControllerCardModel", TextOut),
                get_camera_serial_number: resolve!(library, "GetCameraSerialNumber", IntOut),
                set_exposure_time: resolve!(library, "SetExposureTime", FloatArg),
                set_read_mode: resolve!(library, "SetReadMode", IntArg),
                set_acquisition_mode: resolve!(library, "SetAcquisitionMode", IntArg),
                set_image: resolve!(library, "SetImage", SixInts),
                set_number_accumulations: resolve!(library, "SetNumberAccumulations", IntArg),
                set_shutter: resolve!(library, "SetShutter", FourInts),
                start_acquisition: resolve!(library, "StartAcquisition", NoArgs),
                wait_for_acquisition_timeout: resolve!(
                    library,
                    "WaitForAcquisitionTimeOut",
                    IntArg
                ),
                get_acquired_data: resolve!(library, "GetAcquiredData", BufferOut),
                get_most_recent_image: resolve!(library, "GetMostRecentImage", BufferOut),
                _library: library,
            })
        }

        fn text(f: TextOut) -> (u32, String) {
            let mut buffer = [0 as c_char; TEXT_BUFFER];
            // SAFETY: the SDK writes a NUL-terminated string shorter than TEXT_BUFFER
            let code = unsafe { f(buffer.as_mut_ptr()) };
            let text = unsafe { CStr::from_ptr(buffer.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            (code, text)
        }

        fn buffer(f: BufferOut, buffer: &mut [i32]) -> u32 {
            let size = c_uint::try_from(buffer.len()).unwrap_or(c_uint::MAX);
            // SAFETY: `size` never exceeds the buffer length; at_32 is 32 bits on every SDK2 target
            unsafe { f(buffer.as_mut_ptr(), size) }
        }
    }

    impl AndorApi for AndorLibrary {
        fn initialize(&self, directory: &str) -> u32 {
            let Ok(directory) = CString::new(directory) else {
                return DRV_P1INVALID;
            };
            unsafe { (self.initialize)(directory.as_ptr()) }
        }

        fn shut_down(&self) -> u32 {
            unsafe { (self.shut_down)() }
        }

        fn get_temperature_f(&self) -> (u32, f32) {
            let mut celsius: c_float = 0.0;
            let code = unsafe { (self.get_temperature_f)(&mut celsius) };
            (code, celsius)
        }

        fn set_temperature(&self, celsius: i32) -> u32 {
            unsafe { (self.set_temperature)(celsius) }
        }

        fn cooler_on(&self) -> u32 {
            unsafe { (self.cooler_on)() }
        }

        fn cooler_off(&self) -> u32 {
            unsafe { (self.cooler_off)() }
        }

        fn get_status(&self) -> (u32, i32) {
            let mut status: c_int = 0;
            let code = unsafe { (self.get_status)(&mut status) };
            (code, status)
        }

        fn abort_acquisition(&self) -> u32 {
            unsafe { (self.abort_acquisition)() }
        }

        fn get_detector(&self) -> (u32, i32, i32) {
            let (mut width, mut height): (c_int, c_int) = (0, 0);
            let code = unsafe { (self.get_detector)(&mut width, &mut height) };
            (code, width, height)
        }

        fn get_head_model(&self) -> (u32, String) {
            Self::text(self.get_head_model)
        }

        fn get_controller_card_model(&self) -> (u32, String) {
            Self::text(self.get_controller_card_model)
        }

        fn get_camera_serial_number(&self) -> (u32, i32) {
            let mut serial: c_int = 0;
            let code = unsafe { (self.get_camera_serial_number)(&mut serial) };
            (code, serial)
        }

        fn set_exposure_time(&self, seconds: f32) -> u32 {
            unsafe { (self.set_exposure_time)(seconds) }
        }

        fn set_read_mode(&self, mode: i32) -> u32 {
            unsafe { (self.set_read_mode)(mode) }
        }

        fn set_acquisition_mode(&self, mode: i32) -> u32 {
            unsafe { (self.set_acquisition_mode)(mode) }
        }

        fn set_image(
            &self,
            hbin: i32,
            vbin: i32,
            hstart: i32,
            hend: i32,
            vstart: i32,
            vend: i32,
        ) -> u32 {
            unsafe { (self.set_image)(hbin, vbin, hstart, hend, vstart, vend) }
        }

        fn set_number_accumulations(&self, count: i32) -> u32 {
            unsafe { (self.set_number_accumulations)(count) }
        }

        fn set_shutter(&self, kind: i32, mode: i32, closing_ms: i32, opening_ms: i32) -> u32 {
            unsafe { (self.set_shutter)(kind, mode, closing_ms, opening_ms) }
        }

        fn start_acquisition(&self) -> u32 {
            unsafe { (self.start_acquisition)() }
        }

        fn wait_for_acquisition_timeout(&self, timeout_ms: i32) -> u32 {
            unsafe { (self.wait_for_acquisition_timeout)(timeout_ms) }
        }

        fn get_acquired_data(&self, buffer: &mut [i32]) -> u32 {
            Self::buffer(self.get_acquired_data, buffer)
        }

        fn get_most_recent_image(&self, buffer: &mut [i32]) -> u32 {
            Self::buffer(self.get_most_recent_image, buffer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records calls and answers like a 64x16 camera
    #[derive(Default)]
    struct FakeState {
        calls: Vec<String>,
        temperature: (u32, f32),
        status: i32,
        newest_image_code: u32,
    }

    #[derive(Clone)]
    struct FakeApi(Arc<Mutex<FakeState>>);

    impl FakeApi {
        fn new() -> Self {
            Self(Arc::new(Mutex::new(FakeState {
                temperature: (DRV_TEMPERATURE_OFF, 19.5),
                status: 20073,
                newest_image_code: DRV_SUCCESS,
                ..FakeState::default()
            })))
        }

        fn record(&self, call: String) -> u32 {
            self.0.lock().unwrap().calls.push(call);
            DRV_SUCCESS
        }

        fn calls(&self) -> Vec<String> {
            self.0.lock().unwrap().calls.clone()
        }
    }

    impl AndorApi for FakeApi {
        fn initialize(&self, directory: &str) -> u32 {
            self.record(format!("Initialize({})", directory))
        }
        fn shut_down(&self) -> u32 {
            self.record("ShutDown".into())
        }
        fn get_temperature_f(&self) -> (u32, f32) {
            self.0.lock().unwrap().temperature
        }
        fn set_temperature(&self, celsius: i32) -> u32 {
            self.record(format!("SetTemperature({})", celsius))
        }
        fn cooler_on(&self) -> u32 {
            self.record("CoolerON".into())
        }
        fn cooler_off(&self) -> u32 {
            self.record("CoolerOFF".into())
        }
        fn get_status(&self) -> (u32, i32) {
            (DRV_SUCCESS, self.0.lock().unwrap().status)
        }
        fn abort_acquisition(&self) -> u32 {
            self.record("AbortAcquisition".into())
        }
        fn get_detector(&self) -> (u32, i32, i32) {
            (DRV_SUCCESS, 64, 16)
        }
        fn get_head_model(&self) -> (u32, String) {
            (DRV_SUCCESS, "DU420_BEX2_DD".into())
        }
        fn get_controller_card_model(&self) -> (u32, String) {
            (DRV_SUCCESS, "USB".into())
        }
        fn get_camera_serial_number(&self) -> (u32, i32) {
            (DRV_SUCCESS, 12345)
        }
        fn set_exposure_time(&self, seconds: f32) -> u32 {
            self.record(format!("SetExposureTime({})", seconds))
        }
        fn set_read_mode(&self, mode: i32) -> u32 {
            self.record(format!("SetReadMode({})", mode))
        }
        fn set_acquisition_mode(&self, mode: i32) -> u32 {
            self.record(format!("SetAcquisitionMode({})", mode))
        }
        fn set_image(
            &self,
            hbin: i32,
            vbin: i32,
            hstart: i32,
            hend: i32,
            vstart: i32,
            vend: i32,
        ) -> u32 {
            self.record(format!(
                "SetImage({},{},{},{},{},{})",
                hbin, vbin, hstart, hend, vstart, vend
            ))
        }
        fn set_number_accumulations(&self, count: i32) -> u32 {
            self.record(format!("SetNumberAccumulations({})", count))
        }
        fn set_shutter(&self, kind: i32, mode: i32, closing_ms: i32, opening_ms: i32) -> u32 {
            self.record(format!(
                "SetShutter({},{},{},{})",
                kind, mode, closing_ms, opening_ms
            ))
        }
        fn start_acquisition(&self) -> u32 {
            self.record("StartAcquisition".into())
        }
        fn wait_for_acquisition_timeout(&self, _timeout_ms: i32) -> u32 {
            DRV_SUCCESS
        }
        fn get_acquired_data(&self, buffer: &mut [i32]) -> u32 {
            for (i, value) in buffer.iter_mut().enumerate() {
                *value = i as i32;
            }
            DRV_SUCCESS
        }
        fn get_most_recent_image(&self, buffer: &mut [i32]) -> u32 {
            buffer.fill(7);
            self.0.lock().unwrap().newest_image_code
        }
    }

    fn camera() -> (AndorSdk2Camera, FakeApi) {
        let api = FakeApi::new();
        let camera = AndorSdk2Camera::with_api(Box::new(api.clone()), "/opt/andor").unwrap();
        (camera, api)
    }

    #[test]
    fn test_initialization_applies_full_frame_defaults() {
        let (mut camera, api) = camera();
        assert_eq!(camera.detector_size().unwrap(), (64, 16));
        let calls = api.calls();
        assert_eq!(calls[0], "Initialize(/opt/andor)");
        assert!(calls.contains(&"SetReadMode(4)".to_string()));
        assert!(calls.contains(&"SetImage(1,1,1,64,1,16)".to_string()));
    }

    #[test]
    fn test_temperature_status_codes() {
        let (mut camera, api) = camera();
        assert_eq!(
            camera.get_temperature_status().unwrap(),
            TemperatureStatus::Off
        );

        api.0.lock().unwrap().temperature = (DRV_TEMPERATURE_STABILIZED, -80.0);
        assert_eq!(camera.get_temperature().unwrap(), -80.0);
        assert_eq!(
            camera.get_temperature_status().unwrap(),
            TemperatureStatus::Stabilized
        );

        api.0.lock().unwrap().temperature = (DRV_ACQUIRING, 0.0);
        assert_eq!(camera.get_temperature().unwrap(), -80.0);
        assert_eq!(
            camera.get_temperature_status().unwrap(),
            TemperatureStatus::Unknown
        );

        api.0.lock().unwrap().temperature = (20013, 0.0);
        assert!(matches!(
            camera.get_temperature(),
            Err(DeviceError::Sdk {
                call: "GetTemperatureF",
                code: 20013
            })
        ));
    }

    #[test]
    fn test_cooler_commands() {
        let (mut camera, api) = camera();
        camera.set_cooler(true, Some(-79.6)).unwrap();
        camera.set_cooler(false, None).unwrap();
        let calls = api.calls();
        assert!(calls.ends_with(&[
            "SetTemperature(-80)".to_string(),
            "CoolerON".to_string(),
            "CoolerOFF".to_string()
        ]));
        assert_eq!(camera.get_temperature_setpoint().unwrap(), Some(-79.6));
    }

    #[test]
    fn test_single_frame_uses_binned_shape() {
        let (mut camera, _api) = camera();
        camera
            .apply_settings(&AcquisitionSettings {
                hbin: 2,
                vbin: 4,
                ..AcquisitionSettings::default()
            })
            .unwrap();
        camera.start_acquisition(AcquisitionMode::Single).unwrap();
        let frame = camera.wait_for_frame(Duration::from_secs(1)).unwrap();
        assert_eq!(frame.dim(), (4, 32));
        assert_eq!(frame[[1, 0]], 32);
    }

    #[test]
    fn test_newest_frame_only_while_continuous() {
        let (mut camera, api) = camera();
        assert!(camera.read_newest_frame().unwrap().is_none());

        camera
            .start_acquisition(AcquisitionMode::RunTillAbort { max_frames: None })
            .unwrap();
        assert!(api.calls().contains(&"SetAcquisitionMode(5)".to_string()));
        assert!(camera.read_newest_frame().unwrap().is_some());

        api.0.lock().unwrap().newest_image_code = DRV_NO_NEW_DATA;
        assert!(camera.read_newest_frame().unwrap().is_none());
    }

    #[test]
    fn test_acquiring_before_any_reading_is_an_error() {
        let (mut camera, api) = camera();
        api.0.lock().unwrap().temperature = (DRV_ACQUIRING, 0.0);
        assert!(matches!(
            camera.get_temperature(),
            Err(DeviceError::Sdk {
                call: "GetTemperatureF",
                code: DRV_ACQUIRING
            })
        ));
    }

    #[test]
    fn test_abort_only_when_acquiring() {
        let (mut camera, api) = camera();
        camera.stop_acquisition().unwrap();
        assert!(!api.calls().contains(&"AbortAcquisition".to_string()));

        api.0.lock().unwrap().status = DRV_ACQUIRING as i32;
        assert!(camera.acquisition_in_progress().unwrap());
        camera.stop_acquisition().unwrap();
        assert!(api.calls().contains(&"AbortAcquisition".to_string()));
    }

    #[test]
    fn test_kinetic_unsupported_and_closed_camera() {
        let (mut camera, _api) = camera();
        assert!(matches!(
            camera.start_acquisition(AcquisitionMode::Kinetic),
            Err(DeviceError::Unsupported(_))
        ));
        camera.close().unwrap();
        assert!(matches!(
            camera.device_info(),
            Err(DeviceError::NotConnected)
        ));
    }
}
