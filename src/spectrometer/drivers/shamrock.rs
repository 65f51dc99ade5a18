// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Andor Shamrock spectrograph driver
//!
//! Same structure as the camera driver: [`ShamrockApi`] mirrors the
//! ShamrockCIF entry points and returns raw status codes. The C API works in
//! nanometers for wavelengths and micrometers for slit widths; this driver
//! converts to and from meters.

use log::{debug, info, warn};

use crate::config::SpectrometerConfig;
use crate::error::DeviceError;
use crate::spectrometer::{Slit, SpectrographDriver, SpectrographInfo};

const DEVICE_NAME: &str = "Andor Shamrock";

pub const SHAMROCK_SUCCESS: u32 = 20202;

const NM_PER_M: f64 = 1e9;
const UM_PER_M: f64 = 1e6;

/// Entry points of the ShamrockCIF library used by the driver
pub trait ShamrockApi: Send {
    fn initialize(&self, directory: &str) -> u32;
    fn close(&self) -> u32;
    fn get_number_devices(&self) -> (u32, i32);
    fn get_serial_number(&self, device: i32) -> (u32, String);
    fn set_wavelength(&self, device: i32, nm: f32) -> u32;
    fn get_wavelength(&self, device: i32) -> (u32, f32);
    fn set_grating(&self, device: i32, grating: i32) -> u32;
    fn get_grating(&self, device: i32) -> (u32, i32);
    fn get_number_gratings(&self, device: i32) -> (u32, i32);
    fn get_wavelength_limits(&self, device: i32, grating: i32) -> (u32, f32, f32);
    fn auto_slit_is_present(&self, device: i32, index: i32) -> (u32, i32);
    fn set_auto_slit_width(&self, device: i32, index: i32, um: f32) -> u32;
    fn get_auto_slit_width(&self, device: i32, index: i32) -> (u32, f32);
}

fn check(call: &'static str, code: u32) -> Result<(), DeviceError> {
    if code == SHAMROCK_SUCCESS {
        Ok(())
    } else {
        Err(DeviceError::Sdk { call, code })
    }
}

fn grating_arg(grating: u32) -> Result<i32, DeviceError> {
    i32::try_from(grating)
        .map_err(|_| DeviceError::InvalidSettings(format!("grating {} is out of range", grating)))
}

/// Shamrock spectrograph driven through ShamrockCIF
pub struct ShamrockSpectrograph {
    api: Box<dyn ShamrockApi>,
    device: i32,
    open: bool,
}

impl ShamrockSpectrograph {
    /// Load ShamrockCIF and attach to the configured device
    pub fn open(config: &SpectrometerConfig) -> Result<Self, DeviceError> {
        #[cfg(feature = "andor-sdk")]
        {
            let api = library::ShamrockLibrary::load(config.sdk_path.as_deref())
                .map_err(|e| DeviceError::connection(DEVICE_NAME, e))?;
            Self::with_api(
                Box::new(api),
                config.sdk_path.as_deref().unwrap_or(""),
                config.device_index,
            )
        }
        #[cfg(not(feature = "andor-sdk"))]
        {
            warn!(
                "Shamrock requested (sdk_path: {:?}) but the andor-sdk feature is disabled",
                config.sdk_path
            );
            Err(DeviceError::connection(
                DEVICE_NAME,
                "built without the andor-sdk feature",
            ))
        }
    }

    /// Initialize over an already bound API
    pub fn with_api(
        api: Box<dyn ShamrockApi>,
        init_directory: &str,
        device_index: u32,
    ) -> Result<Self, DeviceError> {
        let code = api.initialize(init_directory);
        if code != SHAMROCK_SUCCESS {
            return Err(DeviceError::connection(
                DEVICE_NAME,
                format!("ShamrockInitialize returned {}", code),
            ));
        }
        let (code, count) = api.get_number_devices();
        let device = i32::try_from(device_index).unwrap_or(i32::MAX);
        if code != SHAMROCK_SUCCESS || device >= count {
            if api.close() != SHAMROCK_SUCCESS {
                warn!("ShamrockClose failed after a failed connection");
            }
            return Err(DeviceError::connection(
                DEVICE_NAME,
                format!("device {} not found ({} attached)", device_index, count.max(0)),
            ));
        }
        info!("Shamrock {} initialized ({} attached)", device, count);
        Ok(Self {
            api,
            device,
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

    fn slit_present(&self, slit: Slit) -> Result<bool, DeviceError> {
        let (code, present) = self
            .api
            .auto_slit_is_present(self.device, slit.index() as i32);
        check("ShamrockAutoSlitIsPresent", code)?;
        Ok(present != 0)
    }
}

impl SpectrographDriver for ShamrockSpectrograph {
    fn device_info(&mut self) -> Result<SpectrographInfo, DeviceError> {
        self.ensure_open()?;
        let (code, serial_number) = self.api.get_serial_number(self.device);
        check("ShamrockGetSerialNumber", code)?;
        Ok(SpectrographInfo {
            model: DEVICE_NAME.to_string(),
            serial_number,
        })
    }

    fn set_wavelength(&mut self, wavelength_m: f64) -> Result<(), DeviceError> {
        self.ensure_open()?;
        let nm = (wavelength_m * NM_PER_M) as f32;
        check("ShamrockSetWavelength", self.api.set_wavelength(self.device, nm))?;
        debug!("Shamrock wavelength set to {} nm", nm);
        Ok(())
    }

    fn wavelength(&mut self) -> Result<f64, DeviceError> {
        self.ensure_open()?;
        let (code, nm) = self.api.get_wavelength(self.device);
        check("ShamrockGetWavelength", code)?;
        Ok(f64::from(nm) / NM_PER_M)
    }

    fn set_grating(&mut self, grating: u32) -> Result<(), DeviceError> {
        self.ensure_open()?;
        check(
            "ShamrockSetGrating",
            self.api.set_grating(self.device, grating_arg(grating)?),
        )
    }

    fn grating(&mut self) -> Result<u32, DeviceError> {
        self.ensure_open()?;
        let (code, grating) = self.api.get_grating(self.device);
        check("ShamrockGetGrating", code)?;
        Ok(grating.max(0) as u32)
    }

    fn grating_count(&mut self) -> Result<u32, DeviceError> {
        self.ensure_open()?;
        let (code, count) = self.api.get_number_gratings(self.device);
        check("ShamrockGetNumberGratings", code)?;
        Ok(count.max(0) as u32)
    }

    fn wavelength_limits(&mut self, grating: u32) -> Result<(f64, f64), DeviceError> {
        self.ensure_open()?;
        let (code, min, max) = self
            .api
            .get_wavelength_limits(self.device, grating_arg(grating)?);
        check("ShamrockGetWavelengthLimits", code)?;
        Ok((f64::from(min) / NM_PER_M, f64::from(max) / NM_PER_M))
    }

    fn set_slit_width(&mut self, slit: Slit, width_m: f64) -> Result<(), DeviceError> {
        self.ensure_open()?;
        if !self.slit_present(slit)? {
            return Err(DeviceError::Unsupported(format!("{} slit not fitted", slit)));
        }
        let um = (width_m * UM_PER_M) as f32;
        check(
            "ShamrockSetAutoSlitWidth",
            self.api
                .set_auto_slit_width(self.device, slit.index() as i32, um),
        )
    }

    fn slit_width(&mut self, slit: Slit) -> Result<Option<f64>, DeviceError> {
        self.ensure_open()?;
        if !self.slit_present(slit)? {
            return Ok(None);
        }
        let (code, um) = self
            .api
            .get_auto_slit_width(self.device, slit.index() as i32);
        check("ShamrockGetAutoSlitWidth", code)?;
        Ok(Some(f64::from(um) / UM_PER_M))
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.ensure_open()?;
        self.open = false;
        check("ShamrockClose", self.api.close())?;
        info!("Shamrock closed");
        Ok(())
    }
}

#[cfg(feature = "andor-sdk")]
mod library {
    //! Runtime binding of the ShamrockCIF shared library

    use std::ffi::{c_char, c_float, c_int, c_uint, CStr, CString};

    use libloading::Library;

    use super::ShamrockApi;

    #[cfg(windows)]
    const LIBRARY_NAME: &str = "ShamrockCIF.dll";
    #[cfg(not(windows))]
    const LIBRARY_NAME: &str = "libshamrockcif.so";

    const SERIAL_BUFFER: usize = 64;
    const SHAMROCK_P1INVALID: c_uint = 20266;

    type TextArg = unsafe extern "system" fn(*const c_char) -> c_uint;
    type NoArgs = unsafe extern "system" fn() -> c_uint;
    type IntOut = unsafe extern "system" fn(*mut c_int) -> c_uint;
    type DevTextOut = unsafe extern "system" fn(c_int, *mut c_char) -> c_uint;
    type DevFloat = unsafe extern "system" fn(c_int, c_float) -> c_uint;
    type DevFloatOut = unsafe extern "system" fn(c_int, *mut c_float) -> c_uint;
    type DevInt = unsafe extern "system" fn(c_int, c_int) -> c_uint;
    type DevIntOut = unsafe extern "system" fn(c_int, *mut c_int) -> c_uint;
    type DevIntTwoFloatOut =
        unsafe extern "system" fn(c_int, c_int, *mut c_float, *mut c_float) -> c_uint;
    type DevIntIntOut = unsafe extern "system" fn(c_int, c_int, *mut c_int) -> c_uint;
    type DevIntFloat = unsafe extern "system" fn(c_int, c_int, c_float) -> c_uint;
    type DevIntFloatOut = unsafe extern "system" fn(c_int, c_int, *mut c_float) -> c_uint;

    macro_rules! resolve {
        ($lib:expr, $name:literal, $ty:ty) => {{
            // SAFETY: the symbol type matches the ShamrockCIF header declaration
            let symbol = unsafe { $lib.get::<$ty>(concat!($name, "\0").as_bytes()) }
                .map_err(|e| format!("missing symbol {}: {}", $name, e))?;
            *symbol
        }};
    }

    pub struct ShamrockLibrary {
        initialize: TextArg,
        close: NoArgs,
        get_number_devices: IntOut,
        get_serial_number: DevTextOut,
        set_wavelength: DevFloat,
        get_wavelength: DevFloatOut,
        set_grating: DevInt,
        get_grating: DevIntOut,
        get_number_gratings: DevIntOut,
        get_wavelength_limits: DevIntTwoFloatOut,
        auto_slit_is_present: DevIntIntOut,
        set_auto_slit_width: DevIntFloat,
        get_auto_slit_width: DevIntFloatOut,
        _library: Library,
    }

    impl ShamrockLibrary {
        pub fn load(sdk_path: Option<&str>) -> Result<Self, String> {
            let path = match sdk_path {
                Some(dir) => std::path::Path::new(dir).join(LIBRARY_NAME),
                None => std::path::PathBuf::from(LIBRARY_NAME),
            };
            // SAFETY: loading the vendor library runs its initializers, which have no preconditions
            let library = unsafe { Library::new(&path) }
                .map_err(|e| format!("cannot load {}: {}", path.display(), e))?;

            Ok(Self {
                initialize: resolve!(library, "ShamrockInitialize", TextArg),
                close: resolve!(library, "ShamrockClose", NoArgs),
                get_number_devices: resolve!(library, "ShamrockGetNumberDevices", IntOut),
                get_serial_number: resolve!(library, "ShamrockGetSerialNumber", DevTextOut),
                set_wavelength: resolve!(library, "ShamrockSetWavelength", DevFloat),
                get_wavelength: resolve!(library, "ShamrockGetWavelength", DevFloatOut),
                set_grating: resolve!(library, "ShamrockSetGrating", DevInt),
                get_grating: resolve!(library, "ShamrockGetGrating", DevIntOut),
                get_number_gratings: resolve!(library, "ShamrockGetNumberGratings", DevIntOut),
                get_wavelength_limits: resolve!(
                    library,
                    "ShamrockGetWavelengthLimits",
                    DevIntTwoFloatOut
                ),
                auto_slit_is_present: resolve!(library, "ShamrockAutoSlitIsPresent", DevIntIntOut),
                set_auto_slit_width: resolve!(library, "ShamrockSetAutoSlitWidth", DevIntFloat),
                get_auto_slit_width: resolve!(library, "ShamrockGetAutoSlitWidth", DevIntFloatOut),
                _library: library,
            })
        }
    }

    impl ShamrockApi for ShamrockLibrary {
        fn initialize(&self, directory: &str) -> u32 {
            let Ok(directory) = CString::new(directory) else {
                return SHAMROCK_P1INVALID;
            };
            unsafe { (self.initialize)(directory.as_ptr()) }
        }

        fn close(&self) -> u32 {
            unsafe { (self.close)() }
        }

        fn get_number_devices(&self) -> (u32, i32) {
            let mut count: c_int = 0;
            let code = unsafe { (self.get_number_devices)(&mut count) };
            (code, count)
        }

        fn get_serial_number(&self, device: i32) -> (u32, String) {
            let mut buffer = [0 as c_char; SERIAL_BUFFER];
            // SAFETY: serial numbers are NUL-terminated and shorter than SERIAL_BUFFER
            let code = unsafe { (self.get_serial_number)(device, buffer.as_mut_ptr()) };
            let serial = unsafe { CStr::from_ptr(buffer.as_ptr()) }
                .to_string_lossy()
                .into_owned();
            (code, serial)
        }

        fn set_wavelength(&self, device: i32, nm: f32) -> u32 {
            unsafe { (self.set_wavelength)(device, nm) }
        }

        fn get_wavelength(&self, device: i32) -> (u32, f32) {
            let mut nm: c_float = 0.0;
            let code = unsafe { (self.get_wavelength)(device, &mut nm) };
            (code, nm)
        }

        fn set_grating(&self, device: i32, grating: i32) -> u32 {
            unsafe { (self.set_grating)(device, grating) }
        }

        fn get_grating(&self, device: i32) -> (u32, i32) {
            let mut grating: c_int = 0;
            let code = unsafe { (self.get_grating)(device, &mut grating) };
            (code, grating)
        }

        fn get_number_gratings(&self, device: i32) -> (u32, i32) {
            let mut count: c_int = 0;
            let code = unsafe { (self.get_number_gratings)(device, &mut count) };
            (code, count)
        }

        fn get_wavelength_limits(&self, device: i32, grating: i32) -> (u32, f32, f32) {
            let (mut min, mut max): (c_float, c_float) = (0.0, 0.0);
            let code = unsafe { (self.get_wavelength_limits)(device, grating, &mut min, &mut max) };
            (code, min, max)
        }

        fn auto_slit_is_present(&self, device: i32, index: i32) -> (u32, i32) {
            let mut present: c_int = 0;
            let code = unsafe { (self.auto_slit_is_present)(device, index, &mut present) };
            (code, present)
        }

        fn set_auto_slit_width(&self, device: i32, index: i32, um: f32) -> u32 {
            unsafe { (self.set_auto_slit_width)(device, index, um) }
        }

        fn get_auto_slit_width(&self, device: i32, index: i32) -> (u32, f32) {
            let mut um: c_float = 0.0;
            let code = unsafe { (self.get_auto_slit_width)(device, index, &mut um) };
            (code, um)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeState {
        calls: Vec<String>,
        devices: i32,
        grating: i32,
        nm: f32,
    }

    #[derive(Clone)]
    struct FakeApi(Arc<Mutex<FakeState>>);

    impl FakeApi {
        fn new(devices: i32) -> Self {
            Self(Arc::new(Mutex::new(FakeState {
                devices,
                grating: 1,
                ..FakeState::default()
            })))
        }

        fn record(&self, call: String) -> u32 {
            self.0.lock().unwrap().calls.push(call);
            SHAMROCK_SUCCESS
        }

        fn calls(&self) -> Vec<String> {
            self.0.lock().unwrap().calls.clone()
        }
    }

    impl ShamrockApi for FakeApi {
        fn initialize(&self, directory: &str) -> u32 {
            self.record(format!("Initialize({})", directory))
        }
        fn close(&self) -> u32 {
            self.record("Close".into())
        }
        fn get_number_devices(&self) -> (u32, i32) {
            (SHAMROCK_SUCCESS, self.0.lock().unwrap().devices)
        }
        fn get_serial_number(&self, _device: i32) -> (u32, String) {
            (SHAMROCK_SUCCESS, "SR-2269".into())
        }
        fn set_wavelength(&self, device: i32, nm: f32) -> u32 {
            self.0.lock().unwrap().nm = nm;
            self.record(format!("SetWavelength({},{})", device, nm))
        }
        fn get_wavelength(&self, _device: i32) -> (u32, f32) {
            (SHAMROCK_SUCCESS, self.0.lock().unwrap().nm)
        }
        fn set_grating(&self, device: i32, grating: i32) -> u32 {
            self.0.lock().unwrap().grating = grating;
            self.record(format!("SetGrating({},{})", device, grating))
        }
        fn get_grating(&self, _device: i32) -> (u32, i32) {
            (SHAMROCK_SUCCESS, self.0.lock().unwrap().grating)
        }
        fn get_number_gratings(&self, _device: i32) -> (u32, i32) {
            (SHAMROCK_SUCCESS, 2)
        }
        fn get_wavelength_limits(&self, _device: i32, _grating: i32) -> (u32, f32, f32) {
            (SHAMROCK_SUCCESS, 0.0, 1500.0)
        }
        fn auto_slit_is_present(&self, _device: i32, index: i32) -> (u32, i32) {
            (SHAMROCK_SUCCESS, i32::from(index == 1))
        }
        fn set_auto_slit_width(&self, device: i32, index: i32, um: f32) -> u32 {
            self.record(format!("SetAutoSlitWidth({},{},{})", device, index, um))
        }
        fn get_auto_slit_width(&self, _device: i32, _index: i32) -> (u32, f32) {
            (SHAMROCK_SUCCESS, 50.0)
        }
    }

    #[test]
    fn test_missing_device_is_connection_failure() {
        let api = FakeApi::new(0);
        let err = ShamrockSpectrograph::with_api(Box::new(api.clone()), "", 0)
            .err()
            .unwrap();
        assert!(err.is_connection_failure());
        assert_eq!(api.calls().last().map(String::as_str), Some("Close"));
    }

    #[test]
    fn test_units_are_converted() {
        let api = FakeApi::new(1);
        let mut device = ShamrockSpectrograph::with_api(Box::new(api.clone()), "", 0).unwrap();

        device.set_wavelength(500e-9).unwrap();
        device.set_slit_width(Slit::InputSide, 100e-6).unwrap();
        let calls = api.calls();
        assert!(calls.contains(&"SetWavelength(0,500)".to_string()));
        assert!(calls.contains(&"SetAutoSlitWidth(0,1,100)".to_string()));

        let (min, max) = device.wavelength_limits(1).unwrap();
        assert_eq!(min, 0.0);
        assert!((max - 1.5e-6).abs() < 1e-12);
        assert_eq!(device.slit_width(Slit::InputSide).unwrap(), Some(50e-6));
        assert_eq!(device.slit_width(Slit::OutputSide).unwrap(), None);
    }

    #[test]
    fn test_absent_slit_is_unsupported() {
        let api = FakeApi::new(1);
        let mut device = ShamrockSpectrograph::with_api(Box::new(api), "", 0).unwrap();
        assert!(matches!(
            device.set_slit_width(Slit::OutputDirect, 1e-4),
            Err(DeviceError::Unsupported(_))
        ));
    }

    #[test]
    fn test_close_once() {
        let api = FakeApi::new(1);
        let mut device = ShamrockSpectrograph::with_api(Box::new(api), "", 0).unwrap();
        device.close().unwrap();
        assert!(matches!(device.close(), Err(DeviceError::NotConnected)));
    }
}
