// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Thermal lifecycle controller
//!
//! The controller exclusively owns the camera handle. Cooling and warming are
//! cooperative polling loops guarded by a busy flag: at most one of them runs at a
//! time, and a second request is rejected with [`ThermalError::Busy`] instead of
//! interleaving cooler commands.
//!
//! Locks are always taken in the order `operation` then `device`.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};

use super::{
    CancelToken, Clock, LifecycleOperation, LifecycleState, PollPolicy, TemperatureStatus,
    ThermalError, ThermalOutcome, ThermalState,
};
use crate::camera::drivers::CameraDriver;
use crate::error::DeviceError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Temperatures are reported with two decimals
fn round_temperature(celsius: f64) -> f64 {
    (celsius * 100.0).round() / 100.0
}

struct Inner {
    device: Mutex<Option<Box<dyn CameraDriver>>>,
    operation: Mutex<Option<LifecycleOperation>>,
    idle: Condvar,
    cancel: CancelToken,
    policy: PollPolicy,
    clock: Arc<dyn Clock>,
}

/// Busy flag held for the duration of one cool or warm operation.
///
/// Dropping the guard clears the flag and wakes a pending [`ThermalLifecycleController::safe_close`].
pub(crate) struct OperationGuard {
    inner: Arc<Inner>,
    operation: LifecycleOperation,
}

impl OperationGuard {
    pub(crate) fn operation(&self) -> LifecycleOperation {
        self.operation
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        *lock(&self.inner.operation) = None;
        self.inner.idle.notify_all();
        debug!("Lifecycle operation {} finished", self.operation);
    }
}

/// Owner of the camera handle and of the cool/warm state machine
#[derive(Clone)]
pub struct ThermalLifecycleController {
    inner: Arc<Inner>,
}

impl ThermalLifecycleController {
    pub fn new(policy: PollPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Inner {
                device: Mutex::new(None),
                operation: Mutex::new(None),
                idle: Condvar::new(),
                cancel: CancelToken::new(),
                policy,
                clock,
            }),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.inner.policy
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.inner.clock.clone()
    }

    /// Take ownership of an opened driver
    pub fn connect(&self, driver: Box<dyn CameraDriver>) -> Result<(), ThermalError> {
        let mut device = lock(&self.inner.device);
        if device.is_some() {
            return Err(ThermalError::AlreadyConnected);
        }
        *device = Some(driver);
        info!("Camera attached to thermal lifecycle controller");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.device).is_some()
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.inner.operation).is_some()
    }

    /// Operation currently holding the busy flag
    pub fn running(&self) -> Option<LifecycleOperation> {
        *lock(&self.inner.operation)
    }

    pub fn state(&self) -> LifecycleState {
        let operation = lock(&self.inner.operation);
        match *operation {
            Some(LifecycleOperation::Cooling) => LifecycleState::Cooling,
            Some(LifecycleOperation::Warming) => LifecycleState::Warming,
            None if lock(&self.inner.device).is_some() => LifecycleState::Idle,
            None => LifecycleState::Disconnected,
        }
    }

    /// Request the running loop to stop at its next poll
    pub fn cancel(&self) {
        info!("Cancellation requested");
        self.inner.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.inner.cancel.clone()
    }

    /// Cancel the running loop, if any, and block until the busy flag is released
    pub fn cancel_and_wait(&self) {
        let operation = lock(&self.inner.operation);
        if operation.is_none() {
            return;
        }
        self.inner.cancel.cancel();
        let _idle = self
            .inner
            .idle
            .wait_while(operation, |running| running.is_some())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Claim the busy flag for `operation`
    pub(crate) fn begin(
        &self,
        operation: LifecycleOperation,
    ) -> Result<OperationGuard, ThermalError> {
        let mut current = lock(&self.inner.operation);
        if let Some(running) = *current {
            warn!("Rejected {} request: {} in progress", operation, running);
            return Err(ThermalError::Busy { running });
        }
        if lock(&self.inner.device).is_none() {
            return Err(ThermalError::NotConnected);
        }
        *current = Some(operation);
        self.inner.cancel.reset();
        debug!("Lifecycle operation {} started", operation);
        Ok(OperationGuard {
            inner: self.inner.clone(),
            operation,
        })
    }

    /// Run `f` against the connected driver
    pub(crate) fn with_device<T>(
        &self,
        f: impl FnOnce(&mut dyn CameraDriver) -> Result<T, DeviceError>,
    ) -> Result<T, ThermalError> {
        let mut device = lock(&self.inner.device);
        let driver = device.as_mut().ok_or(ThermalError::NotConnected)?;
        Ok(f(driver.as_mut())?)
    }

    /// Enable the cooler at `target` °C and wait until the sensor is at or below it
    pub fn cool(&self, target: f64) -> Result<ThermalOutcome, ThermalError> {
        let guard = self.begin(LifecycleOperation::Cooling)?;
        self.run_cool(&guard, target)
    }

    /// Disable the cooler and wait until the sensor is at or above `safe` °C
    pub fn warm(&self, safe: f64) -> Result<ThermalOutcome, ThermalError> {
        let guard = self.begin(LifecycleOperation::Warming)?;
        self.run_warm(&guard, safe)
    }

    pub(crate) fn run_cool(
        &self,
        guard: &OperationGuard,
        target: f64,
    ) -> Result<ThermalOutcome, ThermalError> {
        info!("Cooling to {:.1} °C", target);
        self.with_device(|device| device.set_cooler(true, Some(target)))?;
        self.poll_until(guard.operation(), |temperature| temperature <= target)
    }

    pub(crate) fn run_warm(
        &self,
        guard: &OperationGuard,
        safe: f64,
    ) -> Result<ThermalOutcome, ThermalError> {
        info!("Warming (cooler off) to {:.1} °C", safe);
        self.with_device(|device| device.set_cooler(false, None))?;
        self.poll_until(guard.operation(), |temperature| temperature >= safe)
    }

    fn read_temperature(&self) -> Result<(f64, TemperatureStatus), ThermalError> {
        self.with_device(|device| {
            let temperature = device.get_temperature()?;
            let status = device.get_temperature_status()?;
            Ok((round_temperature(temperature), status))
        })
    }

    fn poll_until(
        &self,
        operation: LifecycleOperation,
        reached: impl Fn(f64) -> bool,
    ) -> Result<ThermalOutcome, ThermalError> {
        let policy = self.inner.policy;
        let clock = &self.inner.clock;
        let cancel = &self.inner.cancel;
        let started = clock.now();
        if policy.timeout.is_none() {
            warn!(
                "{} has no timeout and only ends on the target or cancellation",
                operation
            );
        }

        let mut ticks = 0;
        let mut failures = 0;
        let mut last_temperature = None;
        loop {
            if cancel.is_cancelled() {
                info!("{} cancelled after {} polls", operation, ticks);
                return Ok(ThermalOutcome::Cancelled {
                    last_temperature,
                    ticks,
                });
            }

            match self.read_temperature() {
                Ok((temperature, status)) => {
                    failures = 0;
                    last_temperature = Some(temperature);
                    debug!("{}: {:.2} °C, status: {}", operation, temperature, status);
                    if reached(temperature) {
                        info!(
                            "{} done at {:.2} °C, status: {}",
                            operation, temperature, status
                        );
                        return Ok(ThermalOutcome::Reached {
                            temperature,
                            status,
                            ticks,
                        });
                    }
                }
                Err(ThermalError::Device(source)) => {
                    failures += 1;
                    if failures > policy.max_consecutive_failures {
                        error!(
                            "{} aborted after {} failed temperature reads: {}",
                            operation, failures, source
                        );
                        return Err(ThermalError::PollFailure {
                            attempts: failures,
                            source,
                        });
                    }
                    warn!(
                        "Temperature read failed during {} ({}/{}): {}",
                        operation, failures, policy.max_consecutive_failures, source
                    );
                }
                Err(e) => return Err(e),
            }

            if let Some(timeout) = policy.timeout {
                if clock.now().saturating_sub(started) >= timeout {
                    info!(
                        "{} timed out after {:?} ({} polls)",
                        operation, timeout, ticks
                    );
                    return Ok(ThermalOutcome::TimedOut {
                        last_temperature,
                        ticks,
                    });
                }
            }

            clock.sleep(policy.interval);
            ticks += 1;
        }
    }

    /// Current temperature and status, or [`ThermalState::unknown`] when there is nothing to read
    pub fn get_temp(&self) -> ThermalState {
        let mut device = lock(&self.inner.device);
        match device.as_mut() {
            Some(driver) => read_state(driver.as_mut()),
            None => ThermalState::unknown(),
        }
    }

    /// Cancel any running loop, stop acquisition and release the camera.
    ///
    /// Returns `false` (and changes nothing) when no camera is connected.
    pub fn safe_close(&self) -> bool {
        let operation = lock(&self.inner.operation);
        if lock(&self.inner.device).is_none() {
            return false;
        }

        self.inner.cancel.cancel();
        let operation = self
            .inner
            .idle
            .wait_while(operation, |running| running.is_some())
            .unwrap_or_else(PoisonError::into_inner);

        let Some(mut driver) = lock(&self.inner.device).take() else {
            return false;
        };
        match driver.acquisition_in_progress() {
            Ok(true) => {
                if let Err(e) = driver.stop_acquisition() {
                    warn!("Could not stop acquisition before closing: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Could not query acquisition state before closing: {}", e),
        }
        if let Err(e) = driver.close() {
            error!("Error while closing camera: {}", e);
        }
        drop(operation);
        info!("Camera disconnected safely");
        true
    }
}

fn try_read_state(driver: &mut dyn CameraDriver) -> Result<ThermalState, DeviceError> {
    Ok(ThermalState {
        temperature: Some(round_temperature(driver.get_temperature()?)),
        status: driver.get_temperature_status()?,
        setpoint: driver.get_temperature_setpoint()?,
    })
}

fn read_state(driver: &mut dyn CameraDriver) -> ThermalState {
    match try_read_state(driver) {
        Ok(state) => state,
        Err(e) => {
            debug!("Temperature read failed: {}", e);
            ThermalState::unknown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::drivers::{CameraInfo, CameraParameters, SimulatedCamera};
    use crate::camera::frame::Frame;
    use crate::camera::settings::{AcquisitionMode, AcquisitionSettings};
    use crate::config::SimulationConfig;
    use crate::thermal::{ManualClock, ThermalDevice};
    use mockall::mock;
    use std::sync::OnceLock;
    use std::time::Duration;

    fn policy() -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(1),
            timeout: Some(Duration::from_secs(3600)),
            max_consecutive_failures: 3,
        }
    }

    fn simulated(clock: &Arc<ManualClock>) -> SimulatedCamera {
        SimulatedCamera::open(&SimulationConfig::default(), clock.clone()).unwrap()
    }

    fn connected(policy: PollPolicy) -> (ThermalLifecycleController, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let controller = ThermalLifecycleController::new(policy, clock.clone());
        controller.connect(Box::new(simulated(&clock))).unwrap();
        (controller, clock)
    }

    #[test]
    fn test_cool_takes_five_ticks() {
        let (controller, clock) = connected(policy());
        let outcome = controller.cool(-80.0).unwrap();

        assert_eq!(
            outcome,
            ThermalOutcome::Reached {
                temperature: -80.0,
                status: TemperatureStatus::Stabilized,
                ticks: 5,
            }
        );
        assert_eq!(clock.ticks(), 5);
        assert!(!controller.is_busy());
        assert_eq!(controller.state(), LifecycleState::Idle);
    }

    #[test]
    fn test_warm_after_cool() {
        let (controller, _clock) = connected(policy());
        controller.cool(-80.0).unwrap();

        let outcome = controller.warm(-20.0).unwrap();
        assert!(outcome.is_reached());
        assert!(outcome.temperature().unwrap() >= -20.0);
        assert_eq!(outcome.ticks(), 12);
        assert_eq!(controller.get_temp().status, TemperatureStatus::Off);
    }

    #[test]
    fn test_cool_already_below_target_returns_immediately() {
        let (controller, clock) = connected(policy());
        let outcome = controller.cool(25.0).unwrap();
        assert!(outcome.is_reached());
        assert_eq!(outcome.ticks(), 0);
        assert_eq!(clock.ticks(), 0);
    }

    /// Virtual clock that requests cancellation after a number of sleeps
    struct CancellingClock {
        clock: ManualClock,
        cancel_after: u32,
        token: OnceLock<CancelToken>,
    }

    impl Clock for CancellingClock {
        fn now(&self) -> Duration {
            self.clock.now()
        }

        fn sleep(&self, duration: Duration) {
            self.clock.sleep(duration);
            if self.clock.ticks() == self.cancel_after {
                if let Some(token) = self.token.get() {
                    token.cancel();
                }
            }
        }
    }

    #[test]
    fn test_cancel_stops_within_one_interval() {
        let clock = Arc::new(CancellingClock {
            clock: ManualClock::new(),
            cancel_after: 2,
            token: OnceLock::new(),
        });
        let controller = ThermalLifecycleController::new(policy(), clock.clone());
        let _ = clock.token.set(controller.cancel_token());
        let camera = SimulatedCamera::open(&SimulationConfig::default(), clock.clone()).unwrap();
        controller.connect(Box::new(camera)).unwrap();

        let outcome = controller.cool(-80.0).unwrap();
        assert_eq!(
            outcome,
            ThermalOutcome::Cancelled {
                last_temperature: Some(0.0),
                ticks: 2,
            }
        );
        assert!(!controller.is_busy());
    }

    #[test]
    fn test_cancel_before_start_is_cleared() {
        let (controller, _clock) = connected(policy());
        controller.cancel();
        assert!(controller.cool(-80.0).unwrap().is_reached());
    }

    #[test]
    fn test_busy_rejects_second_operation() {
        let (controller, _clock) = connected(policy());
        let guard = controller.begin(LifecycleOperation::Cooling).unwrap();
        assert_eq!(controller.state(), LifecycleState::Cooling);

        assert!(matches!(
            controller.warm(-20.0),
            Err(ThermalError::Busy {
                running: LifecycleOperation::Cooling
            })
        ));
        assert!(matches!(
            controller.cool(-80.0),
            Err(ThermalError::Busy { .. })
        ));

        drop(guard);
        assert!(!controller.is_busy());
        assert!(controller.warm(-20.0).is_ok());
    }

    #[test]
    fn test_operations_require_device() {
        let controller =
            ThermalLifecycleController::new(policy(), Arc::new(ManualClock::new()));
        assert!(matches!(
            controller.cool(-80.0),
            Err(ThermalError::NotConnected)
        ));
        assert!(!controller.is_busy());
    }

    #[test]
    fn test_safe_close_without_device_is_noop() {
        let controller =
            ThermalLifecycleController::new(policy(), Arc::new(ManualClock::new()));
        assert!(!controller.safe_close());
        assert!(!controller.safe_close());
        assert_eq!(controller.state(), LifecycleState::Disconnected);
        assert!(!controller.cancel_token().is_cancelled());
    }

    #[test]
    fn test_get_temp_sentinel() {
        let controller =
            ThermalLifecycleController::new(policy(), Arc::new(ManualClock::new()));
        assert!(controller.get_temp().is_unknown());

        let (controller, _clock) = connected(policy());
        let state = controller.get_temp();
        assert_eq!(state.temperature, Some(20.0));
        assert_eq!(state.status, TemperatureStatus::Off);

        assert!(controller.safe_close());
        assert!(controller.get_temp().is_unknown());
        assert_eq!(controller.state(), LifecycleState::Disconnected);
    }

    #[test]
    fn test_transient_read_failures_are_retried() {
        let clock = Arc::new(ManualClock::new());
        let controller = ThermalLifecycleController::new(policy(), clock.clone());
        let camera = simulated(&clock).fail_temperature_reads(1, 3);
        controller.connect(Box::new(camera)).unwrap();

        let outcome = controller.cool(-80.0).unwrap();
        assert!(outcome.is_reached());
        assert_eq!(outcome.temperature(), Some(-80.0));
    }

    #[test]
    fn test_persistent_read_failures_escalate() {
        let clock = Arc::new(ManualClock::new());
        let controller = ThermalLifecycleController::new(policy(), clock.clone());
        let camera = simulated(&clock).fail_temperature_reads(0, 100);
        controller.connect(Box::new(camera)).unwrap();

        match controller.cool(-80.0) {
            Err(ThermalError::PollFailure { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(source, DeviceError::Sdk { .. }));
            }
            other => panic!("expected poll failure, got {:?}", other),
        }
        assert!(!controller.is_busy());
    }

    #[test]
    fn test_timeout_returns_typed_outcome() {
        let (controller, _clock) = connected(PollPolicy {
            timeout: Some(Duration::from_secs(3)),
            ..policy()
        });
        let outcome = controller.cool(-80.0).unwrap();
        assert_eq!(
            outcome,
            ThermalOutcome::TimedOut {
                last_temperature: Some(-40.0),
                ticks: 3,
            }
        );
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let (controller, clock) = connected(policy());
        assert!(matches!(
            controller.connect(Box::new(simulated(&clock))),
            Err(ThermalError::AlreadyConnected)
        ));
    }

    mock! {
        pub Camera {}

        impl ThermalDevice for Camera {
            fn set_cooler(&mut self, enabled: bool, setpoint: Option<f64>) -> Result<(), DeviceError>;
            fn get_temperature(&mut self) -> Result<f64, DeviceError>;
            fn get_temperature_status(&mut self) -> Result<TemperatureStatus, DeviceError>;
            fn get_temperature_setpoint(&mut self) -> Result<Option<f64>, DeviceError>;
            fn acquisition_in_progress(&mut self) -> Result<bool, DeviceError>;
            fn stop_acquisition(&mut self) -> Result<(), DeviceError>;
            fn close(&mut self) -> Result<(), DeviceError>;
        }

        impl CameraDriver for Camera {
            fn device_info(&mut self) -> Result<CameraInfo, DeviceError>;
            fn detector_size(&mut self) -> Result<(usize, usize), DeviceError>;
            fn apply_settings(&mut self, settings: &AcquisitionSettings) -> Result<(), DeviceError>;
            fn set_exposure(&mut self, exposure_s: f64) -> Result<(), DeviceError>;
            fn start_acquisition(&mut self, mode: AcquisitionMode) -> Result<(), DeviceError>;
            fn wait_for_frame(&mut self, timeout: Duration) -> Result<Frame, DeviceError>;
            fn read_newest_frame(&mut self) -> Result<Option<Frame>, DeviceError>;
            fn parameters(&mut self) -> Result<CameraParameters, DeviceError>;
        }
    }

    #[test]
    fn test_safe_close_stops_running_acquisition() {
        let mut camera = MockCamera::new();
        camera
            .expect_acquisition_in_progress()
            .times(1)
            .returning(|| Ok(true));
        camera
            .expect_stop_acquisition()
            .times(1)
            .returning(|| Ok(()));
        camera.expect_close().times(1).returning(|| Ok(()));

        let controller =
            ThermalLifecycleController::new(policy(), Arc::new(ManualClock::new()));
        controller.connect(Box::new(camera)).unwrap();
        assert!(controller.safe_close());
        assert!(!controller.is_connected());
    }

    #[test]
    fn test_safe_close_ignores_stop_failure() {
        let mut camera = MockCamera::new();
        camera
            .expect_acquisition_in_progress()
            .returning(|| Ok(true));
        camera
            .expect_stop_acquisition()
            .returning(|| Err(DeviceError::Sdk {
                call: "AbortAcquisition",
                code: 20013,
            }));
        camera.expect_close().times(1).returning(|| Ok(()));

        let controller =
            ThermalLifecycleController::new(policy(), Arc::new(ManualClock::new()));
        controller.connect(Box::new(camera)).unwrap();
        assert!(controller.safe_close());
    }

    #[test]
    fn test_get_temp_read_failure_gives_sentinel() {
        let mut camera = MockCamera::new();
        camera.expect_get_temperature().returning(|| {
            Err(DeviceError::Sdk {
                call: "GetTemperatureF",
                code: 20013,
            })
        });

        let controller =
            ThermalLifecycleController::new(policy(), Arc::new(ManualClock::new()));
        controller.connect(Box::new(camera)).unwrap();
        assert!(controller.get_temp().is_unknown());
    }
}
