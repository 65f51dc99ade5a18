// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the raman-control project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Background execution of the cool and warm loops
//!
//! The polling loops block, so they run on a dedicated named thread and report
//! their result through a one-shot channel. The busy flag is claimed in the caller
//! before the thread starts: a concurrent request fails immediately with
//! [`ThermalError::Busy`], and a `cancel()` issued right after spawning is not lost.

use std::thread::JoinHandle;

use log::{debug, warn};
use tokio::sync::oneshot;

use super::controller::OperationGuard;
use super::{
    CancelToken, LifecycleOperation, ThermalError, ThermalLifecycleController, ThermalOutcome,
};

type TaskResult = Result<ThermalOutcome, ThermalError>;

/// Handle on a cool or warm loop running in the background
pub struct LifecycleTask {
    operation: LifecycleOperation,
    receiver: oneshot::Receiver<TaskResult>,
    thread: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl LifecycleTask {
    pub fn operation(&self) -> LifecycleOperation {
        self.operation
    }

    /// Request cancellation; the loop exits at its next poll
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Block until the loop ends.
    ///
    /// Must not be called from inside an async context; use [`LifecycleTask::finished`] there.
    pub fn wait(self) -> TaskResult {
        let Self {
            receiver, thread, ..
        } = self;
        let result = receiver
            .blocking_recv()
            .unwrap_or(Err(ThermalError::WorkerLost));
        if let Some(thread) = thread {
            if thread.join().is_err() {
                warn!("Lifecycle worker thread panicked");
            }
        }
        result
    }

    /// Wait for the loop to end without blocking the async runtime
    pub async fn finished(self) -> TaskResult {
        self.receiver.await.unwrap_or(Err(ThermalError::WorkerLost))
    }
}

impl ThermalLifecycleController {
    fn spawn_operation<F>(
        &self,
        operation: LifecycleOperation,
        thread_name: &str,
        run: F,
    ) -> Result<LifecycleTask, ThermalError>
    where
        F: FnOnce(ThermalLifecycleController, OperationGuard) -> TaskResult + Send + 'static,
    {
        let guard = self.begin(operation)?;
        let (sender, receiver) = oneshot::channel();
        let controller = self.clone();
        let thread = std::thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                let result = run(controller, guard);
                if sender.send(result).is_err() {
                    debug!("Lifecycle task handle dropped before completion");
                }
            })
            .map_err(ThermalError::Spawn)?;

        Ok(LifecycleTask {
            operation,
            receiver,
            thread: Some(thread),
            cancel: self.cancel_token(),
        })
    }

    /// Run [`ThermalLifecycleController::cool`] on a worker thread
    pub fn spawn_cool(&self, target: f64) -> Result<LifecycleTask, ThermalError> {
        self.spawn_operation(
            LifecycleOperation::Cooling,
            "thermal-cool",
            move |controller, guard| controller.run_cool(&guard, target),
        )
    }

    /// Run [`ThermalLifecycleController::warm`] on a worker thread
    pub fn spawn_warm(&self, safe: f64) -> Result<LifecycleTask, ThermalError> {
        self.spawn_operation(
            LifecycleOperation::Warming,
            "thermal-warm",
            move |controller, guard| controller.run_warm(&guard, safe),
        )
    }

    /// Warm up to `safe` °C, then close the camera whatever the warm-up outcome
    pub fn spawn_warm_and_close(&self, safe: f64) -> Result<LifecycleTask, ThermalError> {
        self.spawn_operation(
            LifecycleOperation::Warming,
            "thermal-warm-close",
            move |controller, guard| {
                let outcome = controller.run_warm(&guard, safe);
                // safe_close waits for the busy flag, release it first
                drop(guard);
                controller.safe_close();
                outcome
            },
        )
    }
}
