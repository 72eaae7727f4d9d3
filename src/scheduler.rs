//! Periodic refresh of every registered source.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::Result;
use crate::resolver::EcsResolver;

/// Handle for the background refresh task.
///
/// The task calls [`EcsResolver::reload_all`] once per interval until it is
/// stopped. Dropping the handle stops the task.
pub struct RefreshScheduler {
    interval: Duration,
    log_target: Arc<str>,
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    /// Start refreshing `resolver` every `interval`.
    ///
    /// A zero interval disables refreshing and returns `Ok(None)`.
    pub fn start(resolver: Arc<EcsResolver>, interval: Duration) -> Result<Option<Self>> {
        if interval.is_zero() {
            return Ok(None);
        }

        let log_target: Arc<str> = Arc::from(resolver.log_target());
        let (stop, stopped) = mpsc::channel::<()>();
        let worker = std::thread::Builder::new()
            .name("setecs-refresh".to_string())
            .spawn(move || loop {
                match stopped.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        log::debug!(target: resolver.log_target(), "refreshing ecs sources");
                        resolver.reload_all();
                    }
                    // Explicit stop, or the handle went away.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;

        log::debug!(target: &*log_target, "ecs refresh every {:?}", interval);
        Ok(Some(Self {
            interval,
            log_target,
            stop: Some(stop),
            worker: Some(worker),
        }))
    }

    /// Refresh interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Check if the task has not been stopped yet.
    pub fn is_running(&self) -> bool {
        self.stop.is_some()
    }

    /// Stop the task and wait for an in-flight refresh to finish.
    ///
    /// Calling this more than once is a no-op.
    pub fn stop(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        let _ = stop.send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!(target: &*self.log_target, "ecs refresh task panicked");
            }
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
