//! The seam between the registry and its backends.
//!
//! A [`Waiter`] owns one wait primitive per armed timer and reports every
//! expiration through a [`Dispatch`] callback. Dropping a waiter stops it: all
//! primitives are released and its thread (or runtime) is joined, unless the
//! drop happens on that very thread, in which case it exits once the current
//! callback returns.

use std::sync::Arc;

use crate::config::{BackendKind, RegistryConfig};
use crate::core::schedule::Schedule;
use crate::core::types::TimerId;

use super::async_queue::AsyncWaiter;
use super::types::TimerError;

/// Called by a waiter, on its own thread, each time a timer expires.
pub(crate) type Dispatch = Arc<dyn Fn(TimerId) + Send + Sync>;

/// Backend that waits for timer expirations.
pub(crate) trait Waiter: Send {
    /// Create and arm a primitive for `id`.
    fn arm(&mut self, id: TimerId, schedule: Schedule) -> Result<(), TimerError>;

    /// Re-arm the existing primitive for `id` with a new schedule.
    fn rearm(&mut self, id: TimerId, schedule: Schedule) -> Result<(), TimerError>;

    /// Disarm and release the primitive for `id`. Unknown ids are ignored.
    fn disarm(&mut self, id: TimerId);

    /// Number of armed primitives.
    fn armed(&self) -> usize;
}

/// Start the waiter selected by `config.backend`.
pub(crate) fn start(
    config: &RegistryConfig,
    dispatch: Dispatch,
) -> Result<Box<dyn Waiter>, TimerError> {
    if config.thread_name.contains('\0') {
        return Err(TimerError::EngineStartFailure(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "thread name contains a NUL character",
        )));
    }

    match config.backend {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        BackendKind::Poll => Ok(Box::new(super::poll::PollWaiter::start(config, dispatch)?)),
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        BackendKind::Poll => Err(TimerError::EngineStartFailure(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "the poll backend needs timerfd support",
        ))),
        BackendKind::Async => Ok(Box::new(AsyncWaiter::start(config, dispatch)?)),
    }
}
