//! Timer registry and its backends.
//!
//! This module owns the set of live timers and the background waiter that
//! turns their expirations into callbacks.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod poll;

mod async_queue;
mod engine;
mod types;
mod waiter;

pub use engine::TimerRegistry;
pub use types::{RegistryState, TimerError};
