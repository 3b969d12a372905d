//! Registry type definitions.
//!
//! This module contains the error type and state enum for the timer registry.

use std::io;
use thiserror::Error;

use crate::core::types::TimerId;

/// Errors that can occur in the timer registry.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The interval is zero.
    #[error("timer interval must be greater than zero")]
    InvalidInterval,

    /// The handle does not refer to a live timer.
    #[error("invalid timer handle: {0}")]
    InvalidHandle(TimerId),

    /// No room for another timer, or its wait primitive could not be allocated.
    #[error("timer allocation failed: {0}")]
    AllocationFailure(String),

    /// The background waiter could not be started.
    #[error("failed to start timer waiter: {0}")]
    EngineStartFailure(#[source] io::Error),

    /// Arming or re-arming a wait primitive failed.
    #[error("failed to {operation} wait primitive: {source}")]
    WaitPrimitive {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// The registry lock was poisoned by a panic.
    #[error("timer registry lock poisoned")]
    LockPoisoned,
}

/// State of the registry's background waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
    /// No waiter is running.
    Stopped,
    /// A waiter is running and dispatching expirations.
    Running,
}
