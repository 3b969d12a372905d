//! Core identifier types for the timer engine.
//!
//! These types name timers and describe how they repeat.

use serde::{Deserialize, Serialize};
use slotmap::{Key, KeyData};
use std::fmt;

slotmap::new_key_type! {
    /// Handle to a registered timer.
    ///
    /// A handle is an (index, generation) pair into the registry's slot table.
    /// When a slot is reused its generation changes, so a handle kept past
    /// cancellation never refers to a newer timer.
    pub struct TimerId;
}

impl TimerId {
    /// Pack the handle into a single integer.
    pub fn as_u64(&self) -> u64 {
        self.data().as_ffi()
    }

    /// Rebuild a handle from a value produced by [`TimerId::as_u64`].
    pub fn from_u64(value: u64) -> Self {
        KeyData::from_ffi(value).into()
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.as_u64())
    }
}

/// How a timer repeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    /// Fires once, `interval` after it was armed.
    SingleShot,
    /// Fires every `interval`, first one `interval` after it was armed.
    Periodic,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerKind::SingleShot => write!(f, "single_shot"),
            TimerKind::Periodic => write!(f, "periodic"),
        }
    }
}
