//! metronome - many timers, one background waiter.
//!
//! A [`TimerRegistry`] multiplexes any number of periodic and single-shot
//! timers onto one background waiter and invokes a callback with
//! caller-supplied data each time a timer expires. Two backends are
//! available: a central `poll(2)` loop over timerfds (Linux) and a
//! per-timer tokio task backend (everywhere).
//!
//! [`ClockGenerator`] layers reference-counted periodic "clocks" on top,
//! starting its registry with the first clock and stopping it after the last.

pub mod clock;
pub mod config;
pub mod core;
pub mod registry;
pub mod testing;

pub use clock::{ClockGenerator, create_clock, destroy_clock, update_clock};
pub use config::{BackendKind, ConfigError, ConfigLoader, RegistryConfig};
pub use core::schedule::{Schedule, ScheduleError, parse_duration};
pub use core::types::{TimerId, TimerKind};
pub use registry::{RegistryState, TimerError, TimerRegistry};
