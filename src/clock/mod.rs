//! Clock generators.
//!
//! A clock is a periodic timer managed through [`ClockGenerator`], which
//! starts its registry with the first clock and shuts it down after the last
//! one is destroyed. Clock handles are plain [`TimerId`]s.
//!
//! The free functions operate on a process-wide generator created on first
//! use with the default configuration.

use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::RegistryConfig;
use crate::core::types::{TimerId, TimerKind};
use crate::registry::{TimerError, TimerRegistry};

static GLOBAL: LazyLock<ClockGenerator> =
    LazyLock::new(|| ClockGenerator::new(RegistryConfig::default()));

/// Creates and destroys periodic clocks on one registry.
#[derive(Debug)]
pub struct ClockGenerator {
    registry: TimerRegistry,
    clocks: Mutex<usize>,
}

impl ClockGenerator {
    /// Create a generator with its own registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            registry: TimerRegistry::new(config),
            clocks: Mutex::new(0),
        }
    }

    /// Start a clock that calls `callback(id, &data)` every `interval`.
    pub fn create<T, F>(&self, interval: Duration, callback: F, data: T) -> Result<TimerId, TimerError>
    where
        T: Send + Sync + 'static,
        F: Fn(TimerId, &T) + Send + Sync + 'static,
    {
        let mut clocks = self.clocks.lock().map_err(|_| TimerError::LockPoisoned)?;
        let first = *clocks == 0;

        if first {
            self.registry.start()?;
        }

        match self
            .registry
            .register(interval, TimerKind::Periodic, callback, data)
        {
            Ok(id) => {
                *clocks += 1;
                tracing::debug!(timer_id = %id, clocks = *clocks, "Clock created");
                Ok(id)
            }
            Err(e) => {
                if first {
                    self.registry.shutdown();
                }
                Err(e)
            }
        }
    }

    /// Change the period of a clock. Returns the same handle.
    pub fn update(&self, id: TimerId, interval: Duration) -> Result<TimerId, TimerError> {
        self.registry.update(id, interval, TimerKind::Periodic)?;
        Ok(id)
    }

    /// Stop a clock. Destroying an unknown or already-destroyed clock does nothing.
    pub fn destroy(&self, id: TimerId) {
        // Cancel first, without the count lock: it may wait for a running callback.
        if !self.registry.cancel(id) {
            return;
        }

        let mut clocks = self.clocks();
        *clocks = clocks.saturating_sub(1);
        tracing::debug!(timer_id = %id, clocks = *clocks, "Clock destroyed");

        if *clocks == 0 {
            self.registry.shutdown();
        }
    }

    /// Number of live clocks.
    pub fn clock_count(&self) -> usize {
        *self.clocks()
    }

    /// The registry backing these clocks.
    pub fn registry(&self) -> &TimerRegistry {
        &self.registry
    }

    fn clocks(&self) -> MutexGuard<'_, usize> {
        self.clocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The process-wide generator.
pub fn global() -> &'static ClockGenerator {
    &GLOBAL
}

/// Create a clock on the process-wide generator.
pub fn create_clock<T, F>(interval: Duration, callback: F, data: T) -> Result<TimerId, TimerError>
where
    T: Send + Sync + 'static,
    F: Fn(TimerId, &T) + Send + Sync + 'static,
{
    global().create(interval, callback, data)
}

/// Change the period of a clock on the process-wide generator.
pub fn update_clock(id: TimerId, interval: Duration) -> Result<TimerId, TimerError> {
    global().update(id, interval)
}

/// Destroy a clock on the process-wide generator.
pub fn destroy_clock(id: TimerId) {
    global().destroy(id)
}
