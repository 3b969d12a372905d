//! Timer registry implementation.
//!
//! The registry is responsible for:
//! - Owning every live timer in a generation-tagged slot table
//! - Starting the backend waiter with the first timer and stopping it after the last
//! - Arming, re-arming and disarming wait primitives
//! - Dispatching expirations to the right callback and user data
//!
//! Callbacks run synchronously on the waiter thread and must return quickly;
//! a slow callback delays every other timer. The registry lock is never held
//! while a callback runs, so callbacks may register, update or cancel timers,
//! including their own.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use slotmap::SlotMap;

use crate::config::RegistryConfig;
use crate::core::schedule::Schedule;
use crate::core::types::{TimerId, TimerKind};

use super::types::{RegistryState, TimerError};
use super::waiter::{self, Dispatch, Waiter};

/// Callback with its user data already bound.
type Callback = Arc<dyn Fn(TimerId) + Send + Sync>;

/// One registered timer.
struct TimerRecord {
    schedule: Schedule,
    callback: Callback,
    /// Bumped by every update; a single-shot timer is only auto-cancelled if
    /// it was not re-armed while its callback ran.
    epoch: u64,
}

struct Inner {
    timers: SlotMap<TimerId, TimerRecord>,
    waiter: Option<Box<dyn Waiter>>,
}

struct Shared {
    config: RegistryConfig,
    inner: Mutex<Inner>,
}

/// A set of timers served by one background waiter.
///
/// `TimerRegistry` is a cheap handle; clones share the same timers. The waiter
/// starts with the first registered timer and stops after the last one is
/// cancelled. Dropping the last handle shuts the registry down.
#[derive(Clone)]
pub struct TimerRegistry {
    shared: Arc<Shared>,
}

impl TimerRegistry {
    /// Create a registry. Nothing is started until a timer is registered.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(Inner {
                    timers: SlotMap::with_key(),
                    waiter: None,
                }),
            }),
        }
    }

    /// The configuration this registry was created with.
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Start the background waiter if it is not running.
    pub fn start(&self) -> Result<(), TimerError> {
        let mut inner = self.shared.lock()?;
        self.shared.ensure_waiter(&mut inner)
    }

    /// Register a timer.
    ///
    /// `callback(id, &user_data)` is invoked on the waiter thread each time
    /// the timer expires. The user data is owned by the registry until the
    /// timer is cancelled; pass an `Arc` to share it with other code.
    pub fn register<T, F>(
        &self,
        interval: Duration,
        kind: TimerKind,
        callback: F,
        user_data: T,
    ) -> Result<TimerId, TimerError>
    where
        T: Send + Sync + 'static,
        F: Fn(TimerId, &T) + Send + Sync + 'static,
    {
        let schedule = Schedule::new(interval, kind).map_err(|_| TimerError::InvalidInterval)?;
        let callback: Callback = Arc::new(move |id| callback(id, &user_data));

        let mut inner = self.shared.lock()?;

        let max = self.shared.config.max_timers;
        if inner.timers.len() >= max {
            return Err(TimerError::AllocationFailure(format!(
                "timer limit of {} reached",
                max
            )));
        }

        let started_here = inner.waiter.is_none();
        self.shared.ensure_waiter(&mut inner)?;

        let id = inner.timers.insert(TimerRecord {
            schedule,
            callback,
            epoch: 0,
        });

        let Inner { timers, waiter } = &mut *inner;
        let armed = match waiter.as_mut() {
            Some(waiter) => waiter.arm(id, schedule),
            None => Err(TimerError::AllocationFailure("waiter not running".into())),
        };

        if let Err(e) = armed {
            let record = timers.remove(id);
            let idle = if started_here && timers.is_empty() {
                waiter.take()
            } else {
                None
            };
            drop(inner);
            drop(idle);
            drop(record);
            tracing::warn!(error = %e, "Failed to arm timer");
            return Err(e);
        }

        tracing::debug!(
            timer_id = %id,
            interval = ?interval,
            kind = %kind,
            armed = waiter.as_ref().map_or(0, |w| w.armed()),
            "Timer registered"
        );
        Ok(id)
    }

    /// Register a timer whose callback needs no user data.
    pub fn register_fn<F>(
        &self,
        interval: Duration,
        kind: TimerKind,
        callback: F,
    ) -> Result<TimerId, TimerError>
    where
        F: Fn(TimerId) + Send + Sync + 'static,
    {
        self.register(interval, kind, move |id, _: &()| callback(id), ())
    }

    /// Re-arm a live timer with a new interval and kind.
    ///
    /// The handle stays the same. An expiration already in flight may still
    /// be delivered once with the old settings.
    pub fn update(&self, id: TimerId, interval: Duration, kind: TimerKind) -> Result<(), TimerError> {
        let schedule = Schedule::new(interval, kind).map_err(|_| TimerError::InvalidInterval)?;

        let mut inner = self.shared.lock()?;
        let Inner { timers, waiter } = &mut *inner;

        let record = timers.get_mut(id).ok_or(TimerError::InvalidHandle(id))?;
        let waiter = waiter.as_mut().ok_or(TimerError::InvalidHandle(id))?;

        if let Err(e) = waiter.rearm(id, schedule) {
            tracing::warn!(timer_id = %id, error = %e, "Failed to re-arm timer");
            return Err(e);
        }

        record.schedule = schedule;
        record.epoch += 1;

        tracing::debug!(
            timer_id = %id,
            interval = ?interval,
            kind = %kind,
            "Timer updated"
        );
        Ok(())
    }

    /// Cancel a timer.
    ///
    /// Returns `true` if a live timer was removed. Cancelling an unknown or
    /// already-cancelled handle does nothing. An expiration being dispatched
    /// concurrently may still reach the callback once.
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = self.shared.remove(id, None);
        if removed {
            tracing::debug!(timer_id = %id, "Timer cancelled");
        }
        removed
    }

    /// Cancel every timer and stop the waiter.
    ///
    /// Waits for the waiter to exit, so no callback starts after this returns.
    /// When called from a callback the waiter exits as soon as that callback
    /// returns instead.
    pub fn shutdown(&self) {
        let mut inner = self.shared.lock_recovered();
        let records: Vec<_> = inner.timers.drain().collect();
        let waiter = inner.waiter.take();
        drop(inner);

        let was_running = waiter.is_some();
        drop(waiter);
        drop(records);

        if was_running {
            tracing::info!("Timer registry shut down");
        }
    }

    /// Whether the background waiter is running.
    pub fn state(&self) -> RegistryState {
        if self.shared.lock_recovered().waiter.is_some() {
            RegistryState::Running
        } else {
            RegistryState::Stopped
        }
    }

    /// Shorthand for `state() == RegistryState::Running`.
    pub fn is_running(&self) -> bool {
        self.state() == RegistryState::Running
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.shared.lock_recovered().timers.len()
    }

    /// Whether no timers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` refers to a live timer.
    pub fn contains(&self, id: TimerId) -> bool {
        self.shared.lock_recovered().timers.contains_key(id)
    }

    /// Current schedule of a live timer.
    pub fn schedule(&self, id: TimerId) -> Option<Schedule> {
        self.shared
            .lock_recovered()
            .timers
            .get(id)
            .map(|record| record.schedule)
    }
}

impl std::fmt::Debug for TimerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerRegistry")
            .field("backend", &self.shared.config.backend)
            .field("timers", &self.len())
            .field("state", &self.state())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> Result<MutexGuard<'_, Inner>, TimerError> {
        self.inner.lock().map_err(|_| TimerError::LockPoisoned)
    }

    /// Lock for paths that must not fail (cancel, dispatch, shutdown).
    fn lock_recovered(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_waiter(self: &Arc<Self>, inner: &mut Inner) -> Result<(), TimerError> {
        if inner.waiter.is_some() {
            return Ok(());
        }

        let weak: Weak<Shared> = Arc::downgrade(self);
        let dispatch: Dispatch = Arc::new(move |id| {
            if let Some(shared) = weak.upgrade() {
                shared.dispatch(id);
            }
        });

        let waiter = waiter::start(&self.config, dispatch).inspect_err(|e| {
            tracing::error!(error = %e, backend = %self.config.backend, "Failed to start timer waiter");
        })?;
        inner.waiter = Some(waiter);
        Ok(())
    }

    /// Remove a timer, stopping the waiter if it was the last one.
    ///
    /// With `expected_epoch` set, the timer is only removed if it has not
    /// been updated since that epoch.
    fn remove(&self, id: TimerId, expected_epoch: Option<u64>) -> bool {
        let mut inner = self.lock_recovered();

        let current = match inner.timers.get(id) {
            Some(record) => record.epoch,
            None => return false,
        };
        if expected_epoch.is_some_and(|epoch| epoch != current) {
            return false;
        }

        let record = inner.timers.remove(id);
        if let Some(waiter) = inner.waiter.as_mut() {
            waiter.disarm(id);
        }
        let idle = if inner.timers.is_empty() {
            inner.waiter.take()
        } else {
            None
        };
        drop(inner);

        // Joining happens here, outside the lock, so a running callback can finish.
        if idle.is_some() {
            drop(idle);
            tracing::debug!("Last timer removed, waiter stopped");
        }
        drop(record);
        true
    }

    /// Deliver one expiration.
    fn dispatch(&self, id: TimerId) {
        let (callback, kind, epoch) = {
            let inner = self.lock_recovered();
            match inner.timers.get(id) {
                Some(record) => (
                    Arc::clone(&record.callback),
                    record.schedule.kind(),
                    record.epoch,
                ),
                None => {
                    tracing::trace!(timer_id = %id, "Dropping expiration of cancelled timer");
                    return;
                }
            }
        };

        if panic::catch_unwind(AssertUnwindSafe(|| callback(id))).is_err() {
            tracing::warn!(timer_id = %id, "Timer callback panicked");
        }

        if kind == TimerKind::SingleShot
            && self.config.auto_cancel_single_shot
            && self.remove(id, Some(epoch))
        {
            tracing::debug!(timer_id = %id, "Single-shot timer fired, auto-cancelled");
        }
    }
}
