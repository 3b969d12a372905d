//! Testing utilities for users of the Metronome library.
//!
//! This module provides helpers for testing code that runs on timers:
//!
//! - [`FireRecorder`]: Records every expiration with its handle and time, and
//!   lets a test block until a given number of fires has been seen

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::core::types::TimerId;

/// Records timer expirations.
///
/// Clones share the same record, so one clone can be handed to the registry
/// as user data while the test keeps another.
///
/// # Example
///
/// ```
/// use metronome::testing::FireRecorder;
/// use metronome::{RegistryConfig, TimerKind, TimerRegistry};
/// use std::time::Duration;
///
/// let registry = TimerRegistry::new(RegistryConfig::default());
/// let recorder = FireRecorder::new();
///
/// let id = registry
///     .register(
///         Duration::from_millis(10),
///         TimerKind::Periodic,
///         FireRecorder::on_fire,
///         recorder.clone(),
///     )
///     .unwrap();
///
/// assert!(recorder.wait_for_count(3, Duration::from_secs(5)));
/// assert_eq!(recorder.count_for(id), recorder.count());
/// registry.shutdown();
/// ```
#[derive(Clone, Default)]
pub struct FireRecorder {
    inner: Arc<RecorderState>,
}

#[derive(Default)]
struct RecorderState {
    fires: Mutex<Vec<(TimerId, Instant)>>,
    changed: Condvar,
}

impl FireRecorder {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Timer callback that records into the recorder passed as user data.
    pub fn on_fire(id: TimerId, recorder: &FireRecorder) {
        recorder.record(id);
    }

    /// Record one expiration of `id` at the current time.
    pub fn record(&self, id: TimerId) {
        self.fires().push((id, Instant::now()));
        self.inner.changed.notify_all();
    }

    /// Total number of recorded fires.
    pub fn count(&self) -> usize {
        self.fires().len()
    }

    /// Number of recorded fires for one timer.
    pub fn count_for(&self, id: TimerId) -> usize {
        self.fires().iter().filter(|(fired, _)| *fired == id).count()
    }

    /// Handles in the order they fired.
    pub fn handles(&self) -> Vec<TimerId> {
        self.fires().iter().map(|(id, _)| *id).collect()
    }

    /// Fire times of one timer, oldest first.
    pub fn timestamps(&self, id: TimerId) -> Vec<Instant> {
        self.fires()
            .iter()
            .filter(|(fired, _)| *fired == id)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Gaps between consecutive fires of one timer.
    pub fn spacings(&self, id: TimerId) -> Vec<Duration> {
        self.timestamps(id)
            .windows(2)
            .map(|pair| pair[1].duration_since(pair[0]))
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.fires().clear();
    }

    /// Block until at least `count` fires were recorded.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        let guard = self.fires();
        let (guard, _) = self
            .inner
            .changed
            .wait_timeout_while(guard, timeout, |fires| fires.len() < count)
            .unwrap_or_else(PoisonError::into_inner);
        guard.len() >= count
    }

    fn fires(&self) -> MutexGuard<'_, Vec<(TimerId, Instant)>> {
        self.inner.fires.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for FireRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FireRecorder")
            .field("count", &self.count())
            .finish()
    }
}
