//! Per-timer async backend.
//!
//! Each timer is a task on a dedicated single-worker tokio runtime. The task
//! sleeps on `tokio::time` and calls the dispatcher directly when it fires.
//! A `watch` channel carries the timer's current schedule so it can be
//! re-armed in place. There is no central poll loop.

use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use slotmap::SecondaryMap;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::RegistryConfig;
use crate::core::schedule::Schedule;
use crate::core::types::TimerId;

use super::types::TimerError;
use super::waiter::{Dispatch, Waiter};

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Id of the waiter runtime this thread belongs to, 0 for foreign threads.
    static WORKER_OF: Cell<u64> = const { Cell::new(0) };
}

/// One armed timer: its task and the channel that re-arms it.
struct AsyncTimer {
    schedule: watch::Sender<Schedule>,
    task: JoinHandle<()>,
}

/// Waiter backed by tokio timer tasks.
pub(crate) struct AsyncWaiter {
    id: u64,
    runtime: Option<Runtime>,
    timers: SecondaryMap<TimerId, AsyncTimer>,
    dispatch: Dispatch,
}

impl AsyncWaiter {
    /// Build the runtime that hosts the timer tasks.
    pub(crate) fn start(config: &RegistryConfig, dispatch: Dispatch) -> Result<Self, TimerError> {
        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(config.thread_name.clone())
            .on_thread_start(move || WORKER_OF.with(|worker| worker.set(id)))
            .enable_time()
            .build()
            .map_err(TimerError::EngineStartFailure)?;

        tracing::info!(thread = %config.thread_name, "Async waiter started");

        Ok(Self {
            id,
            runtime: Some(runtime),
            timers: SecondaryMap::new(),
            dispatch,
        })
    }

    fn spawn(&self, id: TimerId, schedule: Schedule) -> Result<AsyncTimer, TimerError> {
        let runtime = self.runtime.as_ref().ok_or_else(|| {
            TimerError::AllocationFailure("async waiter is shutting down".into())
        })?;

        let (tx, rx) = watch::channel(schedule);
        let task = runtime.spawn(run_timer(id, rx, Arc::clone(&self.dispatch)));
        Ok(AsyncTimer { schedule: tx, task })
    }
}

impl Waiter for AsyncWaiter {
    fn arm(&mut self, id: TimerId, schedule: Schedule) -> Result<(), TimerError> {
        let timer = self.spawn(id, schedule)?;
        if let Some(previous) = self.timers.insert(id, timer) {
            previous.task.abort();
        }
        Ok(())
    }

    fn rearm(&mut self, id: TimerId, schedule: Schedule) -> Result<(), TimerError> {
        let timer = self.timers.get(id).ok_or(TimerError::InvalidHandle(id))?;

        if timer.task.is_finished() {
            // The task has exited; start a fresh one.
            let timer = self.spawn(id, schedule)?;
            self.timers.insert(id, timer);
        } else {
            timer.schedule.send_replace(schedule);
        }
        Ok(())
    }

    fn disarm(&mut self, id: TimerId) {
        if let Some(timer) = self.timers.remove(id) {
            timer.task.abort();
        }
    }

    fn armed(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for AsyncWaiter {
    fn drop(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.task.abort();
        }

        let Some(runtime) = self.runtime.take() else {
            return;
        };

        if WORKER_OF.with(Cell::get) == self.id {
            // Stopped from a callback: the runtime cannot wait for its own
            // worker, which exits once the callback returns.
            runtime.shutdown_background();
            tracing::debug!("Async waiter stopped from its own runtime");
            return;
        }

        if Handle::try_current().is_ok() {
            // Dropping a runtime blocks, which tokio forbids in async context.
            // Joining a plain thread that drops it is allowed.
            let slot = Arc::new(Mutex::new(Some(runtime)));
            let spawned = thread::Builder::new()
                .name("metronome-shutdown".into())
                .spawn({
                    let slot = Arc::clone(&slot);
                    move || drop(take_runtime(&slot))
                });
            match spawned {
                Ok(handle) => {
                    if handle.join().is_err() {
                        tracing::error!("Async waiter shutdown thread panicked");
                    }
                    tracing::info!("Async waiter stopped");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to spawn shutdown thread, shutting down in background");
                    if let Some(runtime) = take_runtime(&slot) {
                        runtime.shutdown_background();
                    }
                }
            }
            return;
        }

        drop(runtime);
        tracing::info!("Async waiter stopped");
    }
}

fn take_runtime(slot: &Mutex<Option<Runtime>>) -> Option<Runtime> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

/// Body of one timer task.
async fn run_timer(id: TimerId, mut schedule_rx: watch::Receiver<Schedule>, dispatch: Dispatch) {
    let mut schedule = *schedule_rx.borrow_and_update();

    loop {
        let period = schedule.interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut fired = false;

        loop {
            let waiting = schedule.is_periodic() || !fired;

            tokio::select! {
                _ = ticker.tick(), if waiting => {
                    fired = true;
                    dispatch(id);
                }
                changed = schedule_rx.changed() => {
                    if changed.is_err() {
                        // Sender dropped: the timer was disarmed.
                        return;
                    }
                    schedule = *schedule_rx.borrow_and_update();
                    break;
                }
            }
        }
    }
}
