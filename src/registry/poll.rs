//! Central-wait backend.
//!
//! Every timer owns a non-blocking `timerfd` on `CLOCK_MONOTONIC`. A single
//! waiter thread polls all of them plus an `eventfd` used to interrupt the
//! poll when the set changes or on shutdown. The poll never blocks longer than
//! the configured timeout.
//!
//! The waiter polls a snapshot of reference-counted descriptors, so a timer
//! cancelled mid-poll keeps its descriptor open (and its number unused) until
//! the snapshot is dropped.

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rustix::event::{EventfdFlags, PollFd, PollFlags, eventfd, poll};
use rustix::io::Errno;
use rustix::time::{
    Itimerspec, TimerfdClockId, TimerfdFlags, TimerfdTimerFlags, Timespec, timerfd_create,
    timerfd_settime,
};
use slotmap::SecondaryMap;

use crate::config::{MAX_POLL_TIMEOUT, RegistryConfig};
use crate::core::schedule::Schedule;
use crate::core::types::{TimerId, TimerKind};

use super::types::TimerError;
use super::waiter::{Dispatch, Waiter};

/// State shared between the owning registry and the waiter thread.
struct Shared {
    timers: Mutex<SecondaryMap<TimerId, Arc<OwnedFd>>>,
    wake: OwnedFd,
    stop: AtomicBool,
}

impl Shared {
    fn timers(&self) -> MutexGuard<'_, SecondaryMap<TimerId, Arc<OwnedFd>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Interrupt a poll in progress.
    fn wake(&self) {
        match rustix::io::write(&self.wake, &1u64.to_ne_bytes()) {
            // A saturated counter means the waiter is already due to wake up.
            Ok(_) | Err(Errno::AGAIN) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to wake timer waiter"),
        }
    }
}

/// Waiter backed by timerfds and one polling thread.
pub(crate) struct PollWaiter {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl PollWaiter {
    /// Create the wake descriptor and spawn the waiter thread.
    pub(crate) fn start(config: &RegistryConfig, dispatch: Dispatch) -> Result<Self, TimerError> {
        let wake = eventfd(0, EventfdFlags::CLOEXEC | EventfdFlags::NONBLOCK)
            .map_err(|e| TimerError::EngineStartFailure(e.into()))?;

        let shared = Arc::new(Shared {
            timers: Mutex::new(SecondaryMap::new()),
            wake,
            stop: AtomicBool::new(false),
        });

        let poll_timeout = config.poll_timeout.clamp(Duration::from_millis(1), MAX_POLL_TIMEOUT);
        let thread = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run(&shared, poll_timeout, &dispatch)
            })
            .map_err(TimerError::EngineStartFailure)?;

        tracing::info!(
            thread = %config.thread_name,
            poll_timeout = ?poll_timeout,
            "Poll waiter started"
        );

        Ok(Self {
            shared,
            thread: Some(thread),
        })
    }
}

impl Waiter for PollWaiter {
    fn arm(&mut self, id: TimerId, schedule: Schedule) -> Result<(), TimerError> {
        let fd = timerfd_create(
            TimerfdClockId::Monotonic,
            TimerfdFlags::CLOEXEC | TimerfdFlags::NONBLOCK,
        )
        .map_err(|e| TimerError::AllocationFailure(format!("timerfd_create failed: {}", e)))?;

        timerfd_settime(&fd, TimerfdTimerFlags::empty(), &itimerspec(schedule)).map_err(|e| {
            TimerError::WaitPrimitive {
                operation: "arm",
                source: e.into(),
            }
        })?;

        self.shared.timers().insert(id, Arc::new(fd));
        self.shared.wake();
        Ok(())
    }

    fn rearm(&mut self, id: TimerId, schedule: Schedule) -> Result<(), TimerError> {
        let fd = self
            .shared
            .timers()
            .get(id)
            .cloned()
            .ok_or(TimerError::InvalidHandle(id))?;

        timerfd_settime(&*fd, TimerfdTimerFlags::empty(), &itimerspec(schedule)).map_err(|e| {
            TimerError::WaitPrimitive {
                operation: "re-arm",
                source: e.into(),
            }
        })?;
        Ok(())
    }

    fn disarm(&mut self, id: TimerId) {
        let Some(fd) = self.shared.timers().remove(id) else {
            return;
        };

        // Clears pending expirations too, in case the waiter still holds this fd.
        if let Err(e) = timerfd_settime(&*fd, TimerfdTimerFlags::empty(), &disarmed()) {
            tracing::debug!(timer_id = %id, error = %e, "Failed to disarm timerfd");
        }
        self.shared.wake();
    }

    fn armed(&self) -> usize {
        self.shared.timers().len()
    }
}

impl Drop for PollWaiter {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake();
        self.shared.timers().clear();

        let Some(thread) = self.thread.take() else {
            return;
        };

        if thread.thread().id() == thread::current().id() {
            // Dropped from inside a callback: the loop sees `stop` once it returns.
            tracing::debug!("Poll waiter stopped from its own thread");
            return;
        }

        if thread.join().is_err() {
            tracing::error!("Poll waiter thread panicked");
        }
        tracing::info!("Poll waiter stopped");
    }
}

/// Waiter thread body.
fn run(shared: &Shared, poll_timeout: Duration, dispatch: &Dispatch) {
    let timeout = timespec(poll_timeout);
    let mut buf = [0u8; 8];

    while !shared.stop.load(Ordering::Acquire) {
        let armed: Vec<(TimerId, Arc<OwnedFd>)> = shared
            .timers()
            .iter()
            .map(|(id, fd)| (id, Arc::clone(fd)))
            .collect();

        let mut fds = Vec::with_capacity(armed.len() + 1);
        fds.push(PollFd::new(&shared.wake, PollFlags::IN));
        fds.extend(armed.iter().map(|(_, fd)| PollFd::new(&**fd, PollFlags::IN)));

        match poll(&mut fds, Some(&timeout)) {
            Ok(0) => continue,
            Ok(_) => {}
            Err(e) => {
                let backoff = poll_backoff(e, poll_timeout);
                if !backoff.is_zero() {
                    tracing::warn!(error = %e, backoff = ?backoff, "poll failed, retrying");
                    thread::sleep(backoff);
                }
                continue;
            }
        }

        let ready: Vec<bool> = fds
            .iter()
            .map(|fd| fd.revents().contains(PollFlags::IN))
            .collect();
        drop(fds);

        if ready[0] {
            // Reset the eventfd counter; the set is re-read on the next pass anyway.
            let _ = rustix::io::read(&shared.wake, &mut buf[..]);
        }

        for ((id, fd), _) in armed.iter().zip(&ready[1..]).filter(|(_, ready)| **ready) {
            if shared.stop.load(Ordering::Acquire) {
                break;
            }

            match rustix::io::read(&**fd, &mut buf[..]) {
                Ok(n) if n == buf.len() => {
                    let missed = u64::from_ne_bytes(buf).saturating_sub(1);
                    if missed > 0 {
                        tracing::trace!(timer_id = %id, missed, "Timer overran");
                    }
                    dispatch(*id);
                }
                Ok(_) => {}
                // Re-armed or disarmed since the poll returned.
                Err(Errno::AGAIN) => {}
                Err(e) => tracing::debug!(timer_id = %id, error = %e, "Failed to read timerfd"),
            }
        }
    }
}

/// Pause before polling again after `error`. Interrupted polls retry at once.
fn poll_backoff(error: Errno, poll_timeout: Duration) -> Duration {
    if error == Errno::INTR {
        Duration::ZERO
    } else {
        poll_timeout
    }
}

fn timespec(duration: Duration) -> Timespec {
    Timespec {
        tv_sec: duration.as_secs().min(i64::MAX as u64) as _,
        tv_nsec: duration.subsec_nanos() as _,
    }
}

fn itimerspec(schedule: Schedule) -> Itimerspec {
    let it_interval = match schedule.kind() {
        TimerKind::Periodic => timespec(schedule.interval()),
        TimerKind::SingleShot => timespec(Duration::ZERO),
    };

    Itimerspec {
        it_interval,
        it_value: timespec(schedule.interval()),
    }
}

fn disarmed() -> Itimerspec {
    Itimerspec {
        it_interval: timespec(Duration::ZERO),
        it_value: timespec(Duration::ZERO),
    }
}
