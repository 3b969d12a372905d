//! Registry lifecycle integration tests.

use crate::common::{backends, registry, wait_until};
use metronome::testing::FireRecorder;
use metronome::{RegistryState, TimerError, TimerKind, TimerRegistry};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_waiter_runs_only_while_timers_exist() {
    for backend in backends() {
        let registry = registry(backend);
        assert_eq!(registry.state(), RegistryState::Stopped);

        let a = registry
            .register_fn(Duration::from_secs(10), TimerKind::Periodic, |_| {})
            .unwrap();
        let b = registry
            .register_fn(Duration::from_secs(10), TimerKind::Periodic, |_| {})
            .unwrap();
        assert_eq!(registry.state(), RegistryState::Running);

        registry.cancel(a);
        assert_eq!(registry.state(), RegistryState::Running);
        registry.cancel(b);
        assert_eq!(registry.state(), RegistryState::Stopped);
    }
}

#[test]
fn test_reinitialisation_after_shutdown() {
    for backend in backends() {
        let registry = registry(backend);

        for _ in 0..3 {
            let recorder = FireRecorder::new();
            let id = registry
                .register(
                    Duration::from_millis(15),
                    TimerKind::Periodic,
                    FireRecorder::on_fire,
                    recorder.clone(),
                )
                .unwrap();

            assert!(recorder.wait_for_count(2, Duration::from_secs(2)));
            registry.shutdown();
            assert!(!registry.contains(id));
            assert!(!registry.is_running());
        }
    }
}

#[test]
fn test_cancelled_handle_cannot_be_updated() {
    for backend in backends() {
        let registry = registry(backend);
        let id = registry
            .register_fn(Duration::from_millis(50), TimerKind::Periodic, |_| {})
            .unwrap();

        assert!(registry.cancel(id));
        assert!(!registry.cancel(id));

        let result = registry.update(id, Duration::from_millis(10), TimerKind::Periodic);
        assert!(matches!(result, Err(TimerError::InvalidHandle(_))));
    }
}

#[test]
fn test_zero_interval_rejected() {
    for backend in backends() {
        let registry = registry(backend);
        let keep = registry
            .register_fn(Duration::from_secs(10), TimerKind::Periodic, |_| {})
            .unwrap();

        let result = registry.register_fn(Duration::ZERO, TimerKind::SingleShot, |_| {});
        assert!(matches!(result, Err(TimerError::InvalidInterval)));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(keep));
        registry.shutdown();
    }
}

#[test]
fn test_callback_can_stop_the_registry() {
    for backend in backends() {
        let registry = registry(backend);
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = registry.clone();

        registry
            .register(
                Duration::from_millis(10),
                TimerKind::Periodic,
                move |_, fired: &Arc<AtomicUsize>| {
                    fired.fetch_add(1, Ordering::SeqCst);
                    handle.shutdown();
                },
                Arc::clone(&fired),
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || !registry.is_running()));
        thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}

#[test]
fn test_callback_can_register_another_timer() {
    for backend in backends() {
        let registry = registry(backend);
        let recorder = FireRecorder::new();
        let handle = registry.clone();
        let chained = recorder.clone();

        registry
            .register_fn(Duration::from_millis(10), TimerKind::SingleShot, move |_| {
                let _ = handle.register(
                    Duration::from_millis(10),
                    TimerKind::SingleShot,
                    FireRecorder::on_fire,
                    chained.clone(),
                );
            })
            .unwrap();

        assert!(recorder.wait_for_count(1, Duration::from_secs(2)));
        assert!(wait_until(Duration::from_secs(2), || registry.is_empty()));
        registry.shutdown();
    }
}

#[test]
fn test_user_data_dropped_after_cancel() {
    for backend in backends() {
        let registry = registry(backend);
        let data = Arc::new(());

        let id = registry
            .register(
                Duration::from_secs(10),
                TimerKind::Periodic,
                |_, _: &Arc<()>| {},
                Arc::clone(&data),
            )
            .unwrap();
        assert_eq!(Arc::strong_count(&data), 2);

        registry.cancel(id);
        assert!(wait_until(Duration::from_secs(1), || Arc::strong_count(&data) == 1));
    }
}

#[test]
fn test_dropping_last_handle_stops_timers() {
    for backend in backends() {
        let recorder = FireRecorder::new();
        {
            let registry = TimerRegistry::new(crate::common::test_config(backend));
            registry
                .register(
                    Duration::from_millis(10),
                    TimerKind::Periodic,
                    FireRecorder::on_fire,
                    recorder.clone(),
                )
                .unwrap();
            assert!(recorder.wait_for_count(1, Duration::from_secs(2)));
        }

        // Allow a dispatch that was already in flight.
        thread::sleep(Duration::from_millis(50));
        let after = recorder.count();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(recorder.count(), after);
    }
}

#[test]
fn test_shutdown_inside_tokio_runtime_waits_for_running_callback() {
    for backend in backends() {
        let registry = registry(backend);
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let (s, f) = (Arc::clone(&started), Arc::clone(&finished));
        registry
            .register_fn(Duration::from_millis(10), TimerKind::Periodic, move |_| {
                s.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(300));
                f.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || {
            started.load(Ordering::SeqCst) > 0
        }));

        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        runtime.block_on(async { registry.shutdown() });

        // The callback in progress completed before shutdown returned.
        assert_eq!(
            finished.load(Ordering::SeqCst),
            started.load(Ordering::SeqCst),
            "{}: callback still running after shutdown",
            backend
        );
        let after = finished.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        assert_eq!(started.load(Ordering::SeqCst), after);
        assert!(!registry.is_running());
    }
}

#[test]
fn test_last_cancel_inside_tokio_runtime_stops_waiter() {
    for backend in backends() {
        let registry = registry(backend);
        let recorder = FireRecorder::new();

        let id = registry
            .register(
                Duration::from_millis(10),
                TimerKind::Periodic,
                FireRecorder::on_fire,
                recorder.clone(),
            )
            .unwrap();
        assert!(recorder.wait_for_count(2, Duration::from_secs(2)));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let handle = registry.clone();
        assert!(runtime.block_on(async move { handle.cancel(id) }));

        let after = recorder.count();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(recorder.count(), after);
        assert!(!registry.is_running());
    }
}
