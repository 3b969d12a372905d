//! Concurrent use of one registry from many threads.

use crate::common::{backends, registry, wait_until};
use metronome::testing::FireRecorder;
use metronome::{TimerError, TimerKind, TimerRegistry};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_register_and_cancel() {
    for backend in backends() {
        let registry = registry(backend);

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let id = registry
                            .register_fn(Duration::from_millis(5), TimerKind::Periodic, |_| {})
                            .unwrap();
                        thread::sleep(Duration::from_millis(1));
                        assert!(registry.cancel(id));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(registry.is_empty());
        assert!(wait_until(Duration::from_secs(1), || !registry.is_running()));
    }
}

#[test]
fn test_concurrent_updates_keep_handles_valid() {
    for backend in backends() {
        let registry = registry(backend);
        let recorder = FireRecorder::new();

        let ids: Vec<_> = (0..4)
            .map(|_| {
                registry
                    .register(
                        Duration::from_millis(20),
                        TimerKind::Periodic,
                        FireRecorder::on_fire,
                        recorder.clone(),
                    )
                    .unwrap()
            })
            .collect();

        let workers: Vec<_> = ids
            .iter()
            .copied()
            .map(|id| {
                let registry = registry.clone();
                thread::spawn(move || {
                    for step in 0..20u64 {
                        let interval = Duration::from_millis(5 + step % 10);
                        registry.update(id, interval, TimerKind::Periodic).unwrap();
                        thread::sleep(Duration::from_millis(2));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(registry.len(), 4);
        assert!(recorder.wait_for_count(20, Duration::from_secs(3)));
        for id in ids {
            assert!(recorder.count_for(id) > 0);
        }
        registry.shutdown();
    }
}

#[test]
fn test_cancel_racing_with_dispatch_is_safe() {
    for backend in backends() {
        let registry = registry(backend);

        for _ in 0..10 {
            let recorder = FireRecorder::new();
            // A second timer keeps the waiter alive, so the race is with dispatch
            // rather than with waiter shutdown.
            let keep = registry
                .register_fn(Duration::from_secs(10), TimerKind::Periodic, |_| {})
                .unwrap();
            let id = registry
                .register(
                    Duration::from_millis(2),
                    TimerKind::Periodic,
                    FireRecorder::on_fire,
                    recorder.clone(),
                )
                .unwrap();
            assert!(recorder.wait_for_count(2, Duration::from_secs(2)));

            let barrier = Arc::new(Barrier::new(4));
            let cancellers: Vec<_> = (0..4)
                .map(|_| {
                    let registry = registry.clone();
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        registry.cancel(id)
                    })
                })
                .collect();

            let removed = cancellers
                .into_iter()
                .map(|c| c.join().unwrap())
                .filter(|removed| *removed)
                .count();
            assert_eq!(removed, 1, "{}: exactly one cancel removes the timer", backend);

            // At most the dispatch already in flight may still land.
            let at_cancel = recorder.count_for(id);
            thread::sleep(Duration::from_millis(30));
            let late = recorder.count_for(id) - at_cancel;
            assert!(late <= 1, "{}: {} expirations after cancel", backend, late);

            assert!(!registry.contains(id));
            registry.cancel(keep);
        }

        assert!(registry.is_empty());
    }
}

#[test]
fn test_capacity_is_enforced_across_threads() {
    for backend in backends() {
        let registry = TimerRegistry::new(crate::common::test_config(backend).with_max_timers(10));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let mut ok = 0;
                    let mut rejected = 0;
                    for _ in 0..5 {
                        match registry.register_fn(
                            Duration::from_secs(10),
                            TimerKind::Periodic,
                            |_| {},
                        ) {
                            Ok(_) => ok += 1,
                            Err(TimerError::AllocationFailure(_)) => rejected += 1,
                            Err(e) => panic!("unexpected error: {}", e),
                        }
                    }
                    (ok, rejected)
                })
            })
            .collect();

        let (ok, rejected) = workers
            .into_iter()
            .map(|w| w.join().unwrap())
            .fold((0, 0), |acc, r| (acc.0 + r.0, acc.1 + r.1));

        assert_eq!(ok, 10);
        assert_eq!(rejected, 10);
        assert_eq!(registry.len(), 10);
        registry.shutdown();
    }
}
