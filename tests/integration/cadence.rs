//! Firing cadence integration tests.
//!
//! Timing assertions use generous bounds so they hold on loaded machines.

use crate::common::{backends, mean, registry};
use metronome::TimerKind;
use metronome::testing::FireRecorder;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_periodic_fire_count_over_window() {
    for backend in backends() {
        let registry = registry(backend);
        let recorder = FireRecorder::new();

        let id = registry
            .register(
                Duration::from_millis(100),
                TimerKind::Periodic,
                FireRecorder::on_fire,
                recorder.clone(),
            )
            .unwrap();

        thread::sleep(Duration::from_millis(550));
        assert!(registry.cancel(id));

        let count = recorder.count_for(id);
        assert!(
            (4..=6).contains(&count),
            "{}: expected 4 to 6 fires, got {}",
            backend,
            count
        );

        // Nothing fires once cancel has returned.
        thread::sleep(Duration::from_millis(250));
        assert_eq!(recorder.count_for(id), count, "{}: fired after cancel", backend);
    }
}

#[test]
fn test_periodic_spacing_tracks_interval() {
    for backend in backends() {
        let registry = registry(backend);
        let recorder = FireRecorder::new();

        let id = registry
            .register(
                Duration::from_millis(50),
                TimerKind::Periodic,
                FireRecorder::on_fire,
                recorder.clone(),
            )
            .unwrap();

        assert!(recorder.wait_for_count(6, Duration::from_secs(3)));
        registry.cancel(id);

        let average = mean(&recorder.spacings(id));
        assert!(
            average >= Duration::from_millis(35) && average <= Duration::from_millis(90),
            "{}: mean spacing {:?}",
            backend,
            average
        );
    }
}

#[test]
fn test_first_fire_is_one_interval_after_registration() {
    for backend in backends() {
        let registry = registry(backend);
        let recorder = FireRecorder::new();

        let registered_at = Instant::now();
        let id = registry
            .register(
                Duration::from_millis(150),
                TimerKind::Periodic,
                FireRecorder::on_fire,
                recorder.clone(),
            )
            .unwrap();

        assert!(recorder.wait_for_count(1, Duration::from_secs(2)));
        registry.cancel(id);

        let first = recorder.timestamps(id)[0];
        assert!(first.duration_since(registered_at) >= Duration::from_millis(130));
    }
}

#[test]
fn test_update_speeds_up_timer() {
    for backend in backends() {
        let registry = registry(backend);
        let recorder = FireRecorder::new();

        let id = registry
            .register(
                Duration::from_millis(200),
                TimerKind::Periodic,
                FireRecorder::on_fire,
                recorder.clone(),
            )
            .unwrap();

        assert!(recorder.wait_for_count(1, Duration::from_secs(2)));
        registry
            .update(id, Duration::from_millis(50), TimerKind::Periodic)
            .unwrap();
        recorder.clear();

        thread::sleep(Duration::from_millis(520));
        registry.cancel(id);

        // About ten fires at 50ms; at the old 200ms rate there would be two or three.
        let count = recorder.count_for(id);
        assert!(count >= 6, "{}: only {} fires after update", backend, count);
    }
}

#[test]
fn test_single_shot_fires_exactly_once() {
    for backend in backends() {
        let registry = registry(backend);
        let recorder = FireRecorder::new();

        let id = registry
            .register(
                Duration::from_millis(30),
                TimerKind::SingleShot,
                FireRecorder::on_fire,
                recorder.clone(),
            )
            .unwrap();

        assert!(recorder.wait_for_count(1, Duration::from_secs(2)));
        thread::sleep(Duration::from_millis(200));
        assert_eq!(recorder.count_for(id), 1);
        assert!(!registry.contains(id));
    }
}

#[test]
fn test_independent_timers_keep_their_own_cadence() {
    for backend in backends() {
        let registry = registry(backend);
        let recorder = FireRecorder::new();

        let fast = registry
            .register(
                Duration::from_millis(20),
                TimerKind::Periodic,
                FireRecorder::on_fire,
                recorder.clone(),
            )
            .unwrap();
        let slow = registry
            .register(
                Duration::from_millis(100),
                TimerKind::Periodic,
                FireRecorder::on_fire,
                recorder.clone(),
            )
            .unwrap();

        thread::sleep(Duration::from_millis(450));
        registry.shutdown();

        let fast_count = recorder.count_for(fast);
        let slow_count = recorder.count_for(slow);
        assert!(slow_count >= 2, "{}: slow fired {} times", backend, slow_count);
        assert!(
            fast_count > slow_count * 2,
            "{}: fast {} vs slow {}",
            backend,
            fast_count,
            slow_count
        );
    }
}
