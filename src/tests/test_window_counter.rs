use std::{sync::Arc, thread};

use crate::{EvictionMode, ManualClock, Timestamp, WindowCounter, WindowDurationMs};

fn counter(window_ms: u64, mode: EvictionMode) -> (WindowCounter, ManualClock) {
    let clock = ManualClock::new(Timestamp::from_millis(0));
    let counter = WindowCounter::with_clock(
        WindowDurationMs::try_from(window_ms).unwrap(),
        mode,
        Arc::new(clock.clone()),
    );

    (counter, clock)
}

fn at(clock: &ManualClock, millis: u64) {
    clock.set(Timestamp::from_millis(millis));
}

#[test]
fn empty_counter_counts_zero() {
    let (counter, _clock) = counter(10, EvictionMode::Exact);

    assert_eq!(counter.count_in_window(), 0);
    assert!(counter.events().is_empty());
}

#[test]
fn exact_mode_worked_example() {
    let (counter, clock) = counter(10, EvictionMode::Exact);

    for t in [0, 1, 2] {
        at(&clock, t);
        counter.record_event();
    }

    at(&clock, 5);
    assert_eq!(counter.count_in_window(), 3);

    at(&clock, 11);
    counter.record_event();

    // Window is (2, 12]: the event at t=2 sits on the boundary and is expired.
    at(&clock, 12);
    assert_eq!(counter.count_in_window(), 1);
    assert_eq!(counter.events(), vec![Timestamp::from_millis(11)]);
}

#[test]
fn exact_mode_boundary_is_exclusive_at_lower_edge() {
    for (now, expected) in [(100, 1), (105, 1), (109, 1), (110, 0), (111, 0)] {
        let (counter, clock) = counter(10, EvictionMode::Exact);

        at(&clock, 100);
        counter.record_event();

        at(&clock, now);
        assert_eq!(counter.count_in_window(), expected, "now = {now}");
    }
}

#[test]
fn exact_mode_matches_reference_count() {
    let window = 7;
    let (counter, clock) = counter(window, EvictionMode::Exact);
    let schedule: Vec<u64> = vec![0, 1, 1, 3, 6, 7, 7, 8, 12, 13, 20, 21, 27, 35];

    let mut recorded: Vec<u64> = Vec::new();
    for now in 0..45u64 {
        at(&clock, now);

        for _ in schedule.iter().filter(|&&t| t == now) {
            counter.record_event();
            recorded.push(now);
        }

        let expected = recorded
            .iter()
            .filter(|&&t| t + window > now && t <= now)
            .count();
        assert_eq!(counter.count_in_window(), expected, "now = {now}");
    }
}

#[test]
fn count_never_exceeds_records() {
    let (counter, clock) = counter(1_000, EvictionMode::Exact);

    for i in 0..50u64 {
        at(&clock, i * 10);
        counter.record_event();
        assert!(counter.count_in_window() <= (i + 1) as usize);
    }

    assert_eq!(counter.count_in_window(), 50);
}

#[test]
fn repeated_count_is_idempotent() {
    let (counter, clock) = counter(10, EvictionMode::Exact);

    for t in [0, 4, 8] {
        at(&clock, t);
        counter.record_event();
    }

    at(&clock, 14);
    let first = counter.count_in_window();
    let second = counter.count_in_window();

    assert_eq!(first, 1);
    assert_eq!(first, second);
}

#[test]
fn repeated_count_is_idempotent_in_batched_mode() {
    let window = 10;
    let (counter, clock) = counter(window, EvictionMode::Batched);

    let mut recorded: Vec<u64> = Vec::new();
    for now in 0..120u64 {
        at(&clock, now);

        if now % 3 == 0 {
            counter.record_event();
            recorded.push(now);
        }

        let first = counter.count_in_window();
        let second = counter.count_in_window();
        assert_eq!(first, second, "now = {now}");

        let exact = recorded.iter().filter(|&&t| t + window > now).count();
        let loose = recorded.iter().filter(|&&t| t + 2 * window > now).count();
        assert!(exact <= first && first <= loose, "now = {now}");
    }
}

#[test]
fn repeated_count_is_idempotent_when_horizon_refreshes() {
    let (counter, clock) = counter(10, EvictionMode::Batched);

    for t in [0, 4, 8] {
        at(&clock, t);
        counter.record_event();
    }

    // Horizon is 0; 0 + 10 < 11, so the first count refreshes it to 11.
    at(&clock, 11);
    let first = counter.count_in_window();
    let second = counter.count_in_window();

    assert_eq!(first, 2);
    assert_eq!(first, second);
}

#[test]
fn count_does_not_append() {
    let (counter, clock) = counter(10, EvictionMode::Exact);

    at(&clock, 3);
    counter.record_event();
    counter.count_in_window();
    counter.count_in_window();

    assert_eq!(counter.events(), vec![Timestamp::from_millis(3)]);
}

#[test]
fn record_evicts_before_append() {
    let (counter, clock) = counter(10, EvictionMode::Exact);

    at(&clock, 0);
    counter.record_event();
    at(&clock, 10);
    counter.record_event();

    assert_eq!(counter.events(), vec![Timestamp::from_millis(10)]);
}

#[test]
fn clock_stepping_back_keeps_sequence_sorted() {
    let (counter, clock) = counter(10, EvictionMode::Exact);

    at(&clock, 50);
    counter.record_event();
    at(&clock, 45);
    counter.record_event();

    assert_eq!(
        counter.events(),
        vec![Timestamp::from_millis(50), Timestamp::from_millis(50)]
    );
    assert_eq!(counter.count_in_window(), 2);

    at(&clock, 60);
    assert_eq!(counter.count_in_window(), 0);
}

#[test]
fn batched_mode_worked_example_keeps_stale_events() {
    let (counter, clock) = counter(10, EvictionMode::Batched);

    for t in [0, 1, 2] {
        at(&clock, t);
        counter.record_event();
    }

    at(&clock, 5);
    assert_eq!(counter.count_in_window(), 3);

    // Horizon refreshes to 11: events at or before 1 are dropped.
    at(&clock, 11);
    counter.record_event();

    // Horizon is still 11, so the event at 2 survives one exact mode would drop.
    at(&clock, 12);
    assert_eq!(counter.count_in_window(), 2);
    assert_eq!(
        counter.events(),
        vec![Timestamp::from_millis(2), Timestamp::from_millis(11)]
    );
}

#[test]
fn batched_mode_refreshes_horizon_once_per_window() {
    let (counter, clock) = counter(10, EvictionMode::Batched);

    at(&clock, 0);
    counter.record_event();

    // Horizon is still 0, so the event at 0 outlives its exact expiry.
    at(&clock, 10);
    assert_eq!(counter.count_in_window(), 1);

    // 0 + 10 < 11 moves the horizon to 11.
    at(&clock, 11);
    assert_eq!(counter.count_in_window(), 0);

    at(&clock, 15);
    counter.record_event();

    // Horizon moves to 24; the event at 15 is still inside (14, 24].
    at(&clock, 24);
    assert_eq!(counter.count_in_window(), 1);

    // Horizon stays at 24 until now passes 34.
    at(&clock, 25);
    assert_eq!(counter.count_in_window(), 1);
    at(&clock, 34);
    assert_eq!(counter.count_in_window(), 1);

    at(&clock, 35);
    assert_eq!(counter.count_in_window(), 0);
}

#[test]
fn batched_mode_slack_is_bounded_by_two_windows() {
    let window = 10;
    let (counter, clock) = counter(window, EvictionMode::Batched);

    at(&clock, 0);
    counter.record_event();

    // Horizon stays at construction time (0) until now passes 0 + window.
    for now in 1..=window {
        at(&clock, now);
        assert_eq!(counter.count_in_window(), 1, "now = {now}");
    }

    // The refresh at window + 1 drops the event for good.
    for now in window + 1..=3 * window {
        at(&clock, now);
        assert_eq!(counter.count_in_window(), 0, "now = {now}");
    }
}

#[test]
fn batched_mode_drops_event_by_two_windows_without_intermediate_reads() {
    let window = 10;
    let (counter, clock) = counter(window, EvictionMode::Batched);

    at(&clock, 0);
    counter.record_event();

    at(&clock, 2 * window);
    assert_eq!(counter.count_in_window(), 0);
}

#[test]
fn batched_mode_is_never_looser_than_twice_the_window() {
    let window = 5;
    let (counter, clock) = counter(window, EvictionMode::Batched);

    for t in 0..40u64 {
        at(&clock, t);
        counter.record_event();

        let count = counter.count_in_window() as u64;
        // Exact count would be `window`; batched keeps at most two windows' worth.
        assert!(count >= window.min(t + 1), "t = {t}");
        assert!(count <= 2 * window, "t = {t}");
    }
}

#[test]
fn concurrent_records_are_not_lost() {
    let clock = ManualClock::new(Timestamp::from_millis(1_000));
    let counter = Arc::new(WindowCounter::with_clock(
        WindowDurationMs::try_from(60_000).unwrap(),
        EvictionMode::Exact,
        Arc::new(clock),
    ));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let counter = Arc::clone(&counter);
            thread::spawn(move || {
                for _ in 0..500 {
                    counter.record_event();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(counter.count_in_window(), 4_000);
}

#[test]
fn retire_if_stale_requires_empty_and_idle() {
    let (counter, clock) = counter(10, EvictionMode::Exact);

    at(&clock, 0);
    counter.record_event();

    // Still holds an event.
    at(&clock, 5);
    assert!(!counter.retire_if_stale(1));

    // Empty, but last activity at 0 is only 15 ms ago.
    at(&clock, 15);
    assert!(!counter.retire_if_stale(20));

    at(&clock, 20);
    assert!(counter.retire_if_stale(20));

    // A retired counter refuses records.
    assert!(!counter.try_record_event());
    assert_eq!(counter.count_in_window(), 0);
}

#[test]
fn seeded_counter_does_not_evict_until_accessed() {
    let clock = ManualClock::new(Timestamp::from_millis(100));
    let counter = WindowCounter::with_events(
        WindowDurationMs::try_from(10).unwrap(),
        EvictionMode::Exact,
        Arc::new(clock.clone()),
        [50, 95, 99].into_iter().map(Timestamp::from_millis).collect(),
    );

    assert_eq!(counter.events().len(), 3);
    assert_eq!(counter.count_in_window(), 2);
}
