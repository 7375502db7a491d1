use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{Clock, EvictionMode, SystemClock, Timestamp, WindowDurationMs};

/// Sliding-window event log for a single key.
///
/// Stores the timestamp of every event still inside the window and reports how
/// many there are. Expired timestamps are dropped lazily, on every
/// [`record_event`](Self::record_event) and [`count_in_window`](Self::count_in_window).
///
/// # Window semantics
///
/// The window is the half-open interval `(now - window, now]`: an event recorded
/// exactly `window` milliseconds ago is already expired.
///
/// With [`EvictionMode::Batched`] the cutoff is taken from a cached horizon that
/// is refreshed at most once per window, so expired events may be counted for up
/// to one extra window.
///
/// # Thread Safety
///
/// All state lives behind one [`parking_lot::Mutex`], held for the whole
/// evict-then-append or evict-then-read sequence. Callers never observe a
/// partially evicted sequence.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use ratetracker::{EvictionMode, ManualClock, Timestamp, WindowCounter, WindowDurationMs};
///
/// let clock = ManualClock::new(Timestamp::from_millis(0));
/// let counter = WindowCounter::with_clock(
///     WindowDurationMs::try_from(10).unwrap(),
///     EvictionMode::Exact,
///     Arc::new(clock.clone()),
/// );
///
/// counter.record_event();
/// clock.advance(5);
/// counter.record_event();
/// assert_eq!(counter.count_in_window(), 2);
///
/// clock.advance(5);
/// assert_eq!(counter.count_in_window(), 1);
/// ```
pub struct WindowCounter {
    window_duration_ms: WindowDurationMs,
    eviction_mode: EvictionMode,
    clock: Arc<dyn Clock>,
    state: Mutex<CounterState>,
}

struct CounterState {
    events: VecDeque<Timestamp>,
    horizon: Timestamp,
    last_active: Timestamp,
    // Set once the registry has dropped this counter; a retired counter stays empty.
    retired: bool,
}

impl CounterState {
    /// Drop expired events from the front of the sequence.
    ///
    /// Only reachable through a locked [`WindowCounter`], so it can never run
    /// against a sequence another thread is mutating.
    fn evict(&mut self, now: Timestamp, window_ms: u64, mode: EvictionMode) -> usize {
        let cutoff_at = match mode {
            EvictionMode::Exact => now,
            EvictionMode::Batched => {
                if self.horizon.saturating_add_ms(window_ms) < now {
                    self.horizon = now;
                }
                self.horizon
            }
        };

        let before = self.events.len();

        while let Some(oldest) = self.events.front()
            && oldest.is_expired_at(cutoff_at, window_ms)
        {
            self.events.pop_front();
        }

        before - self.events.len()
    }
}

impl WindowCounter {
    /// Create an empty counter using the system clock and exact eviction.
    pub fn new(window_duration_ms: WindowDurationMs) -> Self {
        Self::with_clock(
            window_duration_ms,
            EvictionMode::default(),
            Arc::new(SystemClock),
        )
    }

    /// Create an empty counter reading time from `clock`.
    ///
    /// The batched-eviction horizon starts at the clock's current time.
    pub fn with_clock(
        window_duration_ms: WindowDurationMs,
        eviction_mode: EvictionMode,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_events(window_duration_ms, eviction_mode, clock, VecDeque::new())
    } // end constructor

    /// Seed a counter with already-sorted timestamps, without evicting anything.
    pub(crate) fn with_events(
        window_duration_ms: WindowDurationMs,
        eviction_mode: EvictionMode,
        clock: Arc<dyn Clock>,
        events: VecDeque<Timestamp>,
    ) -> Self {
        let now = clock.now();
        let last_active = events.back().copied().map_or(now, |newest| newest.max(now));

        Self {
            window_duration_ms,
            eviction_mode,
            clock,
            state: Mutex::new(CounterState {
                events,
                horizon: now,
                last_active,
                retired: false,
            }),
        }
    }

    /// Window length this counter was created with.
    pub fn window_duration_ms(&self) -> WindowDurationMs {
        self.window_duration_ms
    }

    /// Eviction mode this counter was created with.
    pub fn eviction_mode(&self) -> EvictionMode {
        self.eviction_mode
    }

    /// Record one event at the current time.
    ///
    /// Expired events are evicted before the new timestamp is appended. If the
    /// clock reads earlier than the newest stored event, the newest timestamp is
    /// reused so the sequence stays sorted.
    pub fn record_event(&self) {
        self.try_record_event();
    }

    /// Record one event unless the counter has been retired by a registry sweep.
    pub(crate) fn try_record_event(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if state.retired {
            return false;
        }

        self.evict_locked(&mut state, now);

        let timestamp = match state.events.back() {
            Some(&newest) if newest > now => newest,
            _ => now,
        };

        state.events.push_back(timestamp);
        state.last_active = state.last_active.max(now);

        true
    } // end method try_record_event

    /// Number of events currently inside the window.
    ///
    /// Runs an eviction pass first; never appends.
    pub fn count_in_window(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.state.lock();

        self.evict_locked(&mut state, now);

        state.events.len()
    } // end method count_in_window

    /// Copy of the stored timestamps, oldest first, without evicting.
    ///
    /// May include events that a subsequent count would drop.
    pub fn events(&self) -> Vec<Timestamp> {
        self.state.lock().events.iter().copied().collect()
    }

    /// Retire the counter if it is empty and has been idle for `stale_after_ms`.
    ///
    /// Returns `true` when the counter is (now or already) retired. A retired
    /// counter rejects further records, so the registry can drop it without
    /// losing events recorded through a reference taken before the sweep.
    pub(crate) fn retire_if_stale(&self, stale_after_ms: u64) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if state.retired {
            return true;
        }

        self.evict_locked(&mut state, now);

        if state.events.is_empty() && state.last_active.saturating_add_ms(stale_after_ms) <= now {
            state.retired = true;
        }

        state.retired
    }

    fn evict_locked(&self, state: &mut CounterState, now: Timestamp) {
        let evicted = state.evict(now, *self.window_duration_ms, self.eviction_mode);

        if evicted > 0 {
            tracing::trace!(
                evicted,
                remaining = state.events.len(),
                "evicted expired events"
            );
        }
    }
} // end of impl

impl fmt::Debug for WindowCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowCounter")
            .field("window_duration_ms", &self.window_duration_ms)
            .field("eviction_mode", &self.eviction_mode)
            .finish_non_exhaustive()
    }
}
