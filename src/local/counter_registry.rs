use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::{
    CleanupIntervalMs, Clock, CounterRegistryOptions, EvictionMode, RateTrackerError,
    RegistrySnapshot, StaleAfterMs, SystemClock, Timestamp, WindowCounter, WindowDurationMs,
};

/// Concurrent map from key to [`WindowCounter`].
///
/// A counter is created on the first [`record_event`](Self::record_event) for a
/// key. Reads never create state: counting an unknown key returns `0`.
///
/// # Thread Safety
///
/// Two levels of locking:
///
/// - The [`DashMap`](dashmap::DashMap) shard lock covers lookup-or-create only.
/// - Each counter's own mutex covers its eviction and append.
///
/// The shard guard is released before the counter operation runs, so calls for
/// different keys do not serialize against each other. When both are held
/// (export and cleanup) the shard lock is always taken first.
///
/// # Memory growth
///
/// Counters are not removed automatically. Call [`cleanup`](Self::cleanup) or
/// start [`run_cleanup_loop`](Self::run_cleanup_loop) to drop counters that have
/// been empty and idle for a while.
///
/// # Examples
///
/// ```no_run
/// use ratetracker::{CounterRegistry, CounterRegistryOptions, WindowDurationMs};
///
/// let registry = CounterRegistry::new(CounterRegistryOptions::new(
///     WindowDurationMs::try_from(1_000).unwrap(),
/// ));
///
/// registry.record_event("10.0.0.1");
/// registry.record_event("10.0.0.1");
///
/// // The caller decides what to do with the count.
/// if registry.count_in_window("10.0.0.1") > 100 {
///     println!("too many requests");
/// }
///
/// // Carry state over a restart.
/// let json = registry.export_state().to_json().unwrap();
/// let snapshot = ratetracker::RegistrySnapshot::from_json(&json).unwrap();
/// let restored = CounterRegistry::with_initial_state(snapshot).unwrap();
/// assert_eq!(restored.count_in_window("10.0.0.1"), 2);
/// ```
pub struct CounterRegistry {
    window_duration_ms: WindowDurationMs,
    eviction_mode: EvictionMode,
    clock: Arc<dyn Clock>,
    counters: DashMap<String, Arc<WindowCounter>>,
    cleanup_loop: Mutex<Option<CleanupLoop>>,
}

struct CleanupLoop {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl CounterRegistry {
    /// Create an empty registry reading time from the system clock.
    pub fn new(options: CounterRegistryOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Create an empty registry reading time from `clock`.
    ///
    /// Every counter the registry creates shares this clock.
    pub fn with_clock(options: CounterRegistryOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            window_duration_ms: options.window_duration_ms,
            eviction_mode: options.eviction_mode,
            clock,
            counters: DashMap::new(),
            cleanup_loop: Mutex::new(None),
        }
    } // end constructor

    /// Rebuild a registry from an exported snapshot, using the system clock and
    /// exact eviction.
    ///
    /// No eviction pass runs here; expired events are dropped on first access.
    pub fn with_initial_state(snapshot: RegistrySnapshot) -> Result<Self, RateTrackerError> {
        Self::with_initial_state_and_clock(
            snapshot,
            EvictionMode::default(),
            Arc::new(SystemClock),
        )
    }

    /// Rebuild a registry from an exported snapshot with an explicit eviction
    /// mode and clock.
    ///
    /// Fails with [`RateTrackerError::InvalidWindowDuration`] if the snapshot's
    /// window is zero, and with [`RateTrackerError::InvalidSnapshot`] if any key's
    /// timestamps are out of order.
    pub fn with_initial_state_and_clock(
        snapshot: RegistrySnapshot,
        eviction_mode: EvictionMode,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RateTrackerError> {
        let window_duration_ms = WindowDurationMs::try_from(snapshot.window_duration_ms)?;
        snapshot.validate_order()?;

        let registry = Self::with_clock(
            CounterRegistryOptions {
                window_duration_ms,
                eviction_mode,
            },
            clock,
        );

        let keys = snapshot.entries.len();

        for (key, timestamps) in snapshot.entries {
            let counter = WindowCounter::with_events(
                window_duration_ms,
                eviction_mode,
                Arc::clone(&registry.clock),
                VecDeque::from(timestamps),
            );
            registry.counters.insert(key, Arc::new(counter));
        }

        tracing::debug!(
            keys,
            window_duration_ms = *window_duration_ms,
            "seeded registry from snapshot"
        );

        Ok(registry)
    }

    /// Window length applied to every counter.
    pub fn window_duration_ms(&self) -> WindowDurationMs {
        self.window_duration_ms
    }

    /// Eviction mode applied to every counter.
    pub fn eviction_mode(&self) -> EvictionMode {
        self.eviction_mode
    }

    /// Record one event for `key`, creating its counter if needed.
    pub fn record_event(&self, key: &str) {
        // A sweep may retire the counter between lookup and record; retry on a fresh one.
        while !self.get_or_create(key).try_record_event() {}
    } // end method record_event

    /// Number of events for `key` inside the window.
    ///
    /// Returns `0` for an unknown key without creating a counter.
    pub fn count_in_window(&self, key: &str) -> usize {
        match self.get(key) {
            Some(counter) => counter.count_in_window(),
            None => 0,
        }
    } // end method count_in_window

    /// Copy the window length and every key's stored timestamps.
    ///
    /// Each counter is locked while its sequence is copied. Events are not
    /// evicted, so the snapshot may include some that have just expired.
    pub fn export_state(&self) -> RegistrySnapshot {
        let entries: HashMap<String, Vec<Timestamp>> = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().events()))
            .collect();

        RegistrySnapshot {
            window_duration_ms: *self.window_duration_ms,
            entries,
        }
    } // end method export_state

    /// Number of keys with a counter.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// `true` if no key has a counter.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// `true` if `key` has a counter.
    pub fn contains_key(&self, key: &str) -> bool {
        self.counters.contains_key(key)
    }

    /// Drop the counter for `key`. Returns `true` if one existed.
    pub fn remove(&self, key: &str) -> bool {
        self.counters.remove(key).is_some()
    }

    /// Remove counters that are empty and have seen no event for `stale_after_ms`.
    ///
    /// Each counter runs an eviction pass first, so a key whose events have all
    /// expired counts as empty. Returns the number of counters removed.
    pub fn cleanup(&self, stale_after_ms: StaleAfterMs) -> usize {
        let mut removed = 0;

        self.counters.retain(|_, counter| {
            if counter.retire_if_stale(*stale_after_ms) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.counters.len(),
                "removed stale counters"
            );
        }

        removed
    } // end method cleanup

    /// Start the background cleanup loop with default settings.
    ///
    /// See [`run_cleanup_loop_with_config`](Self::run_cleanup_loop_with_config).
    pub fn run_cleanup_loop(self: &Arc<Self>) {
        self.run_cleanup_loop_with_config(StaleAfterMs::default(), CleanupIntervalMs::default());
    }

    /// Start a background thread that calls [`cleanup`](Self::cleanup) right away
    /// and then every `interval_ms`.
    ///
    /// Calling this while a loop is running does nothing; the running loop keeps
    /// its configuration. The thread holds only a weak reference and exits once
    /// the registry is dropped.
    pub fn run_cleanup_loop_with_config(
        self: &Arc<Self>,
        stale_after_ms: StaleAfterMs,
        interval_ms: CleanupIntervalMs,
    ) {
        let mut cleanup_loop = self.cleanup_loop.lock();

        if cleanup_loop.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let registry = Arc::downgrade(self);
        let interval = Duration::from_millis(*interval_ms);

        let spawned = thread::Builder::new()
            .name("ratetracker-cleanup".to_string())
            .spawn(move || {
                loop {
                    let Some(registry) = registry.upgrade() else {
                        break;
                    };
                    registry.cleanup(stale_after_ms);
                    drop(registry);

                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                tracing::debug!("cleanup loop stopped");
            });

        match spawned {
            Ok(handle) => {
                tracing::info!(
                    stale_after_ms = *stale_after_ms,
                    interval_ms = *interval_ms,
                    "cleanup loop started"
                );
                *cleanup_loop = Some(CleanupLoop { stop_tx, handle });
            }
            Err(err) => {
                tracing::error!(error = ?err, "Failed to spawn cleanup loop thread");
            }
        }
    } // end method run_cleanup_loop_with_config

    /// Stop the background cleanup loop and wait for its thread to exit.
    ///
    /// Does nothing if no loop is running. The loop can be started again.
    pub fn stop_cleanup_loop(&self) {
        let Some(CleanupLoop { stop_tx, handle }) = self.cleanup_loop.lock().take() else {
            return;
        };

        drop(stop_tx);

        if handle.join().is_err() {
            tracing::error!("cleanup loop thread panicked");
        }
    } // end method stop_cleanup_loop

    fn get(&self, key: &str) -> Option<Arc<WindowCounter>> {
        self.counters.get(key).map(|counter| Arc::clone(counter.value()))
    }

    fn get_or_create(&self, key: &str) -> Arc<WindowCounter> {
        if let Some(counter) = self.get(key) {
            return counter;
        }

        let counter = self.counters.entry(key.to_string()).or_insert_with(|| {
            tracing::debug!(key, "creating window counter");

            Arc::new(WindowCounter::with_clock(
                self.window_duration_ms,
                self.eviction_mode,
                Arc::clone(&self.clock),
            ))
        });

        Arc::clone(counter.value())
    }
} // end of impl

impl fmt::Debug for CounterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterRegistry")
            .field("window_duration_ms", &self.window_duration_ms)
            .field("eviction_mode", &self.eviction_mode)
            .field("keys", &self.counters.len())
            .finish_non_exhaustive()
    }
}
