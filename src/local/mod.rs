//! In-process event tracking.
//!
//! State lives in the current process, in a [`DashMap`](dashmap::DashMap) of
//! per-key [`WindowCounter`]s each guarded by its own mutex.
//!
//! # Key Characteristics
//!
//! - **Thread-safe:** Safe for concurrent use across multiple threads
//! - **Per-key concurrency:** Operations on different keys do not serialize
//! - **Lazy eviction:** Expired events are dropped when a key is touched
//! - **Process-scoped:** State is not shared across processes; use
//!   [`CounterRegistry::export_state`] to carry it over a restart
//!
//! # Examples
//!
//! ```no_run
//! use ratetracker::{CounterRegistry, CounterRegistryOptions, WindowDurationMs};
//!
//! let registry = CounterRegistry::new(CounterRegistryOptions::new(
//!     WindowDurationMs::try_from(60_000).unwrap(),
//! ));
//!
//! registry.record_event("client_42");
//! assert_eq!(registry.count_in_window("client_42"), 1);
//! assert_eq!(registry.count_in_window("client_7"), 0);
//! ```

use crate::{EvictionMode, WindowDurationMs};

mod counter_registry;
pub use counter_registry::*;

mod window_counter;
pub use window_counter::*;

/// Configuration for a [`CounterRegistry`].
#[derive(Clone, Debug)]
pub struct CounterRegistryOptions {
    /// Window length applied to every counter the registry creates.
    pub window_duration_ms: WindowDurationMs,
    /// How counters decide which events have expired.
    pub eviction_mode: EvictionMode,
}

impl CounterRegistryOptions {
    /// Options with the given window and exact eviction.
    pub fn new(window_duration_ms: WindowDurationMs) -> Self {
        Self {
            window_duration_ms,
            eviction_mode: EvictionMode::default(),
        }
    }
}
