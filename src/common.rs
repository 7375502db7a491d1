use std::{ops::Deref, time::Duration};

use serde::{Deserialize, Serialize};

use crate::RateTrackerError;

/// An absolute point in time, in milliseconds since the UNIX epoch.
///
/// Timestamps are absolute (not [`Instant`](std::time::Instant)) so that an
/// exported snapshot stays meaningful in a new process.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a timestamp from milliseconds since the UNIX epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the UNIX epoch.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// `true` when `self` is outside the half-open window `(now - window_ms, now]`.
    pub(crate) fn is_expired_at(self, now: Timestamp, window_ms: u64) -> bool {
        self.0
            .checked_add(window_ms)
            .is_some_and(|expires_at| expires_at <= now.0)
    }

    pub(crate) fn saturating_add_ms(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Length of the trailing window over which events are counted.
///
/// Must be at least 1 ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowDurationMs(u64);

impl Deref for WindowDurationMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for WindowDurationMs {
    type Error = RateTrackerError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(RateTrackerError::InvalidWindowDuration(
                "Window duration must be at least 1 ms".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

impl TryFrom<Duration> for WindowDurationMs {
    type Error = RateTrackerError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        let millis = u64::try_from(value.as_millis()).map_err(|_| {
            RateTrackerError::InvalidWindowDuration(
                "Window duration does not fit in u64 milliseconds".to_string(),
            )
        })?;

        Self::try_from(millis)
    }
}

impl From<WindowDurationMs> for Duration {
    fn from(value: WindowDurationMs) -> Self {
        Duration::from_millis(value.0)
    }
}

/// How a counter decides which stored events have left the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionMode {
    /// Recompute the cutoff from the current time on every eviction pass.
    ///
    /// Counts are exact for the half-open window `(now - window, now]`.
    #[default]
    Exact,
    /// Cache a horizon and refresh it at most once per window.
    ///
    /// Cheaper under heavy load. Expired events may be retained for up to one
    /// extra window, so the effective window is at most twice the configured one.
    Batched,
}

/// How long a counter must be empty and idle before a cleanup sweep removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StaleAfterMs(u64);

impl Default for StaleAfterMs {
    /// Returns 10 minutes.
    fn default() -> Self {
        Self(10 * 60 * 1000)
    }
}

impl Deref for StaleAfterMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for StaleAfterMs {
    type Error = RateTrackerError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(RateTrackerError::InvalidStaleAfterMs(
                "Stale threshold must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}

/// Delay between two runs of the background cleanup loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CleanupIntervalMs(u64);

impl Default for CleanupIntervalMs {
    /// Returns 30 seconds.
    fn default() -> Self {
        Self(30 * 1000)
    }
}

impl Deref for CleanupIntervalMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<u64> for CleanupIntervalMs {
    type Error = RateTrackerError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value == 0 {
            Err(RateTrackerError::InvalidCleanupIntervalMs(
                "Cleanup interval must be greater than 0".to_string(),
            ))
        } else {
            Ok(Self(value))
        }
    }
}
