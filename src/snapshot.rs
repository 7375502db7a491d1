//! Export/import data shape for warm restarts.
//!
//! A [`RegistrySnapshot`] is a convenience hand-off, not a durable log: it holds
//! the shared window length and every key's raw timestamps as they were when
//! exported.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{RateTrackerError, Timestamp};

/// Point-in-time copy of a [`CounterRegistry`](crate::CounterRegistry).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Window length shared by every counter, in milliseconds.
    pub window_duration_ms: u64,
    /// Stored timestamps per key, oldest first.
    pub entries: HashMap<String, Vec<Timestamp>>,
}

impl RegistrySnapshot {
    /// Encode as JSON.
    pub fn to_json(&self) -> Result<String, RateTrackerError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON produced by [`to_json`](Self::to_json).
    pub fn from_json(json: &str) -> Result<Self, RateTrackerError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check that every key's timestamps are in non-decreasing order.
    pub(crate) fn validate_order(&self) -> Result<(), RateTrackerError> {
        for (key, timestamps) in &self.entries {
            if timestamps.windows(2).any(|pair| pair[0] > pair[1]) {
                return Err(RateTrackerError::InvalidSnapshot(format!(
                    "timestamps for key {key:?} are not in ascending order"
                )));
            }
        }

        Ok(())
    }
}
