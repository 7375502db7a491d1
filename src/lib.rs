#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

mod local;
pub use local::*;

mod clock;
pub use clock::*;

mod snapshot;
pub use snapshot::*;

mod error;
pub use error::*;

mod common;
pub use common::{CleanupIntervalMs, EvictionMode, StaleAfterMs, Timestamp, WindowDurationMs};

#[cfg(test)]
mod tests;
