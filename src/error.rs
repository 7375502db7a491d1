/// Error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum RateTrackerError {
    /// Window duration is not a positive time span.
    #[error("invalid window duration: {0}")]
    InvalidWindowDuration(String),

    /// Stale threshold for the cleanup sweep is invalid.
    #[error("invalid stale threshold: {0}")]
    InvalidStaleAfterMs(String),

    /// Interval for the cleanup loop is invalid.
    #[error("invalid cleanup interval: {0}")]
    InvalidCleanupIntervalMs(String),

    /// A snapshot could not be imported.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// A snapshot could not be encoded or decoded.
    #[error("snapshot serialization error: {0}")]
    Snapshot(#[from] serde_json::Error),
}
