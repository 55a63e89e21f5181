//! Error types for djq-player
//!
//! Per-track failures (`DurationExceeded`, `Acquisition`, `PlaybackStart`) are
//! handled inside the playback loop and never escape it. `ConnectivityLost`
//! is the one session-fatal failure.

use thiserror::Error;

/// Main error type for djq-player
#[derive(Error, Debug)]
pub enum Error {
    /// Track is longer than the configured limit
    #[error("Track is {actual_minutes} minutes long (limit {limit_minutes})")]
    DurationExceeded { actual_minutes: u64, limit_minutes: u64 },

    /// Local file could not be materialized
    #[error("Acquisition failed: {0}")]
    Acquisition(String),

    /// Sink refused to start playback after all retries
    #[error("Playback start failed: {0}")]
    PlaybackStart(String),

    /// Voice connection did not become ready
    #[error("Voice connection lost")]
    ConnectivityLost,

    /// External dependency (resolver, recommender) failed
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings store errors
    #[error("Settings error: {0}")]
    Settings(#[from] djq_common::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Convenience Result type using djq-player Error
pub type Result<T> = std::result::Result<T, Error>;
