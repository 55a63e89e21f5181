//! External collaborator contracts
//!
//! The engine never talks to a real metadata service, downloader or voice
//! connection directly. Implementations of these traits must off-load any
//! blocking work (`spawn_blocking`) so one stuck call cannot stall other
//! sessions.

use async_trait::async_trait;
use djq_common::{SessionId, Track};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::oneshot;

/// Classified resolver failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("No results for {0}")]
    NotFound(String),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Resolver error: {0}")]
    Other(String),
}

impl ResolveError {
    /// Failures the health monitor should hear about
    pub fn is_network_failure(&self) -> bool {
        matches!(self, ResolveError::Connectivity(_) | ResolveError::RateLimited(_))
    }
}

/// Turns a query or URL into track metadata
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, query: &str, requested_by: &str) -> Result<Track, ResolveError>;

    /// Expand a playlist URL into at most `limit` tracks
    ///
    /// Returns the tracks plus the number of entries that were skipped.
    async fn resolve_playlist(
        &self,
        url: &str,
        requested_by: &str,
        limit: usize,
    ) -> Result<(Vec<Track>, usize), ResolveError>;
}

/// Media fetch failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Checked before downloading; nothing was written
    #[error("Track is {actual_minutes} minutes long (limit {limit_minutes})")]
    DurationExceeded { actual_minutes: u64, limit_minutes: u64 },

    #[error("Download failed: {0}")]
    Failed(String),
}

impl From<FetchError> for crate::Error {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::DurationExceeded {
                actual_minutes,
                limit_minutes,
            } => crate::Error::DurationExceeded {
                actual_minutes,
                limit_minutes,
            },
            FetchError::Failed(msg) => crate::Error::Acquisition(msg),
        }
    }
}

/// Turns a canonical URL into a local file
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Write the media for `url` at `target_stem` plus an extension of the
    /// fetcher's choosing; return the written path
    ///
    /// Must be safe to call concurrently for distinct stems.
    async fn fetch(&self, url: &str, target_stem: &Path) -> Result<PathBuf, FetchError>;
}

/// How the sink should treat a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecHint {
    /// Already Opus; stream without transcoding
    OpusPassthrough,
    /// Decode to PCM
    Pcm,
}

impl CodecHint {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("opus") => CodecHint::OpusPassthrough,
            _ => CodecHint::Pcm,
        }
    }
}

/// One playable source; consumed by a single `play` call
#[derive(Debug)]
pub struct AudioSource {
    pub path: PathBuf,
    pub codec: CodecHint,
}

impl AudioSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let codec = CodecHint::for_path(&path);
        Self { path, codec }
    }
}

/// Sink-side playback failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("Not connected")]
    NotConnected,

    #[error("Already playing")]
    AlreadyPlaying,

    #[error("Sink error: {0}")]
    Other(String),
}

/// Fired exactly once per successful `play` call, with the playback error if any
pub type CompletionSender = oneshot::Sender<Option<SinkError>>;

/// Audio output for one voice connection
#[async_trait]
pub trait Sink: Send + Sync {
    fn is_connected(&self) -> bool;
    fn is_playing(&self) -> bool;
    fn is_paused(&self) -> bool;

    /// Start playback; `done` fires when playback ends (completed or stopped)
    async fn play(&self, source: AudioSource, done: CompletionSender) -> Result<(), SinkError>;

    fn pause(&self);
    fn resume(&self);

    /// Stop the current playback; its completion still fires
    fn stop(&self);

    async fn disconnect(&self);
}

/// Recommendation source for the automatic refill
#[async_trait]
pub trait Recommender: Send + Sync {
    /// Signal that `track` finished playing in `session`
    async fn record_played(&self, session: SessionId, track: &Track);

    async fn recommend(
        &self,
        session: SessionId,
        requested_by: &str,
        count: usize,
    ) -> Result<Vec<Track>, ResolveError>;

    async fn clear_history(&self, session: SessionId);
}
