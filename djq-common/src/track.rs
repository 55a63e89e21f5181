//! Track and session identity types
//!
//! A [`Track`] is created once the resolver has turned a query or URL into
//! metadata. Each queued instance carries its own `entry_id`, so the same URL
//! can sit in several tiers at once and still be addressed unambiguously.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identifier of one voice session (one guild / one voice connection)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Where a track came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrackOrigin {
    /// Explicit play request
    #[default]
    User,
    /// Expanded from a playlist URL
    Playlist,
    /// Named shortcut stored in session settings
    Shortcut,
    /// Injected by the automatic refill
    Autoplay,
}

impl fmt::Display for TrackOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackOrigin::User => write!(f, "user"),
            TrackOrigin::Playlist => write!(f, "playlist"),
            TrackOrigin::Shortcut => write!(f, "shortcut"),
            TrackOrigin::Autoplay => write!(f, "autoplay"),
        }
    }
}

/// Local file state of a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "path", rename_all = "lowercase")]
pub enum FileState {
    /// Nothing materialized yet
    #[default]
    Unset,
    /// Materialized at this path (may since have been evicted)
    Ready(PathBuf),
    /// Preloading found the track unrecoverable; the loop skips it
    Failed,
}

/// How new tracks are placed in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueMode {
    /// Add to the end of the main tier
    #[default]
    Append,
    /// Add to the insert-next tier (jumps ahead of the main tier)
    InsertNext,
}

/// Resolved track metadata plus its local-file state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Queue entry identifier (unique per queued instance)
    pub entry_id: Uuid,
    /// Display title
    pub title: String,
    /// Canonical URL; identity key for caching
    pub url: String,
    /// Duration in seconds, when the resolver knows it
    pub duration_secs: Option<u64>,
    /// Display name of whoever requested the track
    pub requested_by: String,
    /// Origin tag
    pub origin: TrackOrigin,
    /// Local file state
    pub file: FileState,
}

impl Track {
    /// Create a track with a fresh entry id and no local file
    pub fn new(title: impl Into<String>, url: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            title: title.into(),
            url: url.into(),
            duration_secs: None,
            requested_by: requested_by.into(),
            origin: TrackOrigin::User,
            file: FileState::Unset,
        }
    }

    pub fn with_duration(mut self, seconds: u64) -> Self {
        self.duration_secs = Some(seconds);
        self
    }

    pub fn with_origin(mut self, origin: TrackOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Copy of this track under a new entry id (used when loop modes re-queue it)
    ///
    /// A `Failed` mark is dropped so the copy gets a fresh fetch attempt.
    pub fn requeued(&self) -> Self {
        let file = match &self.file {
            FileState::Failed => FileState::Unset,
            other => other.clone(),
        };
        Self {
            entry_id: Uuid::new_v4(),
            file,
            ..self.clone()
        }
    }

    /// Path of the materialized file, if any
    pub fn ready_path(&self) -> Option<&Path> {
        match &self.file {
            FileState::Ready(path) => Some(path.as_path()),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.file, FileState::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_track_has_no_file() {
        let track = Track::new("Song", "https://example.com/a", "alice");
        assert_eq!(track.file, FileState::Unset);
        assert!(track.ready_path().is_none());
        assert!(!track.is_failed());
        assert_eq!(track.origin, TrackOrigin::User);
    }

    #[test]
    fn test_requeued_keeps_metadata_with_new_entry_id() {
        let mut track = Track::new("Song", "https://example.com/a", "alice").with_duration(200);
        track.file = FileState::Ready(PathBuf::from("/tmp/a.opus"));

        let copy = track.requeued();
        assert_ne!(copy.entry_id, track.entry_id);
        assert_eq!(copy.url, track.url);
        assert_eq!(copy.duration_secs, Some(200));
        assert_eq!(copy.ready_path(), Some(Path::new("/tmp/a.opus")));
    }

    #[test]
    fn test_requeued_forgets_failure() {
        let mut track = Track::new("Song", "https://example.com/a", "alice");
        track.file = FileState::Failed;

        let copy = track.requeued();
        assert_eq!(copy.file, FileState::Unset);
        assert!(!copy.is_failed());
        assert!(track.is_failed());
    }

    #[test]
    fn test_file_state_serialization() {
        let json = serde_json::to_string(&FileState::Ready(PathBuf::from("/x.mp3"))).unwrap();
        assert_eq!(json, r#"{"state":"ready","path":"/x.mp3"}"#);

        let failed = serde_json::to_string(&FileState::Failed).unwrap();
        assert_eq!(failed, r#"{"state":"failed"}"#);
    }

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId(42).to_string(), "42");
    }
}
