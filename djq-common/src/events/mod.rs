//! Event types for the djq event system
//!
//! Provides the shared event definitions and the EventBus that carries
//! user-facing notifications out of the playback engines.

mod playback_types;
mod queue_types;

pub use playback_types::PlaybackState;
pub use queue_types::QueueChangeTrigger;

use crate::track::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Player event types
///
/// Every terminal per-track failure maps to exactly one variant naming the
/// track. A session-fatal failure maps to exactly one `SessionAborted`.
/// Events serialize with a `type` tag so a UI layer can forward them as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PlayerEvent {
    /// Playback of a track started
    TrackStarted {
        session_id: SessionId,
        entry_id: Uuid,
        title: String,
        url: String,
        requested_by: String,
        duration_secs: Option<u64>,
        timestamp: DateTime<Utc>,
    },

    /// Playback of a track ended (completed, skipped or sink error)
    TrackFinished {
        session_id: SessionId,
        entry_id: Uuid,
        title: String,
        /// Sink error, if playback ended abnormally
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// Cache miss: the track is being fetched before it can play
    Downloading {
        session_id: SessionId,
        title: String,
        timestamp: DateTime<Utc>,
    },

    /// Track was marked unrecoverable while preloading and is skipped
    TrackUnavailable {
        session_id: SessionId,
        title: String,
        timestamp: DateTime<Utc>,
    },

    /// Track is longer than the configured limit; never downloaded
    DurationExceeded {
        session_id: SessionId,
        title: String,
        actual_minutes: u64,
        limit_minutes: u64,
        timestamp: DateTime<Utc>,
    },

    /// Local file could not be materialized
    AcquisitionFailed {
        session_id: SessionId,
        title: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Sink refused to start the track after all retries
    PlaybackStartFailed {
        session_id: SessionId,
        title: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Playback state changed (Idle / Playing / Paused)
    PlaybackStateChanged {
        session_id: SessionId,
        old_state: PlaybackState,
        new_state: PlaybackState,
        timestamp: DateTime<Utc>,
    },

    /// Queue contents changed
    QueueChanged {
        session_id: SessionId,
        trigger: QueueChangeTrigger,
        /// Total number of pending tracks across all tiers
        pending: usize,
        timestamp: DateTime<Utc>,
    },

    /// Automatic refill added tracks
    AutoplayAdded {
        session_id: SessionId,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Automatic refill could not fetch any recommendation
    AutoplayFailed {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },

    /// Idle session will be disconnected soon
    IdleWarning {
        session_id: SessionId,
        minutes_remaining: u64,
        timestamp: DateTime<Utc>,
    },

    /// Idle session was disconnected
    IdleDisconnected {
        session_id: SessionId,
        timestamp: DateTime<Utc>,
    },

    /// Session could not continue (voice connection lost)
    SessionAborted {
        session_id: SessionId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl PlayerEvent {
    /// Session the event belongs to
    pub fn session_id(&self) -> SessionId {
        match self {
            PlayerEvent::TrackStarted { session_id, .. }
            | PlayerEvent::TrackFinished { session_id, .. }
            | PlayerEvent::Downloading { session_id, .. }
            | PlayerEvent::TrackUnavailable { session_id, .. }
            | PlayerEvent::DurationExceeded { session_id, .. }
            | PlayerEvent::AcquisitionFailed { session_id, .. }
            | PlayerEvent::PlaybackStartFailed { session_id, .. }
            | PlayerEvent::PlaybackStateChanged { session_id, .. }
            | PlayerEvent::QueueChanged { session_id, .. }
            | PlayerEvent::AutoplayAdded { session_id, .. }
            | PlayerEvent::AutoplayFailed { session_id, .. }
            | PlayerEvent::IdleWarning { session_id, .. }
            | PlayerEvent::IdleDisconnected { session_id, .. }
            | PlayerEvent::SessionAborted { session_id, .. } => *session_id,
        }
    }

    /// Event type name, matching the serialized `type` tag
    pub fn event_type(&self) -> &'static str {
        match self {
            PlayerEvent::TrackStarted { .. } => "TrackStarted",
            PlayerEvent::TrackFinished { .. } => "TrackFinished",
            PlayerEvent::Downloading { .. } => "Downloading",
            PlayerEvent::TrackUnavailable { .. } => "TrackUnavailable",
            PlayerEvent::DurationExceeded { .. } => "DurationExceeded",
            PlayerEvent::AcquisitionFailed { .. } => "AcquisitionFailed",
            PlayerEvent::PlaybackStartFailed { .. } => "PlaybackStartFailed",
            PlayerEvent::PlaybackStateChanged { .. } => "PlaybackStateChanged",
            PlayerEvent::QueueChanged { .. } => "QueueChanged",
            PlayerEvent::AutoplayAdded { .. } => "AutoplayAdded",
            PlayerEvent::AutoplayFailed { .. } => "AutoplayFailed",
            PlayerEvent::IdleWarning { .. } => "IdleWarning",
            PlayerEvent::IdleDisconnected { .. } => "IdleDisconnected",
            PlayerEvent::SessionAborted { .. } => "SessionAborted",
        }
    }

    /// True for the events that report a terminal per-track failure
    pub fn is_track_failure(&self) -> bool {
        matches!(
            self,
            PlayerEvent::TrackUnavailable { .. }
                | PlayerEvent::DurationExceeded { .. }
                | PlayerEvent::AcquisitionFailed { .. }
                | PlayerEvent::PlaybackStartFailed { .. }
        )
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use djq_common::events::{EventBus, PlayerEvent};
/// use djq_common::SessionId;
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(PlayerEvent::IdleDisconnected {
///     session_id: SessionId(1),
///     timestamp: chrono::Utc::now(),
/// });
///
/// let event = rx.try_recv().unwrap();
/// assert_eq!(event.event_type(), "IdleDisconnected");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PlayerEvent,
    ) -> Result<usize, broadcast::error::SendError<PlayerEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
