//! Playback engine and queue management

pub mod clock;
pub mod engine;
pub mod queue;

pub use clock::PlaybackClock;
pub use engine::TrackQueueEngine;
pub use queue::{QueueSnapshot, TrackQueue};
