//! # djq Common Library
//!
//! Shared code for the djq playback orchestrator including:
//! - Track and session data model
//! - Event types (PlayerEvent enum) and the EventBus
//! - Per-session settings storage
//! - Configuration loading
//! - Time helpers

pub mod config;
pub mod error;
pub mod events;
pub mod settings;
pub mod time;
pub mod track;

pub use error::{Error, Result};
pub use track::{EnqueueMode, FileState, SessionId, Track, TrackOrigin};
