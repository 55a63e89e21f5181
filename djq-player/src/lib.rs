//! # djq Player Library (djq-player)
//!
//! Per-session playback orchestration for a voice-chat bot.
//!
//! **Purpose:** Keep one voice connection per session fed with tracks from a
//! three-tier queue, materialize media files through a TTL cache, and throttle
//! calls to a flaky network dependency through a shared health monitor.
//!
//! **Architecture:** one playback loop task per session
//! ([`playback::TrackQueueEngine`]) plus retained background tasks for
//! preloading, automatic refill and idle timers. Sessions share one
//! [`cache::MediaCache`] and one [`health::NetworkHealthMonitor`] through the
//! [`registry::SessionRegistry`].

pub mod cache;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod health;
pub mod local;
pub mod playback;
pub mod registry;

pub use error::{Error, Result};
pub use playback::TrackQueueEngine;
pub use registry::SessionRegistry;
