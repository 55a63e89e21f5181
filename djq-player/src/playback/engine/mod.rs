//! Per-session playback engine
//!
//! **Module Structure:**
//! - `core.rs`: Engine struct, construction, loop lifecycle (start, stop)
//! - `queue.rs`: Queue operations (enqueue, skip, pause, resume, previous) and views
//! - `playback.rs`: The playback loop, file resolution and preloading
//! - `idle.rs`: Idle-disconnect and idle-warning timers
//! - `autoplay.rs`: Automatic refill from the recommender

mod autoplay;
mod core;
mod idle;
mod playback;
mod queue;

pub use core::{EngineDeps, TrackQueueEngine};
