//! Queue operations module
//!
//! **Responsibilities:**
//! - Queue mutations (enqueue, play_previous, shuffle, loop track)
//! - Transport control (skip, pause, resume)
//! - Queue queries and snapshots

use super::core::TrackQueueEngine;
use crate::error::Result;
use crate::playback::queue::QueueSnapshot;
use djq_common::events::{PlaybackState, QueueChangeTrigger};
use djq_common::settings::{LoopMode, ShuffleMode};
use djq_common::{EnqueueMode, Track};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info};

impl TrackQueueEngine {
    /// Add tracks to the queue and make sure the loop runs
    ///
    /// `InsertNext` degrades to `Append` when the session has nothing current
    /// and every tier is empty. Returns the mode actually used.
    pub async fn enqueue(&self, tracks: Vec<Track>, mode: EnqueueMode) -> Result<EnqueueMode> {
        self.cancel_idle_disconnect();
        let settings = self.inner.settings.get(self.inner.session).await?;

        let count = tracks.len();
        let effective = {
            let mut queue = self.lock_queue();
            let effective = queue.push(tracks, mode);
            if effective == EnqueueMode::Append && settings.shuffle_mode != ShuffleMode::None {
                queue.apply_shuffle(settings.shuffle_mode, &mut rand::thread_rng());
            }
            if settings.loop_mode == LoopMode::Queue {
                queue.take_loop_snapshot();
            }
            effective
        };

        info!(
            session = %self.inner.session,
            "Enqueued {} track(s) ({:?})", count, effective
        );
        self.inner.available.notify_one();
        self.emit_queue_changed(match effective {
            EnqueueMode::Append => QueueChangeTrigger::UserEnqueue,
            EnqueueMode::InsertNext => QueueChangeTrigger::UserInsertNext,
        });
        self.start();
        Ok(effective)
    }

    /// Force-stop active or paused playback; false if nothing is playing
    pub fn skip(&self) -> bool {
        let sink = &self.inner.sink;
        if sink.is_playing() || sink.is_paused() {
            debug!(session = %self.inner.session, "Skipping current track");
            sink.stop();
            true
        } else {
            false
        }
    }

    pub fn pause(&self) -> bool {
        let sink = &self.inner.sink;
        if !sink.is_playing() || sink.is_paused() {
            return false;
        }
        sink.pause();
        self.lock_clock().pause();
        self.set_state(PlaybackState::Paused);
        true
    }

    pub fn resume(&self) -> bool {
        let sink = &self.inner.sink;
        if !sink.is_paused() {
            return false;
        }
        sink.resume();
        self.lock_clock().resume();
        self.set_state(PlaybackState::Playing);
        true
    }

    /// Replay the newest History entry next, skipping the current track
    ///
    /// Returns `None` and changes nothing when History is empty.
    pub fn play_previous(&self) -> Option<Track> {
        let previous = self.lock_queue().push_previous()?;
        info!(session = %self.inner.session, "Replaying previous track: {}", previous.title);

        self.inner.available.notify_one();
        self.skip();
        self.emit_queue_changed(QueueChangeTrigger::PlayPrevious);
        self.start();
        Some(previous)
    }

    /// Re-shuffle the main tier with the session's shuffle mode
    pub async fn apply_shuffle(&self) -> Result<()> {
        let settings = self.inner.settings.get(self.inner.session).await?;
        if settings.shuffle_mode == ShuffleMode::None {
            return Ok(());
        }
        self.lock_queue()
            .apply_shuffle(settings.shuffle_mode, &mut rand::thread_rng());
        self.emit_queue_changed(QueueChangeTrigger::Shuffle);
        Ok(())
    }

    /// Pin (or unpin) a track that re-queues itself whenever the queue runs dry
    pub fn set_loop_track(&self, track: Option<Track>) {
        self.lock_queue().set_loop_track(track);
    }

    /// Connected, nothing playing or paused, nothing current or pending
    ///
    /// The idle-warning clip does not count as playback.
    pub fn is_idle(&self) -> bool {
        let sink = &self.inner.sink;
        if !sink.is_connected() {
            return false;
        }
        let warn_only = self.inner.warn_playing.load(Ordering::SeqCst);
        if !warn_only && (sink.is_playing() || sink.is_paused()) {
            return false;
        }
        self.lock_queue().is_empty()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.sink.is_playing() && !self.inner.warn_playing.load(Ordering::SeqCst)
    }

    /// Playback position of the current track, excluding pauses
    pub fn position(&self) -> Option<Duration> {
        self.lock_clock().position()
    }

    pub fn current(&self) -> Option<Track> {
        self.lock_queue().current().cloned()
    }

    pub fn override_tier(&self) -> Vec<Track> {
        self.lock_queue().override_tier()
    }

    pub fn insert_next_tier(&self) -> Vec<Track> {
        self.lock_queue().insert_next_tier()
    }

    pub fn main_tier(&self) -> Vec<Track> {
        self.lock_queue().main_tier()
    }

    pub fn history(&self) -> Vec<Track> {
        self.lock_queue().history()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.lock_queue().snapshot()
    }

    /// Materialized files the cache sweep must keep
    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.lock_queue().active_paths()
    }
}
