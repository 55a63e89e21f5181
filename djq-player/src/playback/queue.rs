//! Track queue bookkeeping
//!
//! Tracks which tracks are where for one session:
//! - Current: playing (or about to play)
//! - Override: re-inserted "previous" tracks (highest precedence)
//! - Insert-next: explicit jump-the-line requests
//! - Main: default FIFO, optionally shuffled
//! - History: bounded log of tracks that played
//!
//! Dequeue precedence is override > insert-next > main, always.
//!
//! `TrackQueue` is plain synchronous state. The engine guards it with a
//! mutex that is never held across an await point.

use crate::cache::ContentKey;
use djq_common::settings::{LoopMode, ShuffleMode};
use djq_common::{EnqueueMode, FileState, Track};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use uuid::Uuid;

/// Read-only copy of every tier plus History
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub override_tier: Vec<Track>,
    pub insert_next_tier: Vec<Track>,
    pub main_tier: Vec<Track>,
    /// Oldest first
    pub history: Vec<Track>,
}

/// Queue state of one session
pub struct TrackQueue {
    current: Option<Track>,
    /// Set once the sink accepted the current track
    current_started: bool,

    override_tier: VecDeque<Track>,
    insert_next: VecDeque<Track>,
    main: VecDeque<Track>,

    history: VecDeque<Track>,
    history_capacity: usize,

    /// Main tier as last enqueued, replayed by queue loop mode
    loop_snapshot: Vec<Track>,
    /// Temporary single-track loop
    loop_track: Option<Track>,

    /// Content keys of recently played tracks (smart shuffle)
    shuffle_recent: VecDeque<ContentKey>,
    shuffle_recent_capacity: usize,
}

impl TrackQueue {
    pub fn new(history_capacity: usize, shuffle_recent_capacity: usize) -> Self {
        Self {
            current: None,
            current_started: false,
            override_tier: VecDeque::new(),
            insert_next: VecDeque::new(),
            main: VecDeque::new(),
            history: VecDeque::new(),
            history_capacity,
            loop_snapshot: Vec::new(),
            loop_track: None,
            shuffle_recent: VecDeque::new(),
            shuffle_recent_capacity,
        }
    }

    /// True if any tier holds a track
    pub fn has_pending(&self) -> bool {
        !(self.override_tier.is_empty() && self.insert_next.is_empty() && self.main.is_empty())
    }

    /// Total tracks across all tiers (excluding current)
    pub fn pending_len(&self) -> usize {
        self.override_tier.len() + self.insert_next.len() + self.main.len()
    }

    /// No current track and every tier empty
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && !self.has_pending()
    }

    /// Add tracks to the tier matching `mode`
    ///
    /// `InsertNext` degrades to `Append` when nothing is current and every
    /// tier is empty. Returns the mode actually used.
    pub fn push(&mut self, tracks: Vec<Track>, mode: EnqueueMode) -> EnqueueMode {
        let effective = match mode {
            EnqueueMode::InsertNext if self.is_empty() => EnqueueMode::Append,
            other => other,
        };
        match effective {
            EnqueueMode::InsertNext => self.insert_next.extend(tracks),
            EnqueueMode::Append => self.main.extend(tracks),
        }
        effective
    }

    /// Remove the next track by tier precedence
    pub fn pop_next(&mut self) -> Option<Track> {
        self.override_tier
            .pop_front()
            .or_else(|| self.insert_next.pop_front())
            .or_else(|| self.main.pop_front())
    }

    pub fn set_current(&mut self, track: Track) {
        self.current = Some(track);
        self.current_started = false;
    }

    pub fn mark_current_started(&mut self) {
        self.current_started = self.current.is_some();
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    /// Retire the current track
    ///
    /// A track that started playing moves to History (dropping the oldest
    /// entry at capacity) and is recorded for smart shuffle. Returns the
    /// retired track if it played.
    pub fn finish_current(&mut self) -> Option<Track> {
        let track = self.current.take()?;
        let started = std::mem::take(&mut self.current_started);
        if !started {
            return None;
        }

        if self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(track.clone());

        if self.shuffle_recent.len() >= self.shuffle_recent_capacity {
            self.shuffle_recent.pop_front();
        }
        self.shuffle_recent.push_back(ContentKey::from_url(&track.url));

        Some(track)
    }

    /// Move the newest History entry to the head of the override tier
    pub fn push_previous(&mut self) -> Option<Track> {
        let previous = self.history.pop_back()?;
        self.override_tier.push_front(previous.clone());
        Some(previous)
    }

    /// Refill tiers according to the loop settings; returns true if anything was added
    ///
    /// - A pinned loop track re-appends itself when every tier is empty
    /// - Queue loop replays the snapshot (re-shuffled when shuffle is on) when every tier is empty
    /// - Single loop re-appends the newest History entry when the main tier is empty
    pub fn apply_loop_policy<R: Rng + ?Sized>(
        &mut self,
        loop_mode: LoopMode,
        shuffle_mode: ShuffleMode,
        rng: &mut R,
    ) -> bool {
        let mut added = false;

        if let Some(track) = &self.loop_track {
            if !self.has_pending() {
                self.main.push_back(track.requeued());
                added = true;
            }
        }

        match loop_mode {
            LoopMode::Queue if !self.has_pending() && !self.loop_snapshot.is_empty() => {
                let mut replay: Vec<Track> = self.loop_snapshot.iter().map(Track::requeued).collect();
                if shuffle_mode != ShuffleMode::None {
                    replay.shuffle(rng);
                }
                self.main.extend(replay);
                added = true;
            }
            LoopMode::Single if self.main.is_empty() => {
                if let Some(last) = self.history.back() {
                    self.main.push_back(last.requeued());
                    added = true;
                }
            }
            _ => {}
        }

        added
    }

    /// Reorder the main tier per `mode`
    ///
    /// Smart shuffle puts recently played tracks last, shuffling both groups.
    pub fn apply_shuffle<R: Rng + ?Sized>(&mut self, mode: ShuffleMode, rng: &mut R) {
        match mode {
            ShuffleMode::None => {}
            ShuffleMode::Full => self.main.make_contiguous().shuffle(rng),
            ShuffleMode::Smart => {
                let recent: HashSet<&ContentKey> = self.shuffle_recent.iter().collect();
                let (mut fresh, mut played): (Vec<Track>, Vec<Track>) = self
                    .main
                    .drain(..)
                    .partition(|t| !recent.contains(&ContentKey::from_url(&t.url)));
                fresh.shuffle(rng);
                played.shuffle(rng);
                self.main.extend(fresh);
                self.main.extend(played);
            }
        }
    }

    /// Remember the main tier for queue loop mode
    pub fn take_loop_snapshot(&mut self) {
        self.loop_snapshot = self.main.iter().cloned().collect();
    }

    pub fn loop_snapshot(&self) -> &[Track] {
        &self.loop_snapshot
    }

    pub fn set_loop_track(&mut self, track: Option<Track>) {
        self.loop_track = track;
    }

    pub fn loop_track(&self) -> Option<&Track> {
        self.loop_track.as_ref()
    }

    /// Pending tracks in dequeue order (preload candidates)
    pub fn candidates(&self) -> Vec<Track> {
        self.override_tier
            .iter()
            .chain(self.insert_next.iter())
            .chain(self.main.iter())
            .cloned()
            .collect()
    }

    /// Update the file state of the entry with `entry_id` (current or pending)
    ///
    /// Returns false if the entry has left the queue.
    pub fn set_file_state(&mut self, entry_id: Uuid, state: FileState) -> bool {
        let entry = self
            .current
            .iter_mut()
            .chain(self.override_tier.iter_mut())
            .chain(self.insert_next.iter_mut())
            .chain(self.main.iter_mut())
            .find(|t| t.entry_id == entry_id);

        match entry {
            Some(track) => {
                track.file = state;
                true
            }
            None => false,
        }
    }

    /// Materialized files of current and pending tracks
    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.current
            .iter()
            .chain(self.override_tier.iter())
            .chain(self.insert_next.iter())
            .chain(self.main.iter())
            .filter_map(|t| t.ready_path().map(PathBuf::from))
            .collect()
    }

    /// Drop everything: tiers, current, History, loop state and recency
    pub fn clear(&mut self) {
        self.current = None;
        self.current_started = false;
        self.override_tier.clear();
        self.insert_next.clear();
        self.main.clear();
        self.history.clear();
        self.loop_snapshot.clear();
        self.loop_track = None;
        self.shuffle_recent.clear();
    }

    pub fn override_tier(&self) -> Vec<Track> {
        self.override_tier.iter().cloned().collect()
    }

    pub fn insert_next_tier(&self) -> Vec<Track> {
        self.insert_next.iter().cloned().collect()
    }

    pub fn main_tier(&self) -> Vec<Track> {
        self.main.iter().cloned().collect()
    }

    pub fn history(&self) -> Vec<Track> {
        self.history.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            current: self.current.clone(),
            override_tier: self.override_tier(),
            insert_next_tier: self.insert_next_tier(),
            main_tier: self.main_tier(),
            history: self.history(),
        }
    }
}
