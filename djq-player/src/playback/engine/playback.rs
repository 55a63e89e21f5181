//! Playback loop
//!
//! **Responsibilities:**
//! - One iteration per track: retire, loop policy, refill, wait, dequeue,
//!   connection check, file resolution, preload, start with retries, await completion
//! - Cache-backed fetching shared with the preload and refill tasks
//!
//! Every per-track failure produces exactly one event and the loop advances.
//! Only a lost voice connection or `stop` ends the loop.

use super::core::{EngineTasks, TrackQueueEngine};
use crate::cache::ContentKey;
use crate::collaborators::{AudioSource, SinkError};
use crate::error::{Error, Result};
use crate::health::FailureCategory;
use djq_common::events::{PlaybackState, PlayerEvent, QueueChangeTrigger};
use djq_common::time::format_track_length;
use djq_common::{FileState, Track};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What the loop does after one iteration
enum LoopStep {
    Continue,
    Exit,
}

impl TrackQueueEngine {
    pub(super) async fn run_loop(&self, token: CancellationToken) {
        info!(session = %self.inner.session, "Playback loop started");
        loop {
            let step = tokio::select! {
                _ = token.cancelled() => break,
                step = self.play_next() => step,
            };
            match step {
                Ok(LoopStep::Continue) => {}
                Ok(LoopStep::Exit) => break,
                Err(e) => {
                    error!(session = %self.inner.session, "Playback loop error: {}", e);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(self.inner.config.loop_error_delay) => {}
                    }
                }
            }
        }
        info!(session = %self.inner.session, "Playback loop ended");
    }

    async fn play_next(&self) -> Result<LoopStep> {
        self.retire_current();
        self.set_state(PlaybackState::Idle);

        let settings = self.inner.settings.get(self.inner.session).await?;
        let refilled = {
            let mut queue = self.lock_queue();
            queue.apply_loop_policy(settings.loop_mode, settings.shuffle_mode, &mut rand::thread_rng())
        };
        if refilled {
            self.emit_queue_changed(QueueChangeTrigger::LoopRefill);
        }

        if settings.autoplay_enabled && !self.lock_queue().has_pending() {
            self.spawn_refill();
        }

        self.wait_for_track().await;

        let track = {
            let mut queue = self.lock_queue();
            match queue.pop_next() {
                Some(track) => {
                    queue.set_current(track.clone());
                    track
                }
                None => return Ok(LoopStep::Continue),
            }
        };
        self.cancel_idle_disconnect();
        debug!(session = %self.inner.session, "Dequeued: {}", track.title);

        if !self.ensure_connected().await {
            return Ok(self.abort_session());
        }

        let path = match self.resolve_file(&track).await {
            Some(path) => path,
            None => return Ok(LoopStep::Continue),
        };

        self.spawn_preload();

        let done = match self.start_with_retry(&track, &path).await {
            Ok(done) => done,
            Err(e) => {
                warn!(session = %self.inner.session, "Giving up on {}: {}", track.title, e);
                self.emit(PlayerEvent::PlaybackStartFailed {
                    session_id: self.inner.session,
                    title: track.title.clone(),
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                return Ok(LoopStep::Continue);
            }
        };

        self.lock_queue().mark_current_started();
        self.lock_clock().reset();
        match track.duration_secs {
            Some(secs) => info!(
                session = %self.inner.session,
                "Now playing: {} [{}]", track.title, format_track_length(secs)
            ),
            None => info!(session = %self.inner.session, "Now playing: {}", track.title),
        }
        self.emit(PlayerEvent::TrackStarted {
            session_id: self.inner.session,
            entry_id: track.entry_id,
            title: track.title.clone(),
            url: track.url.clone(),
            requested_by: track.requested_by.clone(),
            duration_secs: track.duration_secs,
            timestamp: chrono::Utc::now(),
        });
        self.set_state(PlaybackState::Playing);

        let outcome = done
            .await
            .unwrap_or_else(|_| Some(SinkError::Other("completion channel dropped".to_string())));
        if let Some(err) = &outcome {
            let message = err.to_string();
            let category = FailureCategory::classify(&message);
            error!(
                session = %self.inner.session,
                category = category.as_str(),
                "Playback error on {}: {}", track.title, message
            );
        }
        self.emit(PlayerEvent::TrackFinished {
            session_id: self.inner.session,
            entry_id: track.entry_id,
            title: track.title.clone(),
            error: outcome.map(|e| e.to_string()),
            timestamp: chrono::Utc::now(),
        });
        self.lock_clock().clear();

        Ok(LoopStep::Continue)
    }

    /// Move a finished current track to History and tell the recommender
    fn retire_current(&self) {
        let played = self.lock_queue().finish_current();
        if let (Some(track), Some(recommender)) = (played, &self.inner.recommender) {
            let recommender = Arc::clone(recommender);
            let session = self.inner.session;
            tokio::spawn(async move {
                recommender.record_played(session, &track).await;
            });
        }
    }

    /// Block until a tier holds a track; idle timers run while waiting
    async fn wait_for_track(&self) {
        loop {
            if self.lock_queue().has_pending() {
                return;
            }
            self.schedule_idle_disconnect().await;
            self.inner.available.notified().await;
        }
    }

    /// Poll the sink connection for up to the configured wait
    async fn ensure_connected(&self) -> bool {
        let config = &self.inner.config;
        let polls = (config.connect_wait.as_millis() / config.connect_poll.as_millis().max(1)) as u32;
        for _ in 0..polls {
            if self.inner.sink.is_connected() {
                return true;
            }
            tokio::time::sleep(config.connect_poll).await;
        }
        self.inner.sink.is_connected()
    }

    /// Report the lost connection once and tear the session down
    fn abort_session(&self) -> LoopStep {
        let reason = Error::ConnectivityLost.to_string();
        error!(session = %self.inner.session, "{}; aborting session", reason);
        self.emit(PlayerEvent::SessionAborted {
            session_id: self.inner.session,
            reason,
            timestamp: chrono::Utc::now(),
        });

        self.detach_loop();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.stop().await;
        });
        LoopStep::Exit
    }

    /// Local file for `track`, or `None` after emitting the failure event
    async fn resolve_file(&self, track: &Track) -> Option<PathBuf> {
        if track.is_failed() {
            warn!(session = %self.inner.session, "Skipping unavailable track: {}", track.title);
            self.emit(PlayerEvent::TrackUnavailable {
                session_id: self.inner.session,
                title: track.title.clone(),
                timestamp: chrono::Utc::now(),
            });
            return None;
        }

        let key = ContentKey::from_url(&track.url);
        if let Some(path) = track.ready_path() {
            if tokio::fs::try_exists(path).await.unwrap_or(false) {
                self.inner.cache.touch(&key);
                return Some(path.to_path_buf());
            }
        }

        let result = match self.inner.cache.cached_path(&key).await {
            Some(path) => Ok(path),
            None => {
                self.emit(PlayerEvent::Downloading {
                    session_id: self.inner.session,
                    title: track.title.clone(),
                    timestamp: chrono::Utc::now(),
                });
                self.fetch_into_cache(track).await
            }
        };

        match result {
            Ok(path) => {
                self.lock_queue()
                    .set_file_state(track.entry_id, FileState::Ready(path.clone()));
                Some(path)
            }
            Err(Error::DurationExceeded {
                actual_minutes,
                limit_minutes,
            }) => {
                warn!(
                    session = %self.inner.session,
                    "{} is {} minutes long (limit {})", track.title, actual_minutes, limit_minutes
                );
                self.emit(PlayerEvent::DurationExceeded {
                    session_id: self.inner.session,
                    title: track.title.clone(),
                    actual_minutes,
                    limit_minutes,
                    timestamp: chrono::Utc::now(),
                });
                None
            }
            Err(e) => {
                error!(session = %self.inner.session, "Could not fetch {}: {}", track.title, e);
                self.emit(PlayerEvent::AcquisitionFailed {
                    session_id: self.inner.session,
                    title: track.title.clone(),
                    reason: e.to_string(),
                    timestamp: chrono::Utc::now(),
                });
                None
            }
        }
    }

    /// Fetch `track` through the shared cache
    ///
    /// Network-looking failures are reported to the health monitor.
    pub(super) async fn fetch_into_cache(&self, track: &Track) -> Result<PathBuf> {
        let key = ContentKey::from_url(&track.url);
        let fetcher = Arc::clone(&self.inner.fetcher);
        let url = track.url.clone();
        let result = self
            .inner
            .cache
            .acquire(&key, move |stem| async move {
                fetcher.fetch(&url, &stem).await.map_err(Error::from)
            })
            .await;

        if let Err(Error::Acquisition(message)) = &result {
            let category = FailureCategory::classify(message);
            if category != FailureCategory::Unknown {
                self.inner.monitor.record_failure(message, category).await;
            }
        }
        result
    }

    /// Start `path` on the sink, retrying with a fresh source each attempt
    async fn start_with_retry(
        &self,
        track: &Track,
        path: &std::path::Path,
    ) -> Result<oneshot::Receiver<Option<SinkError>>> {
        let config = &self.inner.config;
        let attempts = config.start_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            self.stop_warning_clip();
            let (tx, rx) = oneshot::channel();
            match self.inner.sink.play(AudioSource::new(path), tx).await {
                Ok(()) => return Ok(rx),
                Err(e) => {
                    warn!(
                        session = %self.inner.session,
                        "Playback start failed for {} (attempt {}/{}): {}",
                        track.title, attempt, attempts, e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(config.retry_delay).await;
                    }
                }
            }
        }

        Err(Error::PlaybackStart(
            last_error.map(|e| e.to_string()).unwrap_or_default(),
        ))
    }

    /// Replace the preload task with a fresh one
    fn spawn_preload(&self) {
        let mut tasks = self.lock_tasks();
        if tasks.cancel.is_cancelled() {
            return;
        }
        let engine = self.clone();
        EngineTasks::replace(
            &mut tasks.preload,
            tokio::spawn(async move {
                engine.preload_next().await;
            }),
        );
    }

    /// Materialize the first pending candidate that can be materialized
    ///
    /// A candidate that fails to fetch is marked `Failed` so the loop skips it
    /// without retrying. An over-long candidate is left alone; the loop
    /// reports it when it gets there.
    async fn preload_next(&self) {
        tokio::time::sleep(self.inner.config.preload_stagger).await;

        let candidates = self.lock_queue().candidates();
        for track in candidates {
            if track.is_failed() {
                continue;
            }
            if let Some(path) = track.ready_path() {
                if tokio::fs::try_exists(path).await.unwrap_or(false) {
                    return;
                }
            }

            let key = ContentKey::from_url(&track.url);
            if let Some(path) = self.inner.cache.cached_path(&key).await {
                self.lock_queue()
                    .set_file_state(track.entry_id, FileState::Ready(path));
                return;
            }

            match self.fetch_into_cache(&track).await {
                Ok(path) => {
                    debug!(session = %self.inner.session, "Preloaded: {}", track.title);
                    self.lock_queue()
                        .set_file_state(track.entry_id, FileState::Ready(path));
                    return;
                }
                Err(Error::DurationExceeded { .. }) => continue,
                Err(e) => {
                    warn!(session = %self.inner.session, "Preload failed for {}: {}", track.title, e);
                    self.lock_queue().set_file_state(track.entry_id, FileState::Failed);
                    tokio::time::sleep(self.inner.config.preload_failure_delay).await;
                }
            }
        }
    }
}
