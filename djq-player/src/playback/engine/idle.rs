//! Idle-disconnect timers
//!
//! While a connected session has nothing to play, two timers run: a warning
//! timer at `timeout - warn_minutes` (armed only when the session's warning
//! flag is on and that is at least one minute) and the disconnect timer at
//! `timeout`. Both re-check idleness when they fire. Any enqueue or dequeue
//! cancels them.

use super::core::{EngineTasks, TrackQueueEngine};
use crate::collaborators::AudioSource;
use djq_common::events::PlayerEvent;
use djq_common::time::minutes_to_duration;
use std::sync::atomic::Ordering;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

impl TrackQueueEngine {
    /// (Re-)arm the idle timers if the session is idle and the feature is on
    pub async fn schedule_idle_disconnect(&self) {
        self.abort_idle_timers();

        let settings = match self.inner.settings.get(self.inner.session).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!(session = %self.inner.session, "Idle timers not armed: {}", e);
                return;
            }
        };
        if !settings.idle_disconnect_enabled || !self.is_idle() {
            return;
        }
        let timeout = settings.idle_disconnect_minutes;
        if timeout <= 0 {
            return;
        }
        let warn_at = timeout - settings.idle_warn_minutes.max(0);

        let mut tasks = self.lock_tasks();
        if tasks.cancel.is_cancelled() {
            return;
        }
        if settings.idle_warning_enabled && warn_at >= 1 {
            let engine = self.clone();
            let remaining = (timeout - warn_at) as u64;
            let delay = minutes_to_duration(warn_at as u64);
            EngineTasks::replace(
                &mut tasks.idle_warn,
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    engine.idle_warning_fired(remaining).await;
                }),
            );
        }

        let engine = self.clone();
        let delay = minutes_to_duration(timeout as u64);
        EngineTasks::replace(
            &mut tasks.idle_disconnect,
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                engine.idle_disconnect_fired().await;
            }),
        );
        debug!(
            session = %self.inner.session,
            "Idle timers armed: disconnect in {} min", timeout
        );
    }

    /// Disarm both idle timers and silence the warning clip
    pub fn cancel_idle_disconnect(&self) {
        self.stop_warning_clip();
        self.abort_idle_timers();
    }

    fn abort_idle_timers(&self) {
        let mut tasks = self.lock_tasks();
        EngineTasks::abort(&mut tasks.idle_warn);
        EngineTasks::abort(&mut tasks.idle_disconnect);
    }

    async fn idle_warning_fired(&self, minutes_remaining: u64) {
        let settings = match self.inner.settings.get(self.inner.session).await {
            Ok(settings) => settings,
            Err(_) => return,
        };
        if !settings.idle_disconnect_enabled || !settings.idle_warning_enabled || !self.is_idle() {
            return;
        }

        info!(
            session = %self.inner.session,
            "Idle warning: disconnecting in {} min", minutes_remaining
        );
        self.emit(PlayerEvent::IdleWarning {
            session_id: self.inner.session,
            minutes_remaining,
            timestamp: chrono::Utc::now(),
        });

        let Some(clip) = self.inner.config.idle_warning_clip.clone() else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        self.inner.warn_playing.store(true, Ordering::SeqCst);
        if let Err(e) = self.inner.sink.play(AudioSource::new(clip), tx).await {
            warn!(session = %self.inner.session, "Idle warning clip failed: {}", e);
            self.inner.warn_playing.store(false, Ordering::SeqCst);
            return;
        }
        let _ = rx.await;
        self.inner.warn_playing.store(false, Ordering::SeqCst);
    }

    async fn idle_disconnect_fired(&self) {
        let settings = match self.inner.settings.get(self.inner.session).await {
            Ok(settings) => settings,
            Err(_) => return,
        };
        if !settings.idle_disconnect_enabled || !self.is_idle() {
            return;
        }

        // Detach ourselves so `stop` does not abort this task
        {
            let mut tasks = self.lock_tasks();
            tasks.idle_disconnect.take();
            EngineTasks::abort(&mut tasks.idle_warn);
        }

        info!(session = %self.inner.session, "Disconnecting idle session");
        self.stop().await;
        self.inner.sink.disconnect().await;
        self.emit(PlayerEvent::IdleDisconnected {
            session_id: self.inner.session,
            timestamp: chrono::Utc::now(),
        });
    }
}
