//! Automatic refill
//!
//! When every tier runs dry and the session has autoplay on, the recommender
//! is asked for a few tracks. Each one is fetched into the cache before it is
//! queued, so only tracks that can actually play reach the main tier.

use super::core::{EngineTasks, TrackQueueEngine};
use crate::collaborators::Recommender;
use crate::health::FailureCategory;
use djq_common::events::{PlayerEvent, QueueChangeTrigger};
use djq_common::{EnqueueMode, FileState, TrackOrigin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Display name recorded as the requester of recommended tracks
const AUTOPLAY_REQUESTER: &str = "Autoplay";

/// Clears the in-flight flag however the refill task ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl TrackQueueEngine {
    /// Start a refill unless one is already running
    pub(super) fn spawn_refill(&self) {
        let Some(recommender) = self.inner.recommender.clone() else {
            return;
        };
        let mut tasks = self.lock_tasks();
        if tasks.cancel.is_cancelled() || self.inner.refill_in_flight.swap(true, Ordering::SeqCst) {
            return;
        }

        let engine = self.clone();
        EngineTasks::replace(
            &mut tasks.refill,
            tokio::spawn(async move {
                let _in_flight = InFlight(&engine.inner.refill_in_flight);
                engine.refill(recommender).await;
            }),
        );
    }

    async fn refill(&self, recommender: Arc<dyn Recommender>) {
        let session = self.inner.session;
        match self.inner.settings.get(session).await {
            Ok(settings) if settings.autoplay_enabled => {}
            Ok(_) => return,
            Err(e) => {
                warn!(session = %session, "Autoplay skipped: {}", e);
                return;
            }
        }
        if self.inner.monitor.should_circuit_break().await {
            warn!(session = %session, "Autoplay skipped: network offline");
            return;
        }

        info!(session = %session, "Fetching autoplay recommendations");
        let tracks = match recommender
            .recommend(session, AUTOPLAY_REQUESTER, self.inner.config.autoplay_count)
            .await
        {
            Ok(tracks) => {
                self.inner.monitor.record_success().await;
                tracks
            }
            Err(e) => {
                warn!(session = %session, "Autoplay recommendation failed: {}", e);
                if e.is_network_failure() {
                    self.inner
                        .monitor
                        .record_failure(&e, FailureCategory::Resolver)
                        .await;
                }
                self.emit(PlayerEvent::AutoplayFailed {
                    session_id: session,
                    timestamp: chrono::Utc::now(),
                });
                return;
            }
        };
        if tracks.is_empty() {
            debug!(session = %session, "No autoplay tracks returned");
            return;
        }

        let total = tracks.len();
        let mut ready = Vec::with_capacity(total);
        for (idx, track) in tracks.into_iter().enumerate() {
            let mut track = track.with_origin(TrackOrigin::Autoplay);
            match self.fetch_into_cache(&track).await {
                Ok(path) => {
                    debug!(session = %session, "Autoplay track {}/{} ready: {}", idx + 1, total, track.title);
                    track.file = FileState::Ready(path);
                    ready.push(track);
                }
                Err(e) => {
                    warn!(session = %session, "Autoplay preload failed for {}: {}", track.title, e);
                    continue;
                }
            }
            if idx + 1 < total {
                tokio::time::sleep(self.inner.config.autoplay_stagger).await;
            }
        }

        if ready.is_empty() {
            warn!(session = %session, "Autoplay: no track could be fetched");
            self.emit(PlayerEvent::AutoplayFailed {
                session_id: session,
                timestamp: chrono::Utc::now(),
            });
            return;
        }

        let count = ready.len();
        self.lock_queue().push(ready, EnqueueMode::Append);
        self.inner.available.notify_one();
        info!(session = %session, "Autoplay: added {} track(s)", count);
        self.emit(PlayerEvent::AutoplayAdded {
            session_id: session,
            count,
            timestamp: chrono::Utc::now(),
        });
        self.emit_queue_changed(QueueChangeTrigger::AutomaticReplenishment);
    }
}
