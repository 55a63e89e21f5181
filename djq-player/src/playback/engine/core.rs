//! Core playback engine - construction and lifecycle
//!
//! **Responsibilities:**
//! - TrackQueueEngine struct definition and initialization
//! - Loop lifecycle (start, stop)
//! - Retained background task handles and their cancellation
//! - Playback state and event emission helpers

use crate::cache::MediaCache;
use crate::collaborators::{Fetcher, Recommender, Sink};
use crate::config::PlayerConfig;
use crate::health::NetworkHealthMonitor;
use crate::playback::clock::PlaybackClock;
use crate::playback::queue::TrackQueue;
use djq_common::events::{EventBus, PlaybackState, PlayerEvent, QueueChangeTrigger};
use djq_common::settings::SettingsStore;
use djq_common::SessionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shared collaborators handed to every engine
#[derive(Clone)]
pub struct EngineDeps {
    pub cache: MediaCache,
    pub monitor: Arc<NetworkHealthMonitor>,
    pub settings: Arc<dyn SettingsStore>,
    pub fetcher: Arc<dyn Fetcher>,
    pub sink: Arc<dyn Sink>,
    pub recommender: Option<Arc<dyn Recommender>>,
    pub events: EventBus,
}

/// Handles of every task the engine owns
///
/// Storing a new handle aborts the one it replaces, so each kind of task has
/// at most one live instance.
#[derive(Default)]
pub(super) struct EngineTasks {
    /// Cancelled by `stop`; a fresh token is issued on the next start
    pub(super) cancel: CancellationToken,
    pub(super) playback_loop: Option<JoinHandle<()>>,
    pub(super) preload: Option<JoinHandle<()>>,
    pub(super) refill: Option<JoinHandle<()>>,
    pub(super) idle_warn: Option<JoinHandle<()>>,
    pub(super) idle_disconnect: Option<JoinHandle<()>>,
}

impl EngineTasks {
    pub(super) fn replace(slot: &mut Option<JoinHandle<()>>, handle: JoinHandle<()>) {
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    pub(super) fn abort(slot: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = slot.take() {
            handle.abort();
        }
    }
}

pub(super) struct EngineInner {
    pub(super) session: SessionId,
    pub(super) config: Arc<PlayerConfig>,

    /// Queue tiers, current track and History; never held across an await
    pub(super) queue: Mutex<TrackQueue>,
    pub(super) clock: Mutex<PlaybackClock>,
    pub(super) state: Mutex<PlaybackState>,

    /// Signalled whenever a tier gains a track
    pub(super) available: Notify,
    pub(super) tasks: Mutex<EngineTasks>,

    /// Idle-warning clip currently occupies the sink
    pub(super) warn_playing: AtomicBool,
    pub(super) refill_in_flight: AtomicBool,

    pub(super) cache: MediaCache,
    pub(super) monitor: Arc<NetworkHealthMonitor>,
    pub(super) settings: Arc<dyn SettingsStore>,
    pub(super) fetcher: Arc<dyn Fetcher>,
    pub(super) sink: Arc<dyn Sink>,
    pub(super) recommender: Option<Arc<dyn Recommender>>,
    pub(super) events: EventBus,
}

/// Playback engine of one session
///
/// Cloning is cheap; clones drive the same session. Background tasks hold a
/// clone, so the engine lives until `stop` aborts them.
#[derive(Clone)]
pub struct TrackQueueEngine {
    pub(super) inner: Arc<EngineInner>,
}

impl TrackQueueEngine {
    pub fn new(session: SessionId, config: Arc<PlayerConfig>, deps: EngineDeps) -> Self {
        let queue = TrackQueue::new(config.history_capacity, config.shuffle_recent_capacity);
        Self {
            inner: Arc::new(EngineInner {
                session,
                config,
                queue: Mutex::new(queue),
                clock: Mutex::new(PlaybackClock::new()),
                state: Mutex::new(PlaybackState::Idle),
                available: Notify::new(),
                tasks: Mutex::new(EngineTasks::default()),
                warn_playing: AtomicBool::new(false),
                refill_in_flight: AtomicBool::new(false),
                cache: deps.cache,
                monitor: deps.monitor,
                settings: deps.settings,
                fetcher: deps.fetcher,
                sink: deps.sink,
                recommender: deps.recommender,
                events: deps.events,
            }),
        }
    }

    pub fn session(&self) -> SessionId {
        self.inner.session
    }

    /// Subscribe to this engine's event bus (shared with other sessions)
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    /// Spawn the playback loop unless it is already running
    pub fn start(&self) {
        let mut tasks = self.lock_tasks();
        if tasks
            .playback_loop
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
        {
            return;
        }

        if tasks.cancel.is_cancelled() {
            tasks.cancel = CancellationToken::new();
        }
        let token = tasks.cancel.clone();
        let engine = self.clone();
        debug!(session = %self.inner.session, "Starting playback loop");
        tasks.playback_loop = Some(tokio::spawn(async move {
            engine.run_loop(token).await;
        }));
    }

    /// True while the playback loop task is alive
    pub fn is_running(&self) -> bool {
        self.lock_tasks()
            .playback_loop
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Tear the session down
    ///
    /// Clears every tier, History, the loop snapshot and the recommender's
    /// history, stops playback and cancels the loop, the preload, the refill
    /// and both idle timers. A task calling this on itself must detach its
    /// own handle first.
    pub async fn stop(&self) {
        info!(session = %self.inner.session, "Stopping session");

        // Tasks go first so none of them can refill or restart playback
        {
            let mut tasks = self.lock_tasks();
            tasks.cancel.cancel();
            EngineTasks::abort(&mut tasks.playback_loop);
            EngineTasks::abort(&mut tasks.preload);
            EngineTasks::abort(&mut tasks.refill);
            EngineTasks::abort(&mut tasks.idle_warn);
            EngineTasks::abort(&mut tasks.idle_disconnect);
        }
        self.inner.refill_in_flight.store(false, Ordering::SeqCst);

        self.lock_queue().clear();
        self.stop_warning_clip();

        if self.inner.sink.is_playing() || self.inner.sink.is_paused() {
            self.inner.sink.stop();
        }
        self.lock_clock().clear();

        if let Some(recommender) = &self.inner.recommender {
            recommender.clear_history(self.inner.session).await;
        }

        self.set_state(PlaybackState::Idle);
        self.emit_queue_changed(QueueChangeTrigger::Cleared);
    }

    /// Stop the idle-warning clip if it occupies the sink
    pub(super) fn stop_warning_clip(&self) {
        if self.inner.warn_playing.swap(false, Ordering::SeqCst) {
            debug!(session = %self.inner.session, "Stopping idle warning clip");
            self.inner.sink.stop();
        }
    }

    /// Take the handle of the currently running loop out of the task table
    ///
    /// Lets the loop call `stop` without aborting itself.
    pub(super) fn detach_loop(&self) {
        self.lock_tasks().playback_loop.take();
    }

    pub(super) fn set_state(&self, new_state: PlaybackState) {
        let old_state = {
            let mut state = self.lock_state();
            std::mem::replace(&mut *state, new_state)
        };
        if old_state != new_state {
            self.emit(PlayerEvent::PlaybackStateChanged {
                session_id: self.inner.session,
                old_state,
                new_state,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    pub fn playback_state(&self) -> PlaybackState {
        *self.lock_state()
    }

    pub(super) fn emit(&self, event: PlayerEvent) {
        self.inner.events.emit_lossy(event);
    }

    pub(super) fn emit_queue_changed(&self, trigger: QueueChangeTrigger) {
        let pending = self.lock_queue().pending_len();
        self.emit(PlayerEvent::QueueChanged {
            session_id: self.inner.session,
            trigger,
            pending,
            timestamp: chrono::Utc::now(),
        });
    }

    pub(super) fn lock_queue(&self) -> MutexGuard<'_, TrackQueue> {
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn lock_clock(&self) -> MutexGuard<'_, PlaybackClock> {
        self.inner
            .clock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn lock_state(&self) -> MutexGuard<'_, PlaybackState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn lock_tasks(&self) -> MutexGuard<'_, EngineTasks> {
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
