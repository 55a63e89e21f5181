//! Session registry
//!
//! Owns every live [`TrackQueueEngine`] plus the resources they share: the
//! media cache, the network health monitor, the settings store and the event
//! bus. Also runs the periodic cache sweep and gates resolver calls through
//! the health monitor.

use crate::cache::MediaCache;
use crate::collaborators::{Fetcher, Recommender, ResolveError, Resolver, Sink};
use crate::config::PlayerConfig;
use crate::error::{Error, Result};
use crate::health::{FailureCategory, NetworkHealthMonitor};
use crate::playback::engine::EngineDeps;
use crate::playback::TrackQueueEngine;
use djq_common::events::{EventBus, PlayerEvent};
use djq_common::settings::SettingsStore;
use djq_common::{EnqueueMode, SessionId, Track, TrackOrigin};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one cache sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// A session was actively playing; nothing was touched
    SkippedWhilePlaying,
    Swept {
        expired: usize,
        inactive: usize,
        size_bytes: u64,
    },
}

/// Registry of all sessions of one process
pub struct SessionRegistry {
    config: Arc<PlayerConfig>,
    cache: MediaCache,
    monitor: Arc<NetworkHealthMonitor>,
    settings: Arc<dyn SettingsStore>,
    fetcher: Arc<dyn Fetcher>,
    resolver: Arc<dyn Resolver>,
    recommender: Option<Arc<dyn Recommender>>,
    events: EventBus,
    sessions: Mutex<HashMap<SessionId, TrackQueueEngine>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl SessionRegistry {
    pub fn new(
        config: Arc<PlayerConfig>,
        settings: Arc<dyn SettingsStore>,
        fetcher: Arc<dyn Fetcher>,
        resolver: Arc<dyn Resolver>,
        recommender: Option<Arc<dyn Recommender>>,
    ) -> Self {
        let cache = MediaCache::new(config.cache_dir.clone(), config.cache_ttl);
        let monitor = Arc::new(NetworkHealthMonitor::new(config.health.clone()));
        Self {
            config,
            cache,
            monitor,
            settings,
            fetcher,
            resolver,
            recommender,
            events: EventBus::default(),
            sessions: Mutex::new(HashMap::new()),
            sweep: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn cache(&self) -> &MediaCache {
        &self.cache
    }

    pub fn monitor(&self) -> &Arc<NetworkHealthMonitor> {
        &self.monitor
    }

    pub fn settings(&self) -> &Arc<dyn SettingsStore> {
        &self.settings
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Engine for `session`, created around `sink` on first use
    pub fn get_or_create(&self, session: SessionId, sink: Arc<dyn Sink>) -> TrackQueueEngine {
        let mut sessions = self.lock_sessions();
        sessions
            .entry(session)
            .or_insert_with(|| {
                info!(session = %session, "Creating session");
                TrackQueueEngine::new(
                    session,
                    Arc::clone(&self.config),
                    EngineDeps {
                        cache: self.cache.clone(),
                        monitor: Arc::clone(&self.monitor),
                        settings: Arc::clone(&self.settings),
                        fetcher: Arc::clone(&self.fetcher),
                        sink,
                        recommender: self.recommender.clone(),
                        events: self.events.clone(),
                    },
                )
            })
            .clone()
    }

    pub fn get(&self, session: SessionId) -> Option<TrackQueueEngine> {
        self.lock_sessions().get(&session).cloned()
    }

    /// Stop and forget a session
    pub async fn remove(&self, session: SessionId) -> bool {
        let engine = self.lock_sessions().remove(&session);
        match engine {
            Some(engine) => {
                engine.stop().await;
                true
            }
            None => false,
        }
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.lock_sessions().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Ready file paths of every session's current and pending tracks
    pub fn active_paths(&self) -> HashSet<PathBuf> {
        self.engines()
            .iter()
            .flat_map(|engine| engine.active_paths())
            .collect()
    }

    pub fn any_playing(&self) -> bool {
        self.engines().iter().any(|engine| engine.is_playing())
    }

    /// Resolve `query` (or a stored shortcut of that name) and enqueue it
    ///
    /// Refused outright while the health monitor's circuit is open; otherwise
    /// waits out the current back-off before calling the resolver.
    pub async fn resolve_and_enqueue(
        &self,
        session: SessionId,
        query: &str,
        requested_by: &str,
        mode: EnqueueMode,
    ) -> Result<(Track, EnqueueMode)> {
        let engine = self.require(session)?;

        let shortcut = self.settings.shortcut_url(session, query).await?;
        let (target, origin) = match shortcut {
            Some(url) => {
                debug!(session = %session, "Shortcut {} -> {}", query, url);
                (url, TrackOrigin::Shortcut)
            }
            None => (query.to_string(), TrackOrigin::User),
        };

        self.gate_resolver().await?;
        let result = self.resolver.resolve(&target, requested_by).await;
        let track = self.record_resolve(result).await?.with_origin(origin);

        let effective = engine.enqueue(vec![track.clone()], mode).await?;
        Ok((track, effective))
    }

    /// Expand a playlist URL into at most `limit` tracks and enqueue them
    ///
    /// Returns the number of queued tracks and the number the resolver skipped.
    pub async fn enqueue_playlist(
        &self,
        session: SessionId,
        url: &str,
        requested_by: &str,
        limit: usize,
        mode: EnqueueMode,
    ) -> Result<(usize, usize)> {
        let engine = self.require(session)?;

        self.gate_resolver().await?;
        let result = self.resolver.resolve_playlist(url, requested_by, limit).await;
        let (tracks, skipped) = self.record_resolve(result).await?;
        if tracks.is_empty() {
            return Err(Error::Dependency(format!("playlist {} has no playable entries", url)));
        }

        let tracks: Vec<Track> = tracks
            .into_iter()
            .map(|t| t.with_origin(TrackOrigin::Playlist))
            .collect();
        let queued = tracks.len();
        engine.enqueue(tracks, mode).await?;
        info!(session = %session, "Queued {} playlist track(s), {} skipped", queued, skipped);
        Ok((queued, skipped))
    }

    async fn gate_resolver(&self) -> Result<()> {
        if self.monitor.should_circuit_break().await {
            warn!("Resolver call refused: network offline");
            return Err(Error::Dependency("network offline, try again later".to_string()));
        }
        let delay = self.monitor.backoff_delay().await;
        if !delay.is_zero() {
            debug!("Backing off {:?} before resolver call", delay);
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn record_resolve<T>(&self, result: std::result::Result<T, ResolveError>) -> Result<T> {
        match result {
            Ok(value) => {
                self.monitor.record_success().await;
                Ok(value)
            }
            Err(e) => {
                if e.is_network_failure() {
                    let category = match FailureCategory::classify(&e.to_string()) {
                        FailureCategory::Unknown => FailureCategory::Resolver,
                        other => other,
                    };
                    self.monitor.record_failure(&e, category).await;
                }
                Err(Error::Dependency(e.to_string()))
            }
        }
    }

    /// One cache sweep: drop expired entries and files no session needs
    pub async fn run_sweep_once(&self) -> SweepOutcome {
        if self.any_playing() {
            debug!("Cache sweep skipped: playback active");
            return SweepOutcome::SkippedWhilePlaying;
        }

        let expired = self.cache.evict_expired().await;
        let inactive = self.cache.evict_inactive(&self.active_paths()).await;
        let size_bytes = self.cache.size().await;
        info!(
            "Cache sweep: {} expired, {} inactive, {:.1} MB on disk",
            expired,
            inactive,
            size_bytes as f64 / (1024.0 * 1024.0)
        );
        SweepOutcome::Swept {
            expired,
            inactive,
            size_bytes,
        }
    }

    /// Spawn the periodic cache sweep (replaces a running one)
    pub fn start_sweep(self: &Arc<Self>) {
        let registry = Arc::clone(self);
        let cancel = self.cancel.clone();
        let period = self.config.sweep_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.run_sweep_once().await;
                    }
                }
            }
        });

        let mut sweep = self.sweep.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = sweep.replace(handle) {
            old.abort();
        }
    }

    /// Stop the sweep and every session
    pub async fn shutdown(&self) {
        info!("Shutting down {} session(s)", self.lock_sessions().len());
        self.cancel.cancel();
        let sweep = self.sweep.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = sweep {
            handle.abort();
        }

        let engines: Vec<TrackQueueEngine> = self.lock_sessions().drain().map(|(_, e)| e).collect();
        for engine in engines {
            engine.stop().await;
        }
    }

    fn require(&self, session: SessionId) -> Result<TrackQueueEngine> {
        self.get(session)
            .ok_or_else(|| Error::InvalidState(format!("no session {}", session)))
    }

    fn engines(&self) -> Vec<TrackQueueEngine> {
        self.lock_sessions().values().cloned().collect()
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<SessionId, TrackQueueEngine>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
