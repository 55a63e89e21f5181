//! Test harness for TrackQueueEngine integration tests
//!
//! Provides TestSession with:
//! - Temporary cache directory for isolation
//! - In-memory settings store
//! - Direct handles on every mock for scripting and inspection

use super::mocks::{MockFetcher, MockRecommender, MockSink};
use djq_common::events::{EventBus, PlayerEvent};
use djq_common::settings::{MemorySettingsStore, SettingsStore};
use djq_common::{SessionId, Track};
use djq_player::cache::MediaCache;
use djq_player::config::PlayerConfig;
use djq_player::health::NetworkHealthMonitor;
use djq_player::playback::engine::EngineDeps;
use djq_player::TrackQueueEngine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Longest any helper waits for an event (virtual time under a paused clock)
const EVENT_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

pub const SESSION: SessionId = SessionId(7);

pub fn test_config(root: &Path) -> PlayerConfig {
    PlayerConfig::with_root(root)
}

pub fn create_test_track(name: &str) -> Track {
    Track::new(name, format!("https://example.com/{}", name), "tester")
}

/// One engine wired to mock collaborators
pub struct TestSession {
    pub engine: TrackQueueEngine,
    pub sink: Arc<MockSink>,
    pub fetcher: Arc<MockFetcher>,
    pub recommender: Arc<MockRecommender>,
    pub settings: Arc<MemorySettingsStore>,
    pub monitor: Arc<NetworkHealthMonitor>,
    pub cache: MediaCache,
    pub events: broadcast::Receiver<PlayerEvent>,
    _temp_dir: TempDir,
}

impl TestSession {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Build a session after letting the caller adjust the config
    pub fn with_config(adjust: impl FnOnce(&mut PlayerConfig)) -> Self {
        Self::build(adjust, Vec::new())
    }

    /// Session whose recommender serves `catalogue`
    pub fn with_recommendations(catalogue: Vec<Track>) -> Self {
        Self::build(|_| {}, catalogue)
    }

    fn build(adjust: impl FnOnce(&mut PlayerConfig), catalogue: Vec<Track>) -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let mut config = test_config(temp_dir.path());
        adjust(&mut config);
        let config = Arc::new(config);

        let sink = Arc::new(MockSink::new());
        let fetcher = Arc::new(MockFetcher::new());
        let recommender = Arc::new(MockRecommender::new(catalogue));
        let settings = Arc::new(MemorySettingsStore::new());
        let monitor = Arc::new(NetworkHealthMonitor::new(config.health.clone()));
        let cache = MediaCache::new(config.cache_dir.clone(), config.cache_ttl);
        let bus = EventBus::default();
        let events = bus.subscribe();

        let engine = TrackQueueEngine::new(
            SESSION,
            Arc::clone(&config),
            EngineDeps {
                cache: cache.clone(),
                monitor: Arc::clone(&monitor),
                settings: Arc::clone(&settings) as Arc<dyn SettingsStore>,
                fetcher: Arc::clone(&fetcher) as _,
                sink: Arc::clone(&sink) as _,
                recommender: Some(Arc::clone(&recommender) as _),
                events: bus,
            },
        );

        Self {
            engine,
            sink,
            fetcher,
            recommender,
            settings,
            monitor,
            cache,
            events,
            _temp_dir: temp_dir,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self._temp_dir.path()
    }

    /// Wait for the next TrackStarted and return its title
    pub async fn started(&mut self) -> String {
        wait_started(&mut self.events).await
    }

    /// Wait for the first event matching `pred`
    pub async fn expect(&mut self, pred: impl Fn(&PlayerEvent) -> bool) -> PlayerEvent {
        next_event(&mut self.events, pred).await
    }

    /// Finish the current track and wait for the next one to start
    pub async fn finish_and_next(&mut self) -> String {
        assert!(self.sink.finish(), "nothing was playing");
        self.started().await
    }
}

/// Wait (in virtual time) for the first event matching `pred`
pub async fn next_event(
    rx: &mut broadcast::Receiver<PlayerEvent>,
    pred: impl Fn(&PlayerEvent) -> bool,
) -> PlayerEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// True if no event matching `pred` arrives within `window`
pub async fn no_event_within(
    rx: &mut broadcast::Receiver<PlayerEvent>,
    window: Duration,
    pred: impl Fn(&PlayerEvent) -> bool,
) -> bool {
    tokio::time::timeout(window, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(_) => std::future::pending::<()>().await,
            }
        }
    })
    .await
    .is_err()
}

pub async fn wait_started(rx: &mut broadcast::Receiver<PlayerEvent>) -> String {
    match next_event(rx, |e| matches!(e, PlayerEvent::TrackStarted { .. })).await {
        PlayerEvent::TrackStarted { title, .. } => title,
        _ => unreachable!(),
    }
}
