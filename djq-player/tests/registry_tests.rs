//! SessionRegistry integration tests

mod helpers;

use djq_common::settings::{MemorySettingsStore, SettingsStore};
use djq_common::{EnqueueMode, SessionId, TrackOrigin};
use djq_player::collaborators::ResolveError;
use djq_player::error::Error;
use djq_player::health::FailureCategory;
use djq_player::registry::SweepOutcome;
use djq_player::SessionRegistry;
use helpers::{test_config, wait_started, MockFetcher, MockRecommender, MockResolver, MockSink};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const FIRST: SessionId = SessionId(1);
const SECOND: SessionId = SessionId(2);

struct Fixture {
    registry: Arc<SessionRegistry>,
    settings: Arc<MemorySettingsStore>,
    resolver: Arc<MockResolver>,
    fetcher: Arc<MockFetcher>,
    _temp_dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let settings = Arc::new(MemorySettingsStore::new());
        let resolver = Arc::new(MockResolver::new());
        let fetcher = Arc::new(MockFetcher::new());
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(test_config(temp_dir.path())),
            Arc::clone(&settings) as Arc<dyn SettingsStore>,
            Arc::clone(&fetcher) as _,
            Arc::clone(&resolver) as _,
            Some(Arc::new(MockRecommender::new(Vec::new())) as _),
        ));
        Self {
            registry,
            settings,
            resolver,
            fetcher,
            _temp_dir: temp_dir,
        }
    }

    fn session(&self, id: SessionId) -> Arc<MockSink> {
        let sink = Arc::new(MockSink::new());
        self.registry.get_or_create(id, Arc::clone(&sink) as _);
        sink
    }
}

// ========================================
// Sessions
// ========================================

#[tokio::test(start_paused = true)]
async fn test_get_or_create_reuses_the_session() {
    let f = Fixture::new();
    let first = f.registry.get_or_create(FIRST, Arc::new(MockSink::new()));
    let again = f.registry.get_or_create(FIRST, Arc::new(MockSink::new()));
    f.registry.get_or_create(SECOND, Arc::new(MockSink::new()));

    assert_eq!(first.session(), again.session());
    assert_eq!(f.registry.sessions(), vec![FIRST, SECOND]);
    assert!(f.registry.get(SessionId(99)).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_into_unknown_session_fails() {
    let f = Fixture::new();
    let result = f
        .registry
        .resolve_and_enqueue(FIRST, "anything", "tester", EnqueueMode::Append)
        .await;
    assert!(matches!(result, Err(Error::InvalidState(_))));
    assert_eq!(f.resolver.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_remove_stops_the_session() {
    let f = Fixture::new();
    let sink = f.session(FIRST);
    let mut events = f.registry.subscribe();
    f.registry
        .resolve_and_enqueue(FIRST, "a", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    assert_eq!(wait_started(&mut events).await, "a");

    assert!(f.registry.remove(FIRST).await);
    assert!(!f.registry.remove(FIRST).await);
    assert!(f.registry.sessions().is_empty());
    assert_eq!(sink.stops(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_every_session() {
    let f = Fixture::new();
    let first = f.session(FIRST);
    let second = f.session(SECOND);
    let mut events = f.registry.subscribe();
    f.registry.start_sweep();

    f.registry
        .resolve_and_enqueue(FIRST, "a", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    wait_started(&mut events).await;
    f.registry
        .resolve_and_enqueue(SECOND, "b", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    wait_started(&mut events).await;

    f.registry.shutdown().await;
    assert!(f.registry.sessions().is_empty());
    assert_eq!(first.stops(), 1);
    assert_eq!(second.stops(), 1);
}

// ========================================
// Resolution
// ========================================

#[tokio::test(start_paused = true)]
async fn test_shortcut_resolves_to_stored_url() {
    let f = Fixture::new();
    f.session(FIRST);
    f.settings
        .add_shortcut(FIRST, "chill", "https://example.com/lofi")
        .await
        .unwrap();

    let (track, mode) = f
        .registry
        .resolve_and_enqueue(FIRST, "chill", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    assert_eq!(mode, EnqueueMode::Append);
    assert_eq!(track.title, "lofi");
    assert_eq!(track.origin, TrackOrigin::Shortcut);

    let (plain, _) = f
        .registry
        .resolve_and_enqueue(FIRST, "jazz", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    assert_eq!(plain.origin, TrackOrigin::User);
}

#[tokio::test(start_paused = true)]
async fn test_network_failures_feed_the_monitor() {
    let f = Fixture::new();
    f.session(FIRST);

    f.resolver
        .fail_next(ResolveError::Connectivity("connection reset by peer".to_string()));
    let result = f
        .registry
        .resolve_and_enqueue(FIRST, "a", "tester", EnqueueMode::Append)
        .await;
    assert!(matches!(result, Err(Error::Dependency(_))));

    f.resolver.fail_next(ResolveError::NotFound("no match".to_string()));
    let result = f
        .registry
        .resolve_and_enqueue(FIRST, "b", "tester", EnqueueMode::Append)
        .await;
    assert!(matches!(result, Err(Error::Dependency(_))));

    let stats = f.registry.monitor().stats().await;
    assert_eq!(stats.total_failures, 1);
    assert_eq!(stats.consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_refuses_resolver_calls() {
    let f = Fixture::new();
    f.session(FIRST);
    for _ in 0..5 {
        f.registry
            .monitor()
            .record_failure(&"getaddrinfo failed", FailureCategory::Dns)
            .await;
    }

    let result = f
        .registry
        .resolve_and_enqueue(FIRST, "a", "tester", EnqueueMode::Append)
        .await;
    assert!(matches!(result, Err(Error::Dependency(msg)) if msg.contains("offline")));
    assert_eq!(f.resolver.calls(), 0);

    let result = f
        .registry
        .enqueue_playlist(FIRST, "https://example.com/list", "tester", 10, EnqueueMode::Append)
        .await;
    assert!(result.is_err());
    assert_eq!(f.resolver.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_success_resets_consecutive_failures() {
    let f = Fixture::new();
    f.session(FIRST);
    f.resolver
        .fail_next(ResolveError::RateLimited("429 too many requests".to_string()));
    let _ = f
        .registry
        .resolve_and_enqueue(FIRST, "a", "tester", EnqueueMode::Append)
        .await;

    f.registry
        .resolve_and_enqueue(FIRST, "b", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    let stats = f.registry.monitor().stats().await;
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.total_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_playlist_is_capped_and_tagged() {
    let f = Fixture::new();
    f.session(FIRST);
    let mut events = f.registry.subscribe();

    let (queued, skipped) = f
        .registry
        .enqueue_playlist(FIRST, "https://example.com/list", "tester", 3, EnqueueMode::Append)
        .await
        .unwrap();
    assert_eq!((queued, skipped), (3, 2));
    assert_eq!(wait_started(&mut events).await, "item1");

    let engine = f.registry.get(FIRST).unwrap();
    let pending = engine.main_tier();
    assert_eq!(pending.len(), 2);
    assert!(pending.iter().all(|t| t.origin == TrackOrigin::Playlist));
}

#[tokio::test(start_paused = true)]
async fn test_registries_have_independent_monitors() {
    let one = Fixture::new();
    let two = Fixture::new();
    one.registry
        .monitor()
        .record_failure(&"connection refused", FailureCategory::Http)
        .await;

    assert_eq!(one.registry.monitor().stats().await.total_failures, 1);
    assert_eq!(two.registry.monitor().stats().await.total_failures, 0);
}

// ========================================
// Cache sweep
// ========================================

#[tokio::test(start_paused = true)]
async fn test_sweep_skipped_while_playing() {
    let f = Fixture::new();
    f.session(FIRST);
    let mut events = f.registry.subscribe();
    f.registry
        .resolve_and_enqueue(FIRST, "a", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    wait_started(&mut events).await;

    assert!(f.registry.any_playing());
    assert_eq!(f.registry.run_sweep_once().await, SweepOutcome::SkippedWhilePlaying);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_keeps_files_sessions_still_need() {
    let f = Fixture::new();
    let first = f.session(FIRST);
    f.session(SECOND);
    let mut events = f.registry.subscribe();

    // FIRST plays a and b to the end
    f.registry
        .resolve_and_enqueue(FIRST, "a", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    assert_eq!(wait_started(&mut events).await, "a");
    f.registry
        .resolve_and_enqueue(FIRST, "b", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    assert!(first.finish());
    assert_eq!(wait_started(&mut events).await, "b");
    assert!(first.finish());

    // SECOND holds c, paused
    f.registry
        .resolve_and_enqueue(SECOND, "c", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    assert_eq!(wait_started(&mut events).await, "c");
    assert!(f.registry.get(SECOND).unwrap().pause());
    assert!(!f.registry.any_playing());

    let active = f.registry.active_paths();
    assert_eq!(active.len(), 1);

    match f.registry.run_sweep_once().await {
        SweepOutcome::Swept {
            expired, inactive, ..
        } => {
            assert_eq!(expired, 0);
            assert_eq!(inactive, 2);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(active.iter().all(|p| p.exists()));
    assert_eq!(f.fetcher.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_background_sweep_drops_unneeded_files() {
    let f = Fixture::new();
    let sink = f.session(FIRST);
    let mut events = f.registry.subscribe();
    f.registry.start_sweep();

    f.registry
        .resolve_and_enqueue(FIRST, "a", "tester", EnqueueMode::Append)
        .await
        .unwrap();
    wait_started(&mut events).await;
    let path = f.registry.active_paths().into_iter().next().unwrap();
    assert!(path.exists());

    assert!(sink.finish());
    tokio::time::sleep(Duration::from_secs(6 * 60)).await;
    assert!(!path.exists());
    assert!(f.registry.cache().is_empty());
}
