//! Mock collaborators
//!
//! Each mock records what the engine asked of it and can be told to fail.

use async_trait::async_trait;
use djq_common::{SessionId, Track};
use djq_player::collaborators::{
    AudioSource, CompletionSender, FetchError, Fetcher, Recommender, ResolveError, Resolver, Sink,
    SinkError,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

// ========================================
// Sink
// ========================================

#[derive(Default)]
struct SinkState {
    playing: bool,
    paused: bool,
    done: Option<CompletionSender>,
    plays: Vec<PathBuf>,
    refuse_next: usize,
    stops: usize,
}

/// Sink whose playback only ends when the test says so
pub struct MockSink {
    connected: AtomicBool,
    state: Mutex<SinkState>,
}

impl MockSink {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            state: Mutex::new(SinkState::default()),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Refuse the next `n` play calls
    pub fn refuse_next(&self, n: usize) {
        self.state.lock().unwrap().refuse_next = n;
    }

    /// Complete the current playback normally; false if nothing is playing
    pub fn finish(&self) -> bool {
        self.complete(None)
    }

    /// Complete the current playback with a sink error
    pub fn finish_with_error(&self, message: &str) -> bool {
        self.complete(Some(SinkError::Other(message.to_string())))
    }

    fn complete(&self, outcome: Option<SinkError>) -> bool {
        let done = {
            let mut state = self.state.lock().unwrap();
            state.playing = false;
            state.paused = false;
            state.done.take()
        };
        match done {
            Some(done) => done.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Files handed to `play`, in order
    pub fn plays(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().plays.clone()
    }

    pub fn stops(&self) -> usize {
        self.state.lock().unwrap().stops
    }
}

#[async_trait]
impl Sink for MockSink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.playing && !state.paused
    }

    fn is_paused(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.playing && state.paused
    }

    async fn play(&self, source: AudioSource, done: CompletionSender) -> Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }
        let mut state = self.state.lock().unwrap();
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(SinkError::Other("encoder refused".to_string()));
        }
        if state.playing {
            return Err(SinkError::AlreadyPlaying);
        }
        state.playing = true;
        state.paused = false;
        state.done = Some(done);
        state.plays.push(source.path);
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        if state.playing {
            state.paused = true;
        }
    }

    fn resume(&self) {
        self.state.lock().unwrap().paused = false;
    }

    fn stop(&self) {
        let done = {
            let mut state = self.state.lock().unwrap();
            state.stops += 1;
            state.playing = false;
            state.paused = false;
            state.done.take()
        };
        if let Some(done) = done {
            let _ = done.send(None);
        }
    }

    async fn disconnect(&self) {
        self.stop();
        self.set_connected(false);
    }
}

// ========================================
// Fetcher
// ========================================

/// Fetcher that writes a small `.opus` file per URL
#[derive(Default)]
pub struct MockFetcher {
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    too_long: Mutex<HashMap<String, u64>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_url(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Report `url` as `minutes` long (over the 15 minute limit)
    pub fn too_long(&self, url: &str, minutes: u64) {
        self.too_long.lock().unwrap().insert(url.to_string(), minutes);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, target_stem: &Path) -> Result<PathBuf, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());

        if let Some(minutes) = self.too_long.lock().unwrap().get(url).copied() {
            return Err(FetchError::DurationExceeded {
                actual_minutes: minutes,
                limit_minutes: 15,
            });
        }
        if self.failing.lock().unwrap().contains(url) {
            return Err(FetchError::Failed(format!("HTTP 403 for {}", url)));
        }

        let path = target_stem.with_extension("opus");
        tokio::fs::write(&path, url.as_bytes())
            .await
            .map_err(|e| FetchError::Failed(e.to_string()))?;
        Ok(path)
    }
}

// ========================================
// Resolver
// ========================================

/// Resolver mapping a query to `https://example.com/<query>`
#[derive(Default)]
pub struct MockResolver {
    calls: AtomicUsize,
    failures: Mutex<VecDeque<ResolveError>>,
}

impl MockResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for the next call
    pub fn fail_next(&self, err: ResolveError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn resolve(&self, query: &str, requested_by: &str) -> Result<Track, ResolveError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let name = query.trim_start_matches("https://example.com/");
        Ok(Track::new(name, format!("https://example.com/{}", name), requested_by))
    }

    async fn resolve_playlist(
        &self,
        url: &str,
        requested_by: &str,
        limit: usize,
    ) -> Result<(Vec<Track>, usize), ResolveError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let total = 5;
        let tracks: Vec<Track> = (1..=total.min(limit))
            .map(|i| Track::new(format!("item{}", i), format!("{}/{}", url, i), requested_by))
            .collect();
        let skipped = total - tracks.len();
        Ok((tracks, skipped))
    }
}

// ========================================
// Recommender
// ========================================

/// Recommender serving a fixed catalogue
#[derive(Default)]
pub struct MockRecommender {
    catalogue: Mutex<Vec<Track>>,
    played: Mutex<Vec<String>>,
    requesters: Mutex<Vec<String>>,
    cleared: AtomicUsize,
    failing: AtomicBool,
}

impl MockRecommender {
    pub fn new(catalogue: Vec<Track>) -> Self {
        Self {
            catalogue: Mutex::new(catalogue),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Titles reported through `record_played`
    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }

    pub fn requesters(&self) -> Vec<String> {
        self.requesters.lock().unwrap().clone()
    }

    pub fn cleared(&self) -> usize {
        self.cleared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recommender for MockRecommender {
    async fn record_played(&self, _session: SessionId, track: &Track) {
        self.played.lock().unwrap().push(track.title.clone());
    }

    async fn recommend(
        &self,
        _session: SessionId,
        requested_by: &str,
        count: usize,
    ) -> Result<Vec<Track>, ResolveError> {
        self.requesters.lock().unwrap().push(requested_by.to_string());
        if self.failing.load(Ordering::SeqCst) {
            return Err(ResolveError::Connectivity("getaddrinfo failed".to_string()));
        }
        Ok(self
            .catalogue
            .lock()
            .unwrap()
            .iter()
            .take(count)
            .map(|t| Track {
                requested_by: requested_by.to_string(),
                ..t.requeued()
            })
            .collect())
    }

    async fn clear_history(&self, _session: SessionId) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}
