//! Local-file collaborators
//!
//! Lets the player run without any network service: tracks are audio files
//! on disk, fetching copies them into the cache, and the sink simulates
//! playback in real time.

use crate::collaborators::{
    AudioSource, CompletionSender, FetchError, Fetcher, ResolveError, Resolver, Sink, SinkError,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use djq_common::Track;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const FILE_SCHEME: &str = "file://";

/// Extensions treated as audio when expanding a directory
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "opus", "m4a", "aac", "wav"];

/// Read the duration of an audio file from its container header
///
/// Blocking; call through `spawn_blocking` from async code. Returns `None`
/// when the container does not record a frame count.
pub fn probe_duration(path: &Path) -> Result<Option<Duration>> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::Acquisition(format!("Failed to probe {}: {}", path.display(), e)))?;

    let track = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::Acquisition(format!("No audio track in {}", path.display())))?;

    let params = &track.codec_params;
    Ok(match (params.n_frames, params.sample_rate) {
        (Some(frames), Some(rate)) if rate > 0 => {
            Some(Duration::from_secs_f64(frames as f64 / rate as f64))
        }
        _ => None,
    })
}

async fn probe_duration_async(path: PathBuf) -> Result<Option<Duration>> {
    tokio::task::spawn_blocking(move || probe_duration(&path))
        .await
        .map_err(|e| Error::Acquisition(format!("probe task failed: {}", e)))?
}

/// Filesystem path behind a `file://` URL (or a bare path)
pub fn path_from_url(url: &str) -> PathBuf {
    PathBuf::from(url.trim().strip_prefix(FILE_SCHEME).unwrap_or(url.trim()))
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Resolves filesystem paths into tracks
#[derive(Debug, Default, Clone)]
pub struct LocalResolver;

impl LocalResolver {
    pub fn new() -> Self {
        Self
    }

    async fn track_for(&self, path: &Path, requested_by: &str) -> std::result::Result<Track, ResolveError> {
        let path = tokio::fs::canonicalize(path)
            .await
            .map_err(|_| ResolveError::NotFound(path.display().to_string()))?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let url = format!("{}{}", FILE_SCHEME, path.display());

        let mut track = Track::new(title, url, requested_by);
        match probe_duration_async(path.clone()).await {
            Ok(Some(duration)) => track = track.with_duration(duration.as_secs()),
            Ok(None) => {}
            Err(e) => debug!("No duration for {}: {}", path.display(), e),
        }
        Ok(track)
    }
}

#[async_trait]
impl Resolver for LocalResolver {
    async fn resolve(&self, query: &str, requested_by: &str) -> std::result::Result<Track, ResolveError> {
        let path = path_from_url(query);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ResolveError::NotFound(query.to_string()));
        }
        self.track_for(&path, requested_by).await
    }

    /// Treat `url` as a directory of audio files, in name order
    async fn resolve_playlist(
        &self,
        url: &str,
        requested_by: &str,
        limit: usize,
    ) -> std::result::Result<(Vec<Track>, usize), ResolveError> {
        let dir = path_from_url(url);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|_| ResolveError::NotFound(url.to_string()))?;

        let mut files = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if is_audio_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        let mut tracks = Vec::new();
        let mut skipped = 0;
        for path in files {
            if tracks.len() >= limit {
                skipped += 1;
                continue;
            }
            match self.track_for(&path, requested_by).await {
                Ok(track) => tracks.push(track),
                Err(_) => skipped += 1,
            }
        }
        Ok((tracks, skipped))
    }
}

/// Fetches local files by copying them into the cache directory
///
/// Files longer than `max_duration` are rejected before copying.
#[derive(Debug, Clone)]
pub struct CopyFetcher {
    max_duration: Duration,
}

impl CopyFetcher {
    pub fn new(max_duration: Duration) -> Self {
        Self { max_duration }
    }
}

#[async_trait]
impl Fetcher for CopyFetcher {
    async fn fetch(&self, url: &str, target_stem: &Path) -> std::result::Result<PathBuf, FetchError> {
        let source = path_from_url(url);

        if let Ok(Some(duration)) = probe_duration_async(source.clone()).await {
            if duration > self.max_duration {
                return Err(FetchError::DurationExceeded {
                    actual_minutes: duration.as_secs() / 60,
                    limit_minutes: self.max_duration.as_secs() / 60,
                });
            }
        }

        let target = match source.extension() {
            Some(ext) => target_stem.with_extension(ext),
            None => target_stem.to_path_buf(),
        };
        tokio::fs::copy(&source, &target)
            .await
            .map_err(|e| FetchError::Failed(format!("{}: {}", source.display(), e)))?;
        debug!("Copied {} -> {}", source.display(), target.display());
        Ok(target)
    }
}

#[derive(Default)]
struct SinkState {
    playing: bool,
    paused: bool,
    /// Bumped on every `play`; a playback task only clears its own state
    generation: u64,
    stop: Option<Arc<Notify>>,
}

/// Sink that "plays" a file by waiting out its duration
///
/// Files without a readable duration play for `fallback_length`.
pub struct SimulatedSink {
    connected: AtomicBool,
    state: Arc<Mutex<SinkState>>,
    fallback_length: Duration,
}

const SINK_TICK: Duration = Duration::from_millis(100);

impl SimulatedSink {
    pub fn new(fallback_length: Duration) -> Self {
        Self {
            connected: AtomicBool::new(true),
            state: Arc::new(Mutex::new(SinkState::default())),
            fallback_length,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn lock_state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl Sink for SimulatedSink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> bool {
        let state = self.lock_state();
        state.playing && !state.paused
    }

    fn is_paused(&self) -> bool {
        let state = self.lock_state();
        state.playing && state.paused
    }

    async fn play(&self, source: AudioSource, done: CompletionSender) -> std::result::Result<(), SinkError> {
        if !self.is_connected() {
            return Err(SinkError::NotConnected);
        }
        let length = match probe_duration_async(source.path.clone()).await {
            Ok(Some(length)) => length,
            _ => self.fallback_length,
        };

        let (generation, stop) = {
            let mut state = self.lock_state();
            if state.playing {
                return Err(SinkError::AlreadyPlaying);
            }
            let stop = Arc::new(Notify::new());
            state.generation += 1;
            state.playing = true;
            state.paused = false;
            state.stop = Some(Arc::clone(&stop));
            (state.generation, stop)
        };
        info!("Sink playing {} ({:?}, {:?})", source.path.display(), source.codec, length);

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut played = Duration::ZERO;
            loop {
                tokio::select! {
                    _ = stop.notified() => break,
                    _ = tokio::time::sleep(SINK_TICK) => {
                        let paused = state.lock().map(|s| s.paused).unwrap_or(false);
                        if !paused {
                            played += SINK_TICK;
                            if played >= length {
                                break;
                            }
                        }
                    }
                }
            }

            {
                let mut state = state.lock().unwrap_or_else(|p| p.into_inner());
                if state.generation == generation {
                    state.playing = false;
                    state.paused = false;
                    state.stop = None;
                }
            }
            let _ = done.send(None);
        });
        Ok(())
    }

    fn pause(&self) {
        let mut state = self.lock_state();
        if state.playing {
            state.paused = true;
        }
    }

    fn resume(&self) {
        self.lock_state().paused = false;
    }

    fn stop(&self) {
        let mut state = self.lock_state();
        if let Some(stop) = state.stop.take() {
            stop.notify_one();
        }
        state.playing = false;
        state.paused = false;
    }

    async fn disconnect(&self) {
        self.stop();
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("Sink disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn write_wav(path: &Path, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(8000 * seconds) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_probe_duration_of_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 3);

        let duration = probe_duration(&path).unwrap().unwrap();
        assert_eq!(duration.as_secs(), 3);
    }

    #[test]
    fn test_path_from_url() {
        assert_eq!(path_from_url("file:///music/a.mp3"), PathBuf::from("/music/a.mp3"));
        assert_eq!(path_from_url(" /music/b.mp3 "), PathBuf::from("/music/b.mp3"));
    }

    #[tokio::test]
    async fn test_resolve_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("My Song.wav");
        write_wav(&path, 2);

        let track = LocalResolver::new()
            .resolve(path.to_str().unwrap(), "alice")
            .await
            .unwrap();
        assert_eq!(track.title, "My Song");
        assert!(track.url.starts_with("file://"));
        assert_eq!(track.duration_secs, Some(2));
        assert_eq!(track.requested_by, "alice");

        let missing = LocalResolver::new().resolve("/no/such/file.mp3", "alice").await;
        assert!(matches!(missing, Err(ResolveError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_directory_as_playlist() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.wav", "a.wav", "c.wav"] {
            write_wav(&dir.path().join(name), 1);
        }
        std::fs::write(dir.path().join("notes.txt"), b"not audio").unwrap();

        let (tracks, skipped) = LocalResolver::new()
            .resolve_playlist(dir.path().to_str().unwrap(), "bob", 2)
            .await
            .unwrap();
        let titles: Vec<&str> = tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_copy_fetcher_rejects_long_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("long.wav");
        write_wav(&source, 3);
        let stem = dir.path().join("cache-entry");

        let strict = CopyFetcher::new(Duration::from_secs(1));
        let err = strict
            .fetch(&format!("file://{}", source.display()), &stem)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::DurationExceeded { .. }));
        assert!(!stem.with_extension("wav").exists());

        let lenient = CopyFetcher::new(Duration::from_secs(900));
        let path = lenient
            .fetch(&format!("file://{}", source.display()), &stem)
            .await
            .unwrap();
        assert_eq!(path, stem.with_extension("wav"));
        assert!(path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_sink_completes_and_stops() {
        let sink = SimulatedSink::new(Duration::from_secs(2));
        let (tx, rx) = oneshot::channel();
        sink.play(AudioSource::new("/no/such/file.opus"), tx).await.unwrap();
        assert!(sink.is_playing());

        let (tx2, _rx2) = oneshot::channel();
        assert_eq!(
            sink.play(AudioSource::new("/x.opus"), tx2).await,
            Err(SinkError::AlreadyPlaying)
        );

        assert_eq!(rx.await.unwrap(), None);
        assert!(!sink.is_playing());

        let (tx, rx) = oneshot::channel();
        sink.play(AudioSource::new("/no/such/file.opus"), tx).await.unwrap();
        sink.pause();
        assert!(sink.is_paused());
        sink.stop();
        assert_eq!(rx.await.unwrap(), None);
        assert!(!sink.is_paused());
    }

    #[tokio::test]
    async fn test_disconnected_sink_refuses_playback() {
        let sink = SimulatedSink::new(Duration::from_secs(1));
        sink.disconnect().await;
        let (tx, _rx) = oneshot::channel();
        assert_eq!(
            sink.play(AudioSource::new("/a.opus"), tx).await,
            Err(SinkError::NotConnected)
        );
    }
}
