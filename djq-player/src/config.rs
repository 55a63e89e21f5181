//! djq-player configuration
//!
//! Built in layers on top of the shared TOML bootstrap file:
//!
//! 1. Built-in defaults ([`PlayerConfig::with_root`])
//! 2. TOML configuration file ([`PlayerConfig::from_toml`])
//! 3. Environment overrides for the health monitor (`DJQ_BACKOFF_BASE_SEC`,
//!    `DJQ_BACKOFF_MAX_SEC`, `DJQ_FAIL_WINDOW_SEC`, `DJQ_FAIL_THRESHOLD`)
//!
//! [`PlayerConfig::validate`] must pass before the config is used.

use crate::cache::DEFAULT_CACHE_TTL;
use crate::error::{Error, Result};
use crate::health::HealthParams;
use djq_common::config::{env_override, TomlConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const ENV_BACKOFF_BASE_SEC: &str = "DJQ_BACKOFF_BASE_SEC";
pub const ENV_BACKOFF_MAX_SEC: &str = "DJQ_BACKOFF_MAX_SEC";
pub const ENV_FAIL_WINDOW_SEC: &str = "DJQ_FAIL_WINDOW_SEC";
pub const ENV_FAIL_THRESHOLD: &str = "DJQ_FAIL_THRESHOLD";

/// Longest track the fetcher accepts by default; must not exceed the cache TTL
pub const DEFAULT_MAX_TRACK_DURATION: Duration = Duration::from_secs(15 * 60);

/// Player configuration
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub root_folder: PathBuf,
    /// Download directory managed by the media cache
    pub cache_dir: PathBuf,
    /// Settings database file
    pub settings_db: PathBuf,

    // === Cache ===
    pub cache_ttl: Duration,
    pub sweep_interval: Duration,

    // === Playback ===
    pub max_track_duration: Duration,
    /// Retries after the first failed playback start
    pub start_retries: u32,
    pub retry_delay: Duration,
    /// Total wait for the voice connection before the session aborts
    pub connect_wait: Duration,
    pub connect_poll: Duration,
    pub preload_stagger: Duration,
    /// Pause after a preload candidate fails
    pub preload_failure_delay: Duration,
    /// Back-off after an unexpected error inside one loop iteration
    pub loop_error_delay: Duration,
    pub history_capacity: usize,
    pub shuffle_recent_capacity: usize,
    pub idle_warning_clip: Option<PathBuf>,

    // === Automatic refill ===
    pub autoplay_count: usize,
    pub autoplay_stagger: Duration,

    // === Health monitor ===
    pub health: HealthParams,
}

impl PlayerConfig {
    /// Built-in defaults rooted at `root_folder`
    pub fn with_root(root_folder: impl Into<PathBuf>) -> Self {
        let root_folder = root_folder.into();
        Self {
            cache_dir: root_folder.join("downloads"),
            settings_db: root_folder.join("djq.db"),
            root_folder,
            cache_ttl: DEFAULT_CACHE_TTL,
            sweep_interval: Duration::from_secs(5 * 60),
            max_track_duration: DEFAULT_MAX_TRACK_DURATION,
            start_retries: 2,
            retry_delay: Duration::from_millis(500),
            connect_wait: Duration::from_secs(3),
            connect_poll: Duration::from_millis(500),
            preload_stagger: Duration::from_secs(2),
            preload_failure_delay: Duration::from_secs(1),
            loop_error_delay: Duration::from_secs(1),
            history_capacity: 50,
            shuffle_recent_capacity: 10,
            idle_warning_clip: None,
            autoplay_count: 3,
            autoplay_stagger: Duration::from_millis(500),
            health: HealthParams::default(),
        }
    }

    /// Defaults overlaid with the TOML file
    pub fn from_toml(root_folder: &Path, toml: &TomlConfig) -> Self {
        let mut config = Self::with_root(root_folder);

        if let Some(dir) = &toml.cache.dir {
            config.cache_dir = dir.clone();
        }
        if let Some(minutes) = toml.cache.ttl_minutes {
            config.cache_ttl = Duration::from_secs(minutes * 60);
        }
        if let Some(minutes) = toml.cache.sweep_interval_minutes {
            config.sweep_interval = Duration::from_secs(minutes * 60);
        }

        let playback = &toml.playback;
        if let Some(minutes) = playback.max_track_minutes {
            config.max_track_duration = Duration::from_secs(minutes * 60);
        }
        if let Some(retries) = playback.start_retries {
            config.start_retries = retries;
        }
        if let Some(ms) = playback.retry_delay_ms {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = playback.preload_stagger_ms {
            config.preload_stagger = Duration::from_millis(ms);
        }
        if let Some(capacity) = playback.history_capacity {
            config.history_capacity = capacity;
        }
        if let Some(clip) = &playback.idle_warning_clip {
            config.idle_warning_clip = Some(clip.clone());
        }

        let health = &toml.health;
        if let Some(secs) = health.backoff_base_sec {
            config.health.backoff_base = secs_f64(secs);
        }
        if let Some(secs) = health.backoff_max_sec {
            config.health.backoff_max = secs_f64(secs);
        }
        if let Some(secs) = health.fail_window_sec {
            config.health.fail_window = secs_f64(secs);
        }
        if let Some(threshold) = health.fail_threshold {
            config.health.fail_threshold = threshold;
        }

        config
    }

    /// Apply `DJQ_*` environment overrides for the health monitor
    pub fn apply_env_overrides(mut self) -> Self {
        if let Some(secs) = env_override::<f64>(ENV_BACKOFF_BASE_SEC) {
            self.health.backoff_base = secs_f64(secs);
        }
        if let Some(secs) = env_override::<f64>(ENV_BACKOFF_MAX_SEC) {
            self.health.backoff_max = secs_f64(secs);
        }
        if let Some(secs) = env_override::<f64>(ENV_FAIL_WINDOW_SEC) {
            self.health.fail_window = secs_f64(secs);
        }
        if let Some(threshold) = env_override::<usize>(ENV_FAIL_THRESHOLD) {
            self.health.fail_threshold = threshold;
        }
        self
    }

    /// Reject inconsistent settings
    ///
    /// The cache TTL must cover the longest accepted track, or a file could be
    /// evicted while it is still playing.
    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl < self.max_track_duration {
            return Err(Error::Config(format!(
                "cache TTL ({}s) is shorter than the maximum track duration ({}s)",
                self.cache_ttl.as_secs(),
                self.max_track_duration.as_secs()
            )));
        }
        if self.connect_poll.is_zero() {
            return Err(Error::Config("connect_poll must be positive".to_string()));
        }
        if self.history_capacity == 0 {
            return Err(Error::Config("history_capacity must be positive".to_string()));
        }
        if self.health.fail_threshold == 0 {
            return Err(Error::Config("fail_threshold must be positive".to_string()));
        }
        if self.health.backoff_max < self.health.backoff_base {
            return Err(Error::Config(
                "backoff_max must not be below backoff_base".to_string(),
            ));
        }
        Ok(())
    }

    /// Longest accepted track in whole minutes
    pub fn max_track_minutes(&self) -> u64 {
        self.max_track_duration.as_secs() / 60
    }

    pub fn log_summary(&self) {
        info!("Root folder: {}", self.root_folder.display());
        info!(
            "Cache: {} (ttl {}s, sweep every {}s)",
            self.cache_dir.display(),
            self.cache_ttl.as_secs(),
            self.sweep_interval.as_secs()
        );
        info!(
            "Health: backoff {:?}..{:?}, {} failures in {:?} -> offline",
            self.health.backoff_base,
            self.health.backoff_max,
            self.health.fail_threshold,
            self.health.fail_window
        );
    }
}

fn secs_f64(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}
