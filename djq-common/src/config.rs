//! Configuration loading and root folder resolution
//!
//! Settings come from four layers. Later layers only fill what earlier ones
//! leave unset:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DJQ_CONFIG";

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "DJQ_ROOT_FOLDER";

/// Contents of `config.toml`; every field is optional
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub playback: PlaybackConfig,
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `"info"` or `"djq_player=debug"`
    pub level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Download directory (defaults to `<root>/downloads`)
    pub dir: Option<PathBuf>,
    pub ttl_minutes: Option<u64>,
    pub sweep_interval_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackConfig {
    pub max_track_minutes: Option<u64>,
    pub start_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub preload_stagger_ms: Option<u64>,
    pub history_capacity: Option<usize>,
    /// Clip played by the idle warning timer
    pub idle_warning_clip: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub backoff_base_sec: Option<f64>,
    pub backoff_max_sec: Option<f64>,
    pub fail_window_sec: Option<f64>,
    pub fail_threshold: Option<usize>,
}

impl TomlConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

/// Load the TOML config, falling back to defaults when no file exists
///
/// An explicit path (CLI or `DJQ_CONFIG`) that cannot be read is an error;
/// a missing file in the default locations is not.
pub fn load_toml_config(cli_path: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = cli_path {
        info!("Loading config from {}", path.display());
        return TomlConfig::from_file(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        let path = PathBuf::from(path);
        info!("Loading config from {} ({})", path.display(), CONFIG_ENV_VAR);
        return TomlConfig::from_file(&path);
    }

    match find_config_file() {
        Some(path) => {
            info!("Loading config from {}", path.display());
            TomlConfig::from_file(&path)
        }
        None => {
            warn!("No config file found, using compiled defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Default config file locations, in search order
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("djq").join("config.toml"));
    }
    if cfg!(unix) {
        paths.push(PathBuf::from("/etc/djq/config.toml"));
    }
    paths
}

fn find_config_file() -> Option<PathBuf> {
    default_config_paths().into_iter().find(|p| p.exists())
}

/// Resolve the root folder: CLI > environment > TOML > OS default
pub fn resolve_root_folder(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.root_folder {
        return path.clone();
    }

    default_root_folder()
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("djq"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\djq"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("djq"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/djq"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("djq"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/djq"))
    }
}

/// Parse an environment variable, ignoring it when unset or malformed
pub fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring malformed {}={:?}", name, raw);
            None
        }
    }
}
