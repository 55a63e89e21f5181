//! Per-session settings
//!
//! **Responsibilities:**
//! - `SessionSettings` record with lenient, fully-defaulted decoding
//! - `SettingsStore` trait: whole-record read-modify-write updates
//! - `MemorySettingsStore` (process-local) and `SqliteSettingsStore` (persisted)
//!
//! Every write goes through [`SettingsStore::update`], which reads the stored
//! record, applies one closure and writes the whole record back inside a single
//! exclusive section. Concurrent partial updates therefore never drop each
//! other's fields.

#[cfg(feature = "sqlx")]
mod sqlite;

#[cfg(feature = "sqlx")]
pub use sqlite::SqliteSettingsStore;

use crate::track::SessionId;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tokio::sync::Mutex;

/// Locales the UI layer can render
pub const SUPPORTED_LOCALES: &[&str] = &["tr", "en"];

pub const DEFAULT_LOCALE: &str = "tr";
pub const DEFAULT_IDLE_DISCONNECT_ENABLED: bool = true;
pub const DEFAULT_IDLE_DISCONNECT_MINUTES: i64 = 60;
pub const DEFAULT_IDLE_WARN_MINUTES: i64 = 15;
pub const DEFAULT_IDLE_WARNING_ENABLED: bool = true;
pub const DEFAULT_AUTOPLAY_ENABLED: bool = false;

/// How the main tier is reordered on enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ShuffleMode {
    #[default]
    None,
    /// Uniform random order
    Full,
    /// Random order with recently played tracks moved to the end
    Smart,
}

impl FromStr for ShuffleMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(ShuffleMode::None),
            "full" => Ok(ShuffleMode::Full),
            "smart" => Ok(ShuffleMode::Smart),
            other => Err(crate::Error::InvalidInput(format!("Unknown shuffle mode: {}", other))),
        }
    }
}

/// Loop policy applied when a tier runs dry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    None,
    /// Replay the snapshot of the main tier once everything has played
    Queue,
    /// Replay the last finished track
    Single,
}

impl FromStr for LoopMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" => Ok(LoopMode::None),
            "queue" => Ok(LoopMode::Queue),
            "single" => Ok(LoopMode::Single),
            other => Err(crate::Error::InvalidInput(format!("Unknown loop mode: {}", other))),
        }
    }
}

/// Settings record for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub locale: String,
    pub shuffle_mode: ShuffleMode,
    pub loop_mode: LoopMode,
    pub autoplay_enabled: bool,
    pub idle_disconnect_enabled: bool,
    pub idle_disconnect_minutes: i64,
    pub idle_warn_minutes: i64,
    pub idle_warning_enabled: bool,
    /// Named shortcut -> URL
    pub shortcuts: BTreeMap<String, String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            locale: DEFAULT_LOCALE.to_string(),
            shuffle_mode: ShuffleMode::None,
            loop_mode: LoopMode::None,
            autoplay_enabled: DEFAULT_AUTOPLAY_ENABLED,
            idle_disconnect_enabled: DEFAULT_IDLE_DISCONNECT_ENABLED,
            idle_disconnect_minutes: DEFAULT_IDLE_DISCONNECT_MINUTES,
            idle_warn_minutes: DEFAULT_IDLE_WARN_MINUTES,
            idle_warning_enabled: DEFAULT_IDLE_WARNING_ENABLED,
            shortcuts: BTreeMap::new(),
        }
    }
}

impl SessionSettings {
    /// Decode a stored record, defaulting every missing or malformed field
    pub fn from_value(entry: &Value) -> Self {
        let defaults = Self::default();
        Self {
            locale: normalize_locale(entry.get("locale").and_then(Value::as_str).unwrap_or(DEFAULT_LOCALE)),
            shuffle_mode: entry
                .get("shuffle_mode")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.shuffle_mode),
            loop_mode: entry
                .get("loop_mode")
                .and_then(Value::as_str)
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.loop_mode),
            autoplay_enabled: extract_bool(entry, "autoplay_enabled", defaults.autoplay_enabled),
            idle_disconnect_enabled: extract_bool(
                entry,
                "idle_disconnect_enabled",
                defaults.idle_disconnect_enabled,
            ),
            idle_disconnect_minutes: extract_int(
                entry,
                "idle_disconnect_minutes",
                defaults.idle_disconnect_minutes,
            ),
            idle_warn_minutes: extract_int(entry, "idle_warn_minutes", defaults.idle_warn_minutes),
            idle_warning_enabled: extract_bool(
                entry,
                "idle_warning_enabled",
                defaults.idle_warning_enabled,
            ),
            shortcuts: extract_shortcuts(entry),
        }
    }

    /// Look up a shortcut key ignoring case
    pub fn find_shortcut_key(&self, name: &str) -> Option<&str> {
        let target = name.to_lowercase();
        self.shortcuts
            .keys()
            .find(|key| key.to_lowercase() == target)
            .map(String::as_str)
    }

    /// Shortcut URL for `name`, ignoring case
    pub fn shortcut_url(&self, name: &str) -> Option<&str> {
        self.find_shortcut_key(name)
            .and_then(|key| self.shortcuts.get(key))
            .map(String::as_str)
    }
}

/// Map unsupported locales to the default
pub fn normalize_locale(locale: &str) -> String {
    if SUPPORTED_LOCALES.contains(&locale) {
        locale.to_string()
    } else {
        DEFAULT_LOCALE.to_string()
    }
}

fn extract_bool(entry: &Value, key: &str, default: bool) -> bool {
    match entry.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(default),
        _ => default,
    }
}

fn extract_int(entry: &Value, key: &str, default: i64) -> i64 {
    match entry.get(key) {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn extract_shortcuts(entry: &Value) -> BTreeMap<String, String> {
    match entry.get("shortcuts") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                let url = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), url)
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Update closure applied to a settings record
pub type SettingsUpdate = Box<dyn FnOnce(&mut SessionSettings) + Send>;

/// Storage for per-session settings
///
/// `get` never fails for a missing session: it returns the defaulted record.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Read the fully-defaulted record for `session`
    async fn get(&self, session: SessionId) -> Result<SessionSettings>;

    /// Whole-record read-modify-write; returns the record as written
    async fn update(&self, session: SessionId, apply: SettingsUpdate) -> Result<SessionSettings>;

    async fn set_locale(&self, session: SessionId, locale: &str) -> Result<()> {
        let locale = normalize_locale(locale);
        self.update(session, Box::new(move |s| s.locale = locale)).await?;
        Ok(())
    }

    async fn set_shuffle_mode(&self, session: SessionId, mode: ShuffleMode) -> Result<()> {
        self.update(session, Box::new(move |s| s.shuffle_mode = mode)).await?;
        Ok(())
    }

    async fn set_loop_mode(&self, session: SessionId, mode: LoopMode) -> Result<()> {
        self.update(session, Box::new(move |s| s.loop_mode = mode)).await?;
        Ok(())
    }

    async fn set_autoplay(&self, session: SessionId, enabled: bool) -> Result<()> {
        self.update(session, Box::new(move |s| s.autoplay_enabled = enabled)).await?;
        Ok(())
    }

    async fn set_idle_disconnect_enabled(&self, session: SessionId, enabled: bool) -> Result<()> {
        self.update(session, Box::new(move |s| s.idle_disconnect_enabled = enabled))
            .await?;
        Ok(())
    }

    async fn set_idle_disconnect_minutes(&self, session: SessionId, minutes: i64) -> Result<()> {
        self.update(session, Box::new(move |s| s.idle_disconnect_minutes = minutes))
            .await?;
        Ok(())
    }

    async fn set_idle_warning(&self, session: SessionId, enabled: bool, warn_minutes: i64) -> Result<()> {
        self.update(
            session,
            Box::new(move |s| {
                s.idle_warning_enabled = enabled;
                s.idle_warn_minutes = warn_minutes.max(0);
            }),
        )
        .await?;
        Ok(())
    }

    /// Add or replace a shortcut (an existing key differing only in case is replaced)
    async fn add_shortcut(&self, session: SessionId, name: &str, url: &str) -> Result<()> {
        let name = name.to_string();
        let url = url.to_string();
        self.update(
            session,
            Box::new(move |s| {
                if let Some(existing) = s.find_shortcut_key(&name).map(str::to_string) {
                    s.shortcuts.remove(&existing);
                }
                s.shortcuts.insert(name, url);
            }),
        )
        .await?;
        Ok(())
    }

    /// Remove a shortcut ignoring case; returns whether one was removed
    async fn remove_shortcut(&self, session: SessionId, name: &str) -> Result<bool> {
        let before = self.get(session).await?.shortcuts.len();
        let name = name.to_string();
        let after = self
            .update(
                session,
                Box::new(move |s| {
                    if let Some(existing) = s.find_shortcut_key(&name).map(str::to_string) {
                        s.shortcuts.remove(&existing);
                    }
                }),
            )
            .await?
            .shortcuts
            .len();
        Ok(after < before)
    }

    async fn shortcut_url(&self, session: SessionId, name: &str) -> Result<Option<String>> {
        Ok(self.get(session).await?.shortcut_url(name).map(str::to_string))
    }

    /// Shortcuts sorted by name, ignoring case
    async fn list_shortcuts(&self, session: SessionId) -> Result<Vec<(String, String)>> {
        let mut items: Vec<(String, String)> = self.get(session).await?.shortcuts.into_iter().collect();
        items.sort_by_key(|(name, _)| name.to_lowercase());
        Ok(items)
    }
}

/// Process-local settings store
#[derive(Default)]
pub struct MemorySettingsStore {
    records: Mutex<HashMap<SessionId, SessionSettings>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, session: SessionId) -> Result<SessionSettings> {
        Ok(self
            .records
            .lock()
            .await
            .get(&session)
            .cloned()
            .unwrap_or_default())
    }

    async fn update(&self, session: SessionId, apply: SettingsUpdate) -> Result<SessionSettings> {
        let mut records = self.records.lock().await;
        let record = records.entry(session).or_default();
        apply(record);
        Ok(record.clone())
    }
}
