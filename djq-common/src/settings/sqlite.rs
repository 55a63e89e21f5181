//! SQLite-backed settings store
//!
//! One row per session holding the settings record as JSON. Updates run a
//! read-modify-write inside a transaction while holding a process-local write
//! lock, so two concurrent partial updates never interleave.

use super::{SessionSettings, SettingsStore, SettingsUpdate};
use crate::track::SessionId;
use crate::Result;
use async_trait::async_trait;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct SqliteSettingsStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl SqliteSettingsStore {
    /// Open (creating if needed) the settings database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let newly_created = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&db_url)
            .await?;

        if newly_created {
            info!("Initialized new settings database: {}", db_path.display());
        } else {
            info!("Opened existing settings database: {}", db_path.display());
        }

        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

        Self::from_pool(pool).await
    }

    /// In-memory database (single connection, so every query sees the same data)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        create_session_settings_table(&pool).await?;
        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn create_session_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_settings (
            session_id INTEGER PRIMARY KEY,
            settings TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

fn decode(raw: Option<String>) -> SessionSettings {
    match raw {
        Some(text) => match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(value) => SessionSettings::from_value(&value),
            Err(e) => {
                debug!("Discarding malformed settings record: {}", e);
                SessionSettings::default()
            }
        },
        None => SessionSettings::default(),
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn get(&self, session: SessionId) -> Result<SessionSettings> {
        let row = sqlx::query("SELECT settings FROM session_settings WHERE session_id = ?")
            .bind(session.0 as i64)
            .fetch_optional(&self.pool)
            .await?;
        Ok(decode(row.map(|r| r.get::<String, _>("settings"))))
    }

    async fn update(&self, session: SessionId, apply: SettingsUpdate) -> Result<SessionSettings> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT settings FROM session_settings WHERE session_id = ?")
            .bind(session.0 as i64)
            .fetch_optional(&mut *tx)
            .await?;
        let mut settings = decode(row.map(|r| r.get::<String, _>("settings")));

        apply(&mut settings);

        let encoded = serde_json::to_string(&settings)?;
        sqlx::query(
            r#"
            INSERT INTO session_settings (session_id, settings, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                settings = excluded.settings,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session.0 as i64)
        .bind(&encoded)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(session = %session, "Settings updated");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{LoopMode, ShuffleMode};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_missing_session_returns_defaults() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        assert_eq!(store.get(SessionId(5)).await.unwrap(), SessionSettings::default());
    }

    #[tokio::test]
    async fn test_update_is_persisted_and_preserves_fields() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        let session = SessionId(5);

        store.set_loop_mode(session, LoopMode::Single).await.unwrap();
        store.set_shuffle_mode(session, ShuffleMode::Smart).await.unwrap();
        store.set_idle_disconnect_minutes(session, 30).await.unwrap();

        let settings = store.get(session).await.unwrap();
        assert_eq!(settings.loop_mode, LoopMode::Single);
        assert_eq!(settings.shuffle_mode, ShuffleMode::Smart);
        assert_eq!(settings.idle_disconnect_minutes, 30);
        assert_eq!(settings.locale, "tr");
    }

    #[tokio::test]
    async fn test_malformed_row_decodes_to_defaults() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        sqlx::query("INSERT INTO session_settings (session_id, settings, updated_at) VALUES (1, 'not json', '')")
            .execute(store.pool())
            .await
            .unwrap();

        assert_eq!(store.get(SessionId(1)).await.unwrap(), SessionSettings::default());
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.db");

        {
            let store = SqliteSettingsStore::open(&path).await.unwrap();
            store.set_locale(SessionId(3), "en").await.unwrap();
            store.pool().close().await;
        }

        let store = SqliteSettingsStore::open(&path).await.unwrap();
        assert_eq!(store.get(SessionId(3)).await.unwrap().locale, "en");
    }

    #[tokio::test]
    async fn test_concurrent_updates_keep_every_shortcut() {
        let store = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        let session = SessionId(11);

        let mut handles = Vec::new();
        for i in 0..10 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .add_shortcut(session, &format!("mix{}", i), "https://example.com")
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.list_shortcuts(session).await.unwrap().len(), 10);
    }
}
