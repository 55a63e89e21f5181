//! djq player - main entry point
//!
//! Plays local audio files through the session engine with a simulated
//! sink. Every player event is logged as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use djq_common::config::{load_toml_config, resolve_root_folder, TomlConfig};
use djq_common::events::PlayerEvent;
use djq_common::settings::SqliteSettingsStore;
use djq_common::{EnqueueMode, SessionId};
use djq_player::config::PlayerConfig;
use djq_player::health::spawn_lag_probe;
use djq_player::local::{CopyFetcher, LocalResolver, SimulatedSink};
use djq_player::SessionRegistry;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "djq_player=info,djq_common=info";

/// Command-line arguments for djq-player
#[derive(Parser, Debug)]
#[command(name = "djq-player")]
#[command(about = "Queue-driven audio player for voice sessions")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "DJQ_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder for the settings database and downloads
    #[arg(short, long, env = "DJQ_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Session to play into
    #[arg(short, long, default_value = "1")]
    session: u64,

    /// Queue the files ahead of anything already pending
    #[arg(long)]
    insert_next: bool,

    /// Playback length for files without a readable duration
    #[arg(long, default_value = "30")]
    track_seconds: u64,

    /// Exit once the queue has played out
    #[arg(long)]
    exit_when_idle: bool,

    /// Audio files or directories (directories are queued as playlists)
    files: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = load_toml_config(args.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&toml_config);

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    let config = PlayerConfig::from_toml(&root_folder, &toml_config).apply_env_overrides();
    config.validate().context("Invalid configuration")?;
    config.log_summary();

    tokio::fs::create_dir_all(&config.root_folder)
        .await
        .with_context(|| format!("Failed to create {}", config.root_folder.display()))?;
    let settings = SqliteSettingsStore::open(&config.settings_db)
        .await
        .context("Failed to open settings database")?;
    info!("Settings database: {}", config.settings_db.display());

    let fetcher = CopyFetcher::new(config.max_track_duration);
    let registry = Arc::new(SessionRegistry::new(
        Arc::new(config),
        Arc::new(settings),
        Arc::new(fetcher),
        Arc::new(LocalResolver::new()),
        None,
    ));

    let stale = registry.cache().cleanup_stale().await;
    info!("Startup cleanup removed {} stale file(s)", stale);
    registry.start_sweep();

    let cancel = CancellationToken::new();
    let lag_probe = spawn_lag_probe(
        Arc::clone(registry.monitor()),
        Duration::from_secs(1),
        Duration::from_millis(500),
        cancel.clone(),
    );

    let session = SessionId(args.session);
    let sink = Arc::new(SimulatedSink::new(Duration::from_secs(args.track_seconds)));
    let engine = registry.get_or_create(session, sink);
    let mut events = registry.subscribe();

    let mode = if args.insert_next {
        EnqueueMode::InsertNext
    } else {
        EnqueueMode::Append
    };
    for file in &args.files {
        let queued = if std::path::Path::new(file).is_dir() {
            registry
                .enqueue_playlist(session, file, "cli", usize::MAX, mode)
                .await
                .map(|(count, skipped)| format!("{} track(s), {} skipped", count, skipped))
        } else {
            registry
                .resolve_and_enqueue(session, file, "cli", mode)
                .await
                .map(|(track, _)| track.title)
        };
        match queued {
            Ok(what) => info!("Queued {}", what),
            Err(e) => warn!("Could not queue {}: {}", file, e),
        }
    }

    let mut idle_check = tokio::time::interval(Duration::from_secs(1));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(event) => {
                    log_event(&event);
                    if matches!(
                        event,
                        PlayerEvent::IdleDisconnected { .. } | PlayerEvent::SessionAborted { .. }
                    ) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!("Event log lagged, {} event(s) missed", missed),
                Err(RecvError::Closed) => break,
            },
            _ = idle_check.tick(), if args.exit_when_idle => {
                if engine.is_idle() {
                    info!("Queue finished");
                    break;
                }
            }
        }
    }

    registry.shutdown().await;
    cancel.cancel();
    let _ = lag_probe.await;
    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &TomlConfig) {
    let fallback = config
        .logging
        .level
        .clone()
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_event(event: &PlayerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => info!(target: "djq_player::events", "{}", json),
        Err(e) => warn!("Unserializable event {}: {}", event.event_type(), e),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
