use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use vigil_server::{
    AppState, api,
    config::{BackupConfig, Config, StorageConfig},
    dispatch::{DispatchConfig, Dispatcher},
    monitor,
    policy::{ChannelPolicyHook, PolicyEvaluator},
    queue::{IngestionQueue, QueueConfig},
    storage::{Database, KeyValueStore, MemoryStore, SqliteStore},
};

const ALERT_CHANNEL_CAPACITY: usize = 256;

#[derive(Parser)]
#[command(name = "vigil-server")]
#[command(about = "Vigil telemetry server")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "vigil-server.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tracing=info,vigil_server=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    info!(http_addr = %config.server.http_addr, "Starting server");

    match config.storage {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            run_server(
                MemoryStore::new(),
                config.server.http_addr,
                config.queue,
                config.dispatch,
                config.backup,
            )
            .await?;
        }
        StorageConfig::Sqlite { path } => {
            info!(path = ?path, "Using SQLite storage");
            let store = SqliteStore::new(&path).await?;
            run_server(
                store,
                config.server.http_addr,
                config.queue,
                config.dispatch,
                config.backup,
            )
            .await?;
        }
    }

    Ok(())
}

async fn run_server<S>(
    store: S,
    http_addr: SocketAddr,
    queue_config: QueueConfig,
    dispatch_config: DispatchConfig,
    backup: Option<BackupConfig>,
) -> color_eyre::Result<()>
where
    S: KeyValueStore + Clone,
{
    let db = Database::new(store);
    let queue = Arc::new(IngestionQueue::new(queue_config));
    let cancel = CancellationToken::new();

    let (hook, samples) = ChannelPolicyHook::new(dispatch_config.policy_channel_capacity);
    let (alerts_tx, alerts_rx) = mpsc::channel(ALERT_CHANNEL_CAPACITY);

    let mut tasks = vec![
        tokio::spawn(
            Dispatcher::new(Arc::clone(&queue), db.clone(), hook).run(
                Duration::from_millis(dispatch_config.interval_ms),
                cancel.clone(),
            ),
        ),
        tokio::spawn(PolicyEvaluator::new(db.clone(), samples, alerts_tx).run(cancel.clone())),
        tokio::spawn(monitor::log_alerts(alerts_rx, cancel.clone())),
        tokio::spawn(monitor::log_queue_signals(queue.subscribe(), cancel.clone())),
    ];

    if let Some(backup) = backup {
        tasks.push(tokio::spawn(monitor::run_backups(
            db.clone(),
            backup.dir,
            Duration::from_secs(backup.interval_secs),
            cancel.clone(),
        )));
    }

    let state = AppState { db, queue };
    let app = api::router().with_state(state);

    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_for_http = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_for_http.cancelled().await;
        }) => {
            if let Err(e) = result {
                error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = ?e, "Background task failed");
        }
    }

    info!("Server stopped");
    Ok(())
}
