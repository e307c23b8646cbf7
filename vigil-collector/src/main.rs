use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vigil_collector::{Config, HttpSender, MockSensors, run_delivery};

#[derive(Parser)]
#[command(name = "vigil-collector")]
#[command(about = "Vigil Collector")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "vigil-collector.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "tracing=info,vigil_collector=info".to_owned());
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

    info!(
        server = %config.server.url,
        sensors = config.sensors.len(),
        max_retry_attempts = config.retry.max_retry_attempts,
        "Starting vigil-collector"
    );

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(config.server.channel_capacity);

    let sensors = MockSensors::new(config.sensors);
    let sensor_handles = sensors.start(tx, cancel.clone());

    let sender = HttpSender::new(&config.server.url, config.retry);
    let delivery_handle = tokio::spawn(run_delivery(rx, sender, cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down...");
    cancel.cancel();

    for handle in sensor_handles {
        let _ = handle.await;
    }
    let _ = delivery_handle.await;

    info!("vigil-collector shut down complete");
    Ok(())
}
