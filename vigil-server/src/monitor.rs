//! Background tasks that watch the pipeline and report on it.

use std::path::PathBuf;
use std::time::Duration;

use jiff::Timestamp;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::policy::AlertEvent;
use crate::queue::QueueSignal;
use crate::storage::entities::AlertSeverity;
use crate::storage::{Database, KeyValueStore};

/// Log every watermark crossing of the ingestion queue.
pub async fn log_queue_signals(
    mut signals: broadcast::Receiver<QueueSignal>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Ok(QueueSignal::Warning { depth }) => {
                    warn!(queue_len = depth, "Ingestion queue reached warning watermark");
                }
                Ok(QueueSignal::Overflow { depth }) => {
                    error!(queue_len = depth, "Ingestion queue reached overflow watermark");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Queue signal listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Log alerts raised by the policy evaluator. Delivering them elsewhere is
/// not handled here.
pub async fn log_alerts(mut alerts: mpsc::Receiver<AlertEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            alert = alerts.recv() => {
                let Some(alert) = alert else { break };
                match alert.severity {
                    AlertSeverity::Critical => error!(
                        policy_id = %alert.policy_id,
                        path = %alert.path,
                        message = %alert.message,
                        "Alert raised"
                    ),
                    AlertSeverity::Warning | AlertSeverity::Info => warn!(
                        policy_id = %alert.policy_id,
                        path = %alert.path,
                        severity = ?alert.severity,
                        message = %alert.message,
                        "Alert raised"
                    ),
                }
            }
        }
    }
}

/// Snapshot the database into `dir` every `period`.
pub async fn run_backups<S: KeyValueStore>(
    db: Database<S>,
    dir: PathBuf,
    period: Duration,
    cancel: CancellationToken,
) {
    // a zero period would make the interval panic
    let period = period.max(Duration::from_secs(1));
    let mut interval = tokio::time::interval(period);
    // the first tick completes immediately
    interval.tick().await;

    info!(dir = %dir.display(), period_secs = period.as_secs(), "Periodic backups enabled");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Backup task shutting down");
                break;
            }
            _ = interval.tick() => {
                db.backup(&dir, Timestamp::now()).await;
            }
        }
    }
}
