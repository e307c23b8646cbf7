use reqwest::header::CONTENT_TYPE;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use vigil_core::SensorValue;

use crate::transport::{DeliveryError, RetryPolicy, send_with_retry};

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("failed to serialize sensor value: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Delivery(#[from] DeliveryError<reqwest::Response, reqwest::Error>),
}

/// Posts sensor values to the server's ingestion endpoint.
#[derive(Clone)]
pub struct HttpSender {
    http: reqwest::Client,
    endpoint: String,
    policy: RetryPolicy,
}

impl HttpSender {
    pub fn new(server_url: &str, policy: RetryPolicy) -> Self {
        Self::with_client(reqwest::Client::new(), server_url, policy)
    }

    pub fn with_client(http: reqwest::Client, server_url: &str, policy: RetryPolicy) -> Self {
        Self {
            http,
            endpoint: format!("{}/api/sensors", server_url.trim_end_matches('/')),
            policy,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver one value. The body is serialized once and reused for every
    /// attempt.
    pub async fn send(
        &self,
        value: &SensorValue,
        cancel: &CancellationToken,
    ) -> Result<(), SendError> {
        let body = serde_json::to_vec(value)?;

        let response = send_with_retry(&self.policy, cancel, || {
            self.http
                .post(&self.endpoint)
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
        })
        .await?;

        debug!(path = %value.path, status = %response.status(), "Sensor value delivered");
        Ok(())
    }
}

/// Deliver every value arriving on `rx`, one at a time, until cancelled or the
/// channel closes. Values whose delivery fails for good are logged and dropped.
pub async fn run_delivery(
    mut rx: mpsc::Receiver<SensorValue>,
    sender: HttpSender,
    cancel: CancellationToken,
) {
    info!(endpoint = %sender.endpoint(), "Delivery started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Delivery shutting down");
                break;
            }
            value = rx.recv() => {
                let Some(value) = value else {
                    info!("All sensors stopped, delivery finished");
                    break;
                };

                match sender.send(&value, &cancel).await {
                    Ok(()) => {}
                    Err(SendError::Delivery(DeliveryError::Cancelled)) => {
                        info!(path = %value.path, "Delivery cancelled");
                        break;
                    }
                    Err(e) => {
                        error!(path = %value.path, error = %e, "Dropping sensor value");
                    }
                }
            }
        }
    }
}
