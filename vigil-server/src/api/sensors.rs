use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
};
use jiff::Timestamp;
use tracing::{debug, error, warn};
use vigil_core::{SensorPath, SensorValue, UpdateMessage};

use crate::AppState;
use crate::convert;
use crate::dispatch::Ingested;
use crate::storage::KeyValueStore;

use super::error::ApiError;
use super::models::{ApiResponse, HistoryItem, HistoryQueryParams, LatestQueryParams};

const DEFAULT_HISTORY_LIMIT: usize = 100;
const MAX_HISTORY_LIMIT: usize = 10_000;

// Best effort: the raw body is echoed as JSON when it parses, as text otherwise.
fn echo(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Accept one sensor value. It is validated, rendered and queued; storage
/// happens later in the dispatcher.
pub async fn ingest<S>(
    State(state): State<AppState<S>>,
    body: Bytes,
) -> Result<Json<SensorValue>, ApiError>
where
    S: KeyValueStore + Clone,
{
    let value: SensorValue = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "Malformed sensor value");
        ApiError::Rejected {
            error: e.to_string(),
            value: echo(&body),
        }
    })?;

    let item = Ingested::accept(value.clone(), Timestamp::now()).map_err(|e| {
        warn!(path = %value.path, error = %e, "Sensor value rejected");
        ApiError::Rejected {
            error: e.to_string(),
            value: echo(&body),
        }
    })?;

    let depth = state.queue.enqueue(item);
    debug!(path = %value.path, queue_len = depth, "Sensor value queued");

    Ok(Json(value))
}

/// Current value of every sensor, optionally limited to one product.
pub async fn latest<S>(
    State(state): State<AppState<S>>,
    Query(params): Query<LatestQueryParams>,
) -> Json<ApiResponse<Vec<UpdateMessage>>>
where
    S: KeyValueStore + Clone,
{
    let updates = state.db.latest_updates(params.product.as_deref()).await;
    Json(ApiResponse::ok(updates))
}

pub async fn history<S>(
    State(state): State<AppState<S>>,
    Query(params): Query<HistoryQueryParams>,
) -> Result<Json<ApiResponse<Vec<HistoryItem>>>, ApiError>
where
    S: KeyValueStore + Clone,
{
    let path = SensorPath::parse(&params.path).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let from = params.from.unwrap_or(Timestamp::UNIX_EPOCH);
    let to = params.to.unwrap_or_else(Timestamp::now);
    if from >= to {
        return Err(ApiError::BadRequest("'from' must be before 'to'".to_owned()));
    }
    let limit = params
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);

    let records = state
        .db
        .history(path.as_str(), from, to, Some(limit))
        .await;

    let mut items = Vec::with_capacity(records.len());
    for record in records {
        let decoded = convert::decode_record(&record).and_then(|value| {
            convert::update_from_record(&record, path.product()).map(|update| (update, value))
        });
        match decoded {
            Ok((update, value)) => items.push(HistoryItem {
                update,
                value,
                time_collected: record.time_collected,
            }),
            Err(e) => {
                error!(path = %record.path, timestamp = record.timestamp, error = %e, "Skipping unreadable history item");
            }
        }
    }

    Ok(Json(ApiResponse::ok(items)))
}
