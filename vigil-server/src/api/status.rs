use axum::{Json, extract::State};

use crate::AppState;
use crate::storage::KeyValueStore;

use super::models::{HealthResponse, StatusResponse};

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
    })
}

/// Queue depth, watermark crossings and soft storage faults.
pub async fn status<S>(State(state): State<AppState<S>>) -> Json<StatusResponse>
where
    S: KeyValueStore + Clone,
{
    Json(StatusResponse {
        queue_len: state.queue.len(),
        warning_count: state.queue.warning_count(),
        overflow_count: state.queue.overflow_count(),
        storage_faults: state.db.fault_count(),
    })
}
