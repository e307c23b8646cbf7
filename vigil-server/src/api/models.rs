use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use vigil_core::{SensorValue, UpdateMessage};

use crate::storage::entities::ProductEntity;

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }
}

// Product Request/Response Models
#[derive(Debug, Serialize, Deserialize)]
pub struct ProductCreateRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub key: String,
    pub added_at: Timestamp,
    pub sensors: usize,
}

impl ProductResponse {
    pub fn new(product: ProductEntity, sensors: usize) -> Self {
        Self {
            id: product.id.into(),
            name: product.name.into(),
            key: product.key.to_string(),
            added_at: product.added_at,
            sensors,
        }
    }
}

// History Models
#[derive(Debug, Deserialize)]
pub struct HistoryQueryParams {
    pub path: String,
    #[serde(default)]
    pub from: Option<Timestamp>,
    #[serde(default)]
    pub to: Option<Timestamp>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LatestQueryParams {
    #[serde(default)]
    pub product: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryItem {
    pub update: UpdateMessage,
    pub value: SensorValue,
    pub time_collected: Timestamp,
}

// Status Models
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub queue_len: usize,
    pub warning_count: u64,
    pub overflow_count: u64,
    pub storage_faults: u64,
}
