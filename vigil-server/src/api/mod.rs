pub mod error;
pub mod models;
pub mod products;
pub mod sensors;
pub mod status;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::AppState;
use crate::storage::KeyValueStore;

pub fn router<S>() -> Router<AppState<S>>
where
    S: KeyValueStore + Clone,
{
    Router::new()
        .route("/health", get(status::health))
        .route("/api/status", get(status::status))
        // Ingestion
        .route("/api/sensors", post(sensors::ingest))
        .route("/api/sensors/latest", get(sensors::latest))
        .route("/api/history", get(sensors::history))
        // Products
        .route(
            "/api/products",
            get(products::list_products).post(products::create_product),
        )
        .route("/api/products/{id}", delete(products::delete_product))
}
