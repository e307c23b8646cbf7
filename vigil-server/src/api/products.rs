use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use jiff::Timestamp;
use tracing::info;
use vigil_core::UpdateMessage;

use crate::AppState;
use crate::storage::KeyValueStore;
use crate::storage::entities::ProductEntity;

use super::error::ApiError;
use super::models::{ApiResponse, ProductCreateRequest, ProductResponse};

pub async fn list_products<S>(
    State(state): State<AppState<S>>,
) -> Json<ApiResponse<Vec<ProductResponse>>>
where
    S: KeyValueStore + Clone,
{
    let mut products = Vec::new();
    for product in state.db.products().all().await {
        let sensors = state.db.product_sensors(&product.id).await.len();
        products.push(ProductResponse::new(product, sensors));
    }

    Json(ApiResponse::ok(products))
}

pub async fn create_product<S>(
    State(state): State<AppState<S>>,
    Json(request): Json<ProductCreateRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProductResponse>>), ApiError>
where
    S: KeyValueStore + Clone,
{
    let name = request.name.trim();
    if name.is_empty() || name.contains('/') {
        return Err(ApiError::BadRequest(
            "Product name must be non-empty and must not contain '/'".to_owned(),
        ));
    }

    let id: Box<str> = name.into();
    if state.db.products().get(&id).await.is_some() {
        return Err(ApiError::Conflict(format!("Product '{name}' already exists")));
    }

    let product = ProductEntity::new(id, Timestamp::now());
    if !state.db.products().create(&product).await {
        return Err(ApiError::InternalServerError(
            "Failed to store product".to_owned(),
        ));
    }
    info!(product = %product.id, "Product created");

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(ProductResponse::new(product, 0))),
    ))
}

/// Remove a product and everything under it. The response lists a `Remove`
/// update for every sensor that went with it.
pub async fn delete_product<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<UpdateMessage>>>, ApiError>
where
    S: KeyValueStore + Clone,
{
    match state.db.remove_product(&id, Timestamp::now()).await {
        Some(removed) => Ok(Json(ApiResponse::ok(removed))),
        None => Err(ApiError::NotFound(format!("Product '{id}' not found"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{IngestionQueue, QueueConfig};
    use crate::storage::{Database, MemoryStore};
    use std::sync::Arc;
    use vigil_core::{ActionType, SensorPath, SensorType};

    fn state() -> AppState<MemoryStore> {
        AppState {
            db: Database::new(MemoryStore::new()),
            queue: Arc::new(IngestionQueue::new(QueueConfig::default())),
        }
    }

    fn create(name: &str) -> Json<ProductCreateRequest> {
        Json(ProductCreateRequest {
            name: name.to_owned(),
        })
    }

    #[tokio::test]
    async fn create_list_delete() {
        let state = state();

        let (status, _) = create_product(State(state.clone()), create("shop"))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(matches!(
            create_product(State(state.clone()), create("shop")).await,
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            create_product(State(state.clone()), create("a/b")).await,
            Err(ApiError::BadRequest(_))
        ));

        let path = SensorPath::parse("shop/cpu").unwrap();
        state
            .db
            .register_sensor(&path, SensorType::Double, Timestamp::now())
            .await;

        let Json(listed) = list_products(State(state.clone())).await;
        let listed = listed.data.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].sensors, 1);

        let Json(removed) = delete_product(State(state.clone()), Path("shop".to_owned()))
            .await
            .unwrap();
        let removed = removed.data.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].action, ActionType::Remove);

        assert!(matches!(
            delete_product(State(state.clone()), Path("shop".to_owned())).await,
            Err(ApiError::NotFound(_))
        ));
    }
}
