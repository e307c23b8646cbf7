pub mod api;
pub mod config;
pub mod convert;
pub mod dispatch;
pub mod monitor;
pub mod policy;
pub mod queue;
pub mod storage;

use std::sync::Arc;

use dispatch::Ingested;
use queue::IngestionQueue;
use storage::Database;

// AppState must be defined in lib.rs to be visible to all modules
#[derive(Clone)]
pub struct AppState<S> {
    pub db: Database<S>,
    pub queue: Arc<IngestionQueue<Ingested>>,
}
