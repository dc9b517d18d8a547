use std::sync::Arc;

use dropsight_db::store::RecordStore;
use dropsight_pipeline::service::WorkflowService;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// The job record store.
    pub store: Arc<dyn RecordStore>,
    /// Workflow submission service; owns the background executor tasks.
    pub service: Arc<WorkflowService>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}
