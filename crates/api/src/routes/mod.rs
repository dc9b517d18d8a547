pub mod health;
pub mod workflows;

use axum::Router;

use crate::state::AppState;

/// All `/api/v1` routes.
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/workflows", workflows::router())
}
