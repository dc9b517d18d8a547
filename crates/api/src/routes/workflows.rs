//! Route definitions for the `/workflows` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::workflows;
use crate::state::AppState;

/// Routes mounted at `/workflows`.
///
/// ```text
/// GET    /         -> list_workflows
/// POST   /         -> submit_workflow
/// GET    /{uuid}   -> get_workflow
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(workflows::list_workflows).post(workflows::submit_workflow),
        )
        .route("/{uuid}", get(workflows::get_workflow))
}
