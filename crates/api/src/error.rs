use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use dropsight_core::error::CoreError;
use dropsight_db::store::DbError;
use dropsight_pipeline::error::WorkflowError;

/// Application-level error type for HTTP handlers.
///
/// Wraps the domain and engine errors and implements [`IntoResponse`] to
/// produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `dropsight_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A planning or execution error from the workflow engine.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// A storage error.
    #[error("Database error: {0}")]
    Db(#[from] DbError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),

            AppError::Workflow(workflow) => match workflow {
                WorkflowError::DuplicateJobName(name) => (
                    StatusCode::CONFLICT,
                    "DUPLICATE_JOB_NAME",
                    format!("A job named \"{name}\" already exists"),
                ),
                WorkflowError::PriorJobNotFound(uuid) => (
                    StatusCode::NOT_FOUND,
                    "PRIOR_JOB_NOT_FOUND",
                    format!("Prior job {uuid} not found"),
                ),
                WorkflowError::Core(core) => classify_core_error(core),
                WorkflowError::Db(e) => db_error_response(e),
                // Stage and finalization failures surface through the
                // persisted job document, not through a request error.
                other => {
                    tracing::error!(error = %other, "Unexpected workflow error in handler");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            AppError::Db(e) => db_error_response(e),

            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(core: &CoreError) -> (StatusCode, &'static str, String) {
    match core {
        CoreError::NotFound { entity, uuid } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with uuid {uuid} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

/// Storage errors are never leaked verbatim to clients.
fn db_error_response(e: &DbError) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %e, "Storage error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "DATABASE_ERROR",
        "A storage error occurred".to_string(),
    )
}
