//! Handlers for the `/workflows` resource.
//!
//! Submission follows the asynchronous-submission / synchronous-
//! acknowledgment pattern: the response carries the new job's UUID as soon
//! as the `submitted` record is durable, while the stages are usually still
//! in flight.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use dropsight_core::error::CoreError;
use dropsight_core::params::StageParameters;
use dropsight_core::status::WorkflowStatus;
use dropsight_core::types::Timestamp;
use dropsight_pipeline::plan::WorkflowRequest;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body for `POST /api/v1/workflows`.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitWorkflow {
    #[validate(length(min = 1, max = 128))]
    pub job_name: String,
    #[serde(default)]
    pub prior_job_uuid: Option<Uuid>,
    pub stage_parameters: StageParameters,
}

#[derive(Debug, Serialize)]
pub struct SubmittedWorkflow {
    pub uuid: Uuid,
}

/// POST /api/v1/workflows
///
/// Plan and start a workflow. Returns 202 with the new job's UUID; progress
/// is observed by polling `GET /api/v1/workflows/{uuid}`.
pub async fn submit_workflow(
    State(state): State<AppState>,
    Json(input): Json<SubmitWorkflow>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let request = WorkflowRequest {
        job_name: input.job_name,
        prior_job_uuid: input.prior_job_uuid,
        stage_parameters: input.stage_parameters,
    };
    let uuid = state.service.submit(request).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmittedWorkflow { uuid },
        }),
    ))
}

/// GET /api/v1/workflows/{uuid}
///
/// Fetch the full job document, including per-stage records.
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .service
        .find(uuid)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Workflow",
            uuid,
        }))?;

    Ok(Json(DataResponse { data: job }))
}

/// Query parameters for `GET /api/v1/workflows`.
#[derive(Debug, Deserialize)]
pub struct WorkflowListQuery {
    /// Filter by workflow status (e.g. `running`, `failed`).
    pub status: Option<String>,
}

/// One row of the workflow listing.
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub uuid: Uuid,
    pub job_name: String,
    pub status: WorkflowStatus,
    pub submit_time: Timestamp,
}

/// GET /api/v1/workflows
///
/// List all known workflow jobs, optionally filtered by `status`.
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<WorkflowListQuery>,
) -> AppResult<impl IntoResponse> {
    let status = query
        .status
        .as_deref()
        .map(WorkflowStatus::from_str)
        .transpose()?;

    let jobs = state.service.list(status).await?;
    let summaries: Vec<WorkflowSummary> = jobs
        .into_iter()
        .map(|job| WorkflowSummary {
            uuid: job.uuid,
            job_name: job.job_name,
            status: job.status,
            submit_time: job.submit_time,
        })
        .collect();

    Ok(Json(DataResponse { data: summaries }))
}
