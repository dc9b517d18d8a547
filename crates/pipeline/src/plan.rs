//! Workflow planning: decide which stages must run and which prior results
//! carry forward.
//!
//! Reuse walks the canonical stage order front to back and stops at the
//! first stage that cannot be carried forward; every later stage is
//! recomputed even if individually unchanged, because each consumes the
//! output UUID of its predecessor.

use std::collections::BTreeMap;

use serde::Deserialize;
use uuid::Uuid;

use dropsight_core::params::{validate_job_name, StageParameters};
use dropsight_core::stage::Stage;
use dropsight_core::status::StageStatus;
use dropsight_db::models::workflow_job::{StageRecord, WorkflowJob};
use dropsight_db::repositories::WorkflowJobRepo;
use dropsight_db::store::RecordStore;

use crate::error::WorkflowError;

/// The validated input to start or resume a workflow.
///
/// Constructed once per incoming request; immutable thereafter.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowRequest {
    /// Unique among stored workflow jobs.
    pub job_name: String,
    /// Prior job to resume/re-run, if any.
    #[serde(default)]
    pub prior_job_uuid: Option<Uuid>,
    pub stage_parameters: StageParameters,
}

/// Output of planning: what to run, what to feed the first stage, and which
/// prior records to pre-populate into the new job.
#[derive(Debug, Clone)]
pub struct WorkflowPlan {
    /// Ordered (suffix of [`Stage::ORDER`]) list of stages to execute.
    /// Empty when every stage is carried forward.
    pub stages_to_run: Vec<Stage>,
    /// Stage UUID to feed into the first stage to run; `None` when starting
    /// fresh from primary analysis.
    pub input_uuid: Option<Uuid>,
    /// Successful prior records carried forward by value.
    pub carried: BTreeMap<Stage, StageRecord>,
}

/// Compute the minimal ordered stage list for `request`.
///
/// Validates the request at this boundary (stages may assume well-formed
/// configuration afterwards), rejects duplicate job names before any
/// persistence, and resolves the prior job when one is referenced.
pub async fn plan_workflow(
    store: &dyn RecordStore,
    request: &WorkflowRequest,
) -> Result<WorkflowPlan, WorkflowError> {
    validate_job_name(&request.job_name)?;
    request.stage_parameters.validate()?;

    let existing = WorkflowJobRepo::job_names(store).await?;
    if existing.iter().any(|name| name == &request.job_name) {
        return Err(WorkflowError::DuplicateJobName(request.job_name.clone()));
    }

    let prior = match request.prior_job_uuid {
        Some(uuid) => Some(
            WorkflowJobRepo::find_by_uuid(store, uuid)
                .await?
                .ok_or(WorkflowError::PriorJobNotFound(uuid))?,
        ),
        None => None,
    };

    Ok(reuse_walk(prior.as_ref(), &request.stage_parameters))
}

/// Walk [`Stage::ORDER`], carrying a stage forward iff a prior job exists,
/// it holds a successful record for the stage, and the recorded parameters
/// match the newly configured ones. The first gap stops reuse for good.
fn reuse_walk(prior: Option<&WorkflowJob>, params: &StageParameters) -> WorkflowPlan {
    let mut carried = BTreeMap::new();
    let mut input_uuid = None;
    let mut stages_to_run = Vec::new();
    let mut reusing = prior.is_some();

    for stage in Stage::ORDER {
        if reusing {
            let reusable = prior
                .and_then(|job| job.stage_documents.get(&stage))
                .filter(|record| record.status == StageStatus::Succeeded)
                .filter(|record| record.parameters == params.echo_for(stage));

            if let Some(record) = reusable {
                input_uuid = Some(record.stage_uuid);
                carried.insert(stage, record.clone());
                continue;
            }
            reusing = false;
        }
        stages_to_run.push(stage);
    }

    WorkflowPlan {
        stages_to_run,
        input_uuid,
        carried,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
