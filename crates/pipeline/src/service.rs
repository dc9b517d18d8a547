//! Workflow submission front door.
//!
//! Accepts a validated request, persists the `submitted` job record, spawns
//! the executor on a tracked background task, and returns the new job's UUID
//! synchronously; the stage work is usually still in flight when the caller
//! gets the UUID back. Status inspection afterwards goes through the job
//! record store.

use std::sync::Arc;

use tokio_util::task::TaskTracker;
use uuid::Uuid;

use dropsight_core::status::WorkflowStatus;
use dropsight_db::models::workflow_job::WorkflowJob;
use dropsight_db::repositories::WorkflowJobRepo;
use dropsight_db::store::RecordStore;

use crate::compute::ComputationFactory;
use crate::error::WorkflowError;
use crate::executor::{ExecutorConfig, WorkflowExecutor};
use crate::finalize::Finalizer;
use crate::plan::{plan_workflow, WorkflowRequest};

/// Shared entry point for workflow submission.
///
/// Cheaply cloneable via `Arc`; one instance serves all concurrent requests.
/// Distinct workflows run concurrently without coordination because each
/// owns its own job document and stage-level records.
pub struct WorkflowService {
    store: Arc<dyn RecordStore>,
    executor: Arc<WorkflowExecutor>,
    tasks: TaskTracker,
}

impl WorkflowService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        factory: Arc<dyn ComputationFactory>,
        finalizer: Arc<dyn Finalizer>,
        config: ExecutorConfig,
    ) -> Self {
        let executor = Arc::new(WorkflowExecutor::new(
            Arc::clone(&store),
            factory,
            finalizer,
            config,
        ));
        Self {
            store,
            executor,
            tasks: TaskTracker::new(),
        }
    }

    /// Plan and start a workflow, returning its UUID once the `submitted`
    /// record is durable.
    ///
    /// Planning-phase errors abort before any persistence; there is nothing
    /// to roll back when this returns an error.
    pub async fn submit(&self, request: WorkflowRequest) -> Result<Uuid, WorkflowError> {
        let plan = plan_workflow(self.store.as_ref(), &request).await?;

        let job = WorkflowJob::new(&request.job_name, plan.carried.clone());
        WorkflowJobRepo::insert(self.store.as_ref(), &job).await?;

        let uuid = job.uuid;
        tracing::info!(
            workflow_uuid = %uuid,
            job_name = %request.job_name,
            stages = plan.stages_to_run.len(),
            reused = plan.carried.len(),
            "Workflow submitted",
        );

        let executor = Arc::clone(&self.executor);
        let params = request.stage_parameters;
        self.tasks.spawn(async move {
            executor.execute(job, plan, params).await;
        });

        Ok(uuid)
    }

    /// Look up a workflow job by UUID.
    pub async fn find(&self, uuid: Uuid) -> Result<Option<WorkflowJob>, WorkflowError> {
        Ok(WorkflowJobRepo::find_by_uuid(self.store.as_ref(), uuid).await?)
    }

    /// All jobs known to the store, optionally filtered by status.
    pub async fn list(
        &self,
        status: Option<WorkflowStatus>,
    ) -> Result<Vec<WorkflowJob>, WorkflowError> {
        let jobs = match status {
            Some(status) => {
                WorkflowJobRepo::find_by_status(self.store.as_ref(), status).await?
            }
            None => WorkflowJobRepo::list(self.store.as_ref()).await?,
        };
        Ok(jobs)
    }

    /// Stop accepting new work and wait for in-flight workflows to reach a
    /// terminal state. Running workflows are never cancelled mid-stage; the
    /// only way to stop unwanted work is to not start it.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
