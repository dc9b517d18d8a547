//! Runs one stage computation with durable before/after records.
//!
//! The computation is dispatched onto its own task, but the runner joins it
//! before returning: within a workflow the next stage must never start
//! reading a predecessor's output before that output is durably written, so
//! from the executor's point of view this call blocks until the stage is
//! finished and its record persisted.

use serde_json::Value;

use dropsight_core::stage::Stage;
use dropsight_db::models::stage_execution::StageExecution;
use dropsight_db::repositories::StageExecutionRepo;
use dropsight_db::store::{DbError, RecordStore};

use crate::compute::StageComputation;
use crate::error::WorkflowError;

/// Adapter between the executor's blocking contract and the asynchronous
/// stage computations.
pub struct StageRunner;

impl StageRunner {
    /// Execute `computation` for `stage`, returning the persisted terminal
    /// record.
    ///
    /// Persists a `submitted` record into the stage's own collection before
    /// dispatch, marks it `running`, then joins the computation and persists
    /// the outcome. Failures are recorded, never retried here; retry is the
    /// caller's decision, and a re-run is always a new workflow request.
    pub async fn run(
        store: &dyn RecordStore,
        stage: Stage,
        parameters: Value,
        computation: Box<dyn StageComputation>,
    ) -> Result<StageExecution, WorkflowError> {
        let uuid = computation.uuid();
        let outfile_path = computation.outfile_path();
        let plot_path = computation.plot_path();

        let execution = StageExecution::submitted(uuid, parameters);
        StageExecutionRepo::insert_submitted(store, stage, &execution).await?;

        tracing::info!(stage = %stage, stage_uuid = %uuid, "Stage dispatched");
        StageExecutionRepo::mark_running(store, stage, uuid).await?;

        let outcome = tokio::spawn(async move { computation.run().await }).await;

        match outcome {
            Ok(Ok(())) => {
                StageExecutionRepo::complete(
                    store,
                    stage,
                    uuid,
                    outfile_path.as_deref(),
                    plot_path.as_deref(),
                )
                .await?;
                tracing::info!(stage = %stage, stage_uuid = %uuid, "Stage succeeded");
            }
            Ok(Err(e)) => {
                StageExecutionRepo::fail(store, stage, uuid, &e.to_string()).await?;
                tracing::error!(stage = %stage, stage_uuid = %uuid, error = %e, "Stage failed");
            }
            Err(join_err) => {
                let message = format!("computation task aborted: {join_err}");
                StageExecutionRepo::fail(store, stage, uuid, &message).await?;
                tracing::error!(stage = %stage, stage_uuid = %uuid, error = %message, "Stage failed");
            }
        }

        StageExecutionRepo::find_by_uuid(store, stage, uuid)
            .await?
            .ok_or_else(|| {
                WorkflowError::Db(DbError::MissingDocument {
                    collection: stage.collection().to_string(),
                    field: "uuid".to_string(),
                    value: uuid.to_string(),
                })
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
