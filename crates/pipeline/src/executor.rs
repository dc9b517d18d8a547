//! Runs a planned stage list to completion with durable progress.
//!
//! The executor owns every mutation of the workflow job document: it
//! persists the `running` transition before the first stage, a placeholder
//! record before each launch, the absorbed result after each stage, and the
//! terminal status. Stages execute strictly sequentially; a non-success
//! terminal status aborts the remaining list immediately and never rolls
//! back already-succeeded stages.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use dropsight_core::params::StageParameters;
use dropsight_core::stage::Stage;
use dropsight_core::status::{StageStatus, WorkflowStatus};
use dropsight_db::models::workflow_job::{StageRecord, WorkflowJob};
use dropsight_db::repositories::{StageExecutionRepo, WorkflowJobRepo};
use dropsight_db::store::RecordStore;

use crate::compute::ComputationFactory;
use crate::error::WorkflowError;
use crate::finalize::Finalizer;
use crate::plan::WorkflowPlan;
use crate::runner::StageRunner;

/// Bounds for the post-pipeline artifact wait.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Fixed interval between polls of the final stage's record.
    pub finalize_poll_interval: Duration,
    /// Maximum number of polls before the workflow is failed with a
    /// timeout. The wait must be bounded so an orchestration task can never
    /// hang forever on an artifact that is never written.
    pub finalize_max_polls: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            finalize_poll_interval: Duration::from_secs(2),
            finalize_max_polls: 150,
        }
    }
}

/// Drives one workflow job through its planned stages.
pub struct WorkflowExecutor {
    store: Arc<dyn RecordStore>,
    factory: Arc<dyn ComputationFactory>,
    finalizer: Arc<dyn Finalizer>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        factory: Arc<dyn ComputationFactory>,
        finalizer: Arc<dyn Finalizer>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            factory,
            finalizer,
            config,
        }
    }

    /// Run `job` to a terminal status.
    ///
    /// Infallible from the caller's perspective: every outcome, including a
    /// storage error mid-flight, ends up in the persisted job document (or
    /// in the log when even that write fails).
    pub async fn execute(&self, mut job: WorkflowJob, plan: WorkflowPlan, params: StageParameters) {
        let workflow_uuid = job.uuid;
        if let Err(e) = self.run_to_completion(&mut job, plan, &params).await {
            tracing::error!(
                workflow_uuid = %workflow_uuid,
                error = %e,
                "Workflow aborted",
            );
            job.status = WorkflowStatus::Failed;
            job.error = Some(e.to_string());
            job.finish_time = Some(Utc::now());
            if let Err(save_err) = WorkflowJobRepo::save(self.store.as_ref(), &job).await {
                tracing::error!(
                    workflow_uuid = %workflow_uuid,
                    error = %save_err,
                    "Failed to persist workflow failure",
                );
            }
        }
    }

    async fn run_to_completion(
        &self,
        job: &mut WorkflowJob,
        plan: WorkflowPlan,
        params: &StageParameters,
    ) -> Result<(), WorkflowError> {
        let store = self.store.as_ref();

        // Observers polling the job record see work has started even before
        // the first stage finishes.
        job.status.validate_transition(WorkflowStatus::Running)?;
        job.status = WorkflowStatus::Running;
        job.start_time = Some(Utc::now());
        WorkflowJobRepo::save(store, job).await?;
        tracing::info!(
            workflow_uuid = %job.uuid,
            stages = plan.stages_to_run.len(),
            reused = plan.carried.len(),
            "Workflow running",
        );

        let mut input_uuid = plan.input_uuid;
        for stage in plan.stages_to_run {
            // Merge the stage's configuration with the predecessor's output
            // UUID; primary analysis carries the raw archive reference in
            // its own configuration instead.
            let mut merged = params.echo_for(stage);
            if let Some(prev) = input_uuid {
                merged["input_uuid"] = json!(prev);
            }

            let computation = self.factory.make(stage, &merged);
            let stage_uuid = computation.uuid();

            // Placeholder first, so a crash mid-stage still shows which
            // stage was in flight.
            job.stage_documents
                .insert(stage, StageRecord::pending(stage_uuid, params.echo_for(stage)));
            WorkflowJobRepo::save(store, job).await?;

            let execution = StageRunner::run(store, stage, merged, computation).await?;

            if let Some(record) = job.stage_documents.get_mut(&stage) {
                record.absorb(&execution);
            }

            if execution.status != StageStatus::Succeeded {
                let failure = WorkflowError::StageFailed {
                    stage,
                    message: execution
                        .error
                        .unwrap_or_else(|| "no error recorded".to_string()),
                };
                return self.mark_failed(job, failure.to_string()).await;
            }

            input_uuid = Some(execution.uuid);
            WorkflowJobRepo::save(store, job).await?;
        }

        // Finalization needs the last artifact to exist on disk, so wait for
        // the genotyper record to settle before composing the report.
        if let Err(e) = self.await_final_artifacts(job).await {
            return match e {
                WorkflowError::FinalizeTimeout { .. } | WorkflowError::StageFailed { .. } => {
                    self.mark_failed(job, e.to_string()).await
                }
                other => Err(other),
            };
        }

        job.status.validate_transition(WorkflowStatus::Succeeded)?;
        job.status = WorkflowStatus::Succeeded;
        job.finish_time = Some(Utc::now());
        WorkflowJobRepo::save(store, job).await?;
        tracing::info!(workflow_uuid = %job.uuid, "Workflow succeeded");

        // Best-effort by design decision: a composition failure is surfaced
        // in the log only and does not alter the recorded success.
        if let Err(e) = self.finalizer.finalize(job).await {
            tracing::error!(
                workflow_uuid = %job.uuid,
                error = %e,
                "Finalization failed; workflow remains succeeded",
            );
        }

        Ok(())
    }

    /// Bounded poll of the genotyper's stage-level record until it reaches a
    /// terminal status.
    async fn await_final_artifacts(&self, job: &WorkflowJob) -> Result<(), WorkflowError> {
        let final_stage = Stage::Genotyper;
        let record = job.stage_documents.get(&final_stage).ok_or_else(|| {
            WorkflowError::Core(dropsight_core::error::CoreError::Internal(format!(
                "workflow {} reached finalization without a {final_stage} record",
                job.uuid
            )))
        })?;
        let stage_uuid = record.stage_uuid;

        for poll in 0..self.config.finalize_max_polls {
            let execution =
                StageExecutionRepo::find_by_uuid(self.store.as_ref(), final_stage, stage_uuid)
                    .await?;
            match execution {
                Some(exec) if exec.status == StageStatus::Succeeded => return Ok(()),
                Some(exec) if exec.status == StageStatus::Failed => {
                    return Err(WorkflowError::StageFailed {
                        stage: final_stage,
                        message: exec.error.unwrap_or_else(|| "no error recorded".to_string()),
                    });
                }
                _ => {
                    tracing::debug!(
                        workflow_uuid = %job.uuid,
                        stage_uuid = %stage_uuid,
                        poll,
                        "Final artifacts not ready",
                    );
                    tokio::time::sleep(self.config.finalize_poll_interval).await;
                }
            }
        }

        Err(WorkflowError::FinalizeTimeout {
            stage: final_stage,
            polls: self.config.finalize_max_polls,
        })
    }

    async fn mark_failed(&self, job: &mut WorkflowJob, error: String) -> Result<(), WorkflowError> {
        tracing::error!(workflow_uuid = %job.uuid, error = %error, "Workflow failed");
        job.status.validate_transition(WorkflowStatus::Failed)?;
        job.status = WorkflowStatus::Failed;
        job.error = Some(error);
        job.finish_time = Some(Utc::now());
        WorkflowJobRepo::save(self.store.as_ref(), job).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use serde_json::Value;
    use uuid::Uuid;

    use dropsight_core::params::{
        AssayCallerParams, GenotyperParams, IdentityParams, PrimaryAnalysisParams,
    };
    use dropsight_db::memory::MemoryRecordStore;
    use dropsight_db::models::stage_execution::StageExecution;
    use dropsight_db::store::WORKFLOW_JOBS;

    use super::*;
    use crate::compute::{ComputationError, StageComputation};
    use crate::finalize::FinalizeError;

    fn params() -> StageParameters {
        StageParameters {
            primary_analysis: PrimaryAnalysisParams {
                archive_name: "plate-2024-11-03".to_string(),
                device_name: "beta7".to_string(),
                dye_names: vec!["fam".to_string(), "joe".to_string()],
                offsets_major: 2,
                offsets_minor: 11,
            },
            identity: IdentityParams::default(),
            assay_caller: AssayCallerParams::default(),
            genotyper: GenotyperParams::default(),
        }
    }

    fn fast_config() -> ExecutorConfig {
        ExecutorConfig {
            finalize_poll_interval: Duration::from_millis(5),
            finalize_max_polls: 3,
        }
    }

    // -- Mock computations ----------------------------------------------------

    struct MockComputation {
        uuid: Uuid,
        fail: bool,
        store: Arc<MemoryRecordStore>,
        workflow_uuid: Uuid,
    }

    #[async_trait::async_trait]
    impl StageComputation for MockComputation {
        fn uuid(&self) -> Uuid {
            self.uuid
        }

        fn outfile_path(&self) -> Option<String> {
            Some(format!("/results/{}/out.json", self.uuid))
        }

        fn plot_path(&self) -> Option<String> {
            None
        }

        async fn run(&self) -> Result<(), ComputationError> {
            // The job document must already show the in-flight state while
            // the computation runs.
            let doc = self
                .store
                .find_one(WORKFLOW_JOBS, "uuid", &self.workflow_uuid.to_string())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(doc["status"], "running");

            if self.fail {
                Err(ComputationError::Failed {
                    exit_code: 1,
                    stderr: "clustering diverged".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct MockFactory {
        store: Arc<MemoryRecordStore>,
        workflow_uuid: Uuid,
        fail_at: Option<Stage>,
        invocations: Mutex<Vec<(Stage, Value)>>,
    }

    impl ComputationFactory for MockFactory {
        fn make(&self, stage: Stage, parameters: &Value) -> Box<dyn StageComputation> {
            self.invocations
                .lock()
                .unwrap()
                .push((stage, parameters.clone()));
            Box::new(MockComputation {
                uuid: Uuid::new_v4(),
                fail: self.fail_at == Some(stage),
                store: Arc::clone(&self.store),
                workflow_uuid: self.workflow_uuid,
            })
        }
    }

    struct RecordingFinalizer {
        calls: Mutex<u32>,
        fail: bool,
    }

    impl RecordingFinalizer {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(0),
                fail,
            }
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait::async_trait]
    impl Finalizer for RecordingFinalizer {
        async fn finalize(&self, _job: &WorkflowJob) -> Result<(), FinalizeError> {
            *self.calls.lock().unwrap() += 1;
            if self.fail {
                Err(FinalizeError::Compose("merger crashed".to_string()))
            } else {
                Ok(())
            }
        }
    }

    async fn job(store: &MemoryRecordStore, uuid: Uuid) -> WorkflowJob {
        WorkflowJobRepo::find_by_uuid(store, uuid)
            .await
            .unwrap()
            .unwrap()
    }

    // -- Tests ----------------------------------------------------------------

    #[tokio::test]
    async fn fresh_run_executes_stages_in_canonical_order() {
        let store = Arc::new(MemoryRecordStore::new());
        let new_job = WorkflowJob::new("run1", BTreeMap::new());
        WorkflowJobRepo::insert(store.as_ref(), &new_job)
            .await
            .unwrap();

        let factory = Arc::new(MockFactory {
            store: Arc::clone(&store),
            workflow_uuid: new_job.uuid,
            fail_at: None,
            invocations: Mutex::new(Vec::new()),
        });
        let finalizer = Arc::new(RecordingFinalizer::new(false));
        let executor = WorkflowExecutor::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&factory) as Arc<dyn ComputationFactory>,
            Arc::clone(&finalizer) as Arc<dyn Finalizer>,
            fast_config(),
        );
        let uuid = new_job.uuid;

        executor
            .execute(
                new_job,
                WorkflowPlan {
                    stages_to_run: Stage::ORDER.to_vec(),
                    input_uuid: None,
                    carried: BTreeMap::new(),
                },
                params(),
            )
            .await;

        let finished = job(store.as_ref(), uuid).await;
        assert_eq!(finished.status, WorkflowStatus::Succeeded);
        assert!(finished.finish_time.is_some());
        assert_eq!(finished.stage_documents.len(), 4);
        for stage in Stage::ORDER {
            assert_eq!(finished.stage_documents[&stage].status, StageStatus::Succeeded);
        }

        let invocations = factory.invocations.lock().unwrap();
        let order: Vec<Stage> = invocations.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, Stage::ORDER.to_vec());

        // Each stage after the first consumed its predecessor's stage UUID.
        for window in [1usize, 2, 3] {
            let (stage, merged) = &invocations[window];
            let predecessor = stage.predecessor().unwrap();
            let expected = finished.stage_documents[&predecessor].stage_uuid.to_string();
            assert_eq!(merged["input_uuid"], expected.as_str());
        }
        // Primary analysis got the raw archive reference instead.
        assert_eq!(invocations[0].1["archive_name"], "plate-2024-11-03");
        assert!(invocations[0].1.get("input_uuid").is_none());

        assert_eq!(finalizer.call_count(), 1);
    }

    #[tokio::test]
    async fn stage_failure_stops_the_pipeline_immediately() {
        let store = Arc::new(MemoryRecordStore::new());
        let new_job = WorkflowJob::new("run1", BTreeMap::new());
        WorkflowJobRepo::insert(store.as_ref(), &new_job)
            .await
            .unwrap();

        let factory = Arc::new(MockFactory {
            store: Arc::clone(&store),
            workflow_uuid: new_job.uuid,
            fail_at: Some(Stage::Identity),
            invocations: Mutex::new(Vec::new()),
        });
        let finalizer = Arc::new(RecordingFinalizer::new(false));
        let executor = WorkflowExecutor::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&factory) as Arc<dyn ComputationFactory>,
            Arc::clone(&finalizer) as Arc<dyn Finalizer>,
            fast_config(),
        );
        let uuid = new_job.uuid;

        executor
            .execute(
                new_job,
                WorkflowPlan {
                    stages_to_run: Stage::ORDER.to_vec(),
                    input_uuid: None,
                    carried: BTreeMap::new(),
                },
                params(),
            )
            .await;

        let finished = job(store.as_ref(), uuid).await;
        assert_eq!(finished.status, WorkflowStatus::Failed);
        assert!(finished.error.as_deref().unwrap().contains("identity"));

        // Only the two attempted stages appear; later stages were never
        // invoked and already-succeeded records stay intact.
        assert_eq!(finished.stage_documents.len(), 2);
        assert_eq!(
            finished.stage_documents[&Stage::PrimaryAnalysis].status,
            StageStatus::Succeeded
        );
        assert_eq!(
            finished.stage_documents[&Stage::Identity].status,
            StageStatus::Failed
        );

        let order: Vec<Stage> = factory
            .invocations
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| *s)
            .collect();
        assert_eq!(order, vec![Stage::PrimaryAnalysis, Stage::Identity]);
        assert_eq!(finalizer.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_plan_skips_straight_to_finalization() {
        let store = Arc::new(MemoryRecordStore::new());

        // Carried records for all four stages; the genotyper's stage-level
        // execution is already terminal in its own collection.
        let p = params();
        let mut carried = BTreeMap::new();
        for stage in Stage::ORDER {
            let exec = StageExecution::submitted(Uuid::new_v4(), p.echo_for(stage));
            StageExecutionRepo::insert_submitted(store.as_ref(), stage, &exec)
                .await
                .unwrap();
            StageExecutionRepo::complete(store.as_ref(), stage, exec.uuid, Some("/out"), None)
                .await
                .unwrap();
            let mut record = StageRecord::pending(exec.uuid, p.echo_for(stage));
            record.status = StageStatus::Succeeded;
            carried.insert(stage, record);
        }

        let new_job = WorkflowJob::new("rerun", carried);
        WorkflowJobRepo::insert(store.as_ref(), &new_job)
            .await
            .unwrap();

        let factory = Arc::new(MockFactory {
            store: Arc::clone(&store),
            workflow_uuid: new_job.uuid,
            fail_at: None,
            invocations: Mutex::new(Vec::new()),
        });
        let finalizer = Arc::new(RecordingFinalizer::new(false));
        let executor = WorkflowExecutor::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&factory) as Arc<dyn ComputationFactory>,
            Arc::clone(&finalizer) as Arc<dyn Finalizer>,
            fast_config(),
        );
        let uuid = new_job.uuid;

        executor
            .execute(
                new_job,
                WorkflowPlan {
                    stages_to_run: Vec::new(),
                    input_uuid: None,
                    carried: BTreeMap::new(),
                },
                p,
            )
            .await;

        let finished = job(store.as_ref(), uuid).await;
        assert_eq!(finished.status, WorkflowStatus::Succeeded);
        assert!(factory.invocations.lock().unwrap().is_empty());
        assert_eq!(finalizer.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_final_artifacts_fail_the_workflow_after_bounded_polls() {
        let store = Arc::new(MemoryRecordStore::new());

        // Genotyper record carried, but no execution exists in the stage
        // collection: the artifact writer never showed up.
        let p = params();
        let mut carried = BTreeMap::new();
        for stage in Stage::ORDER {
            let mut record = StageRecord::pending(Uuid::new_v4(), p.echo_for(stage));
            record.status = StageStatus::Succeeded;
            carried.insert(stage, record);
        }

        let new_job = WorkflowJob::new("rerun", carried);
        WorkflowJobRepo::insert(store.as_ref(), &new_job)
            .await
            .unwrap();

        let factory = Arc::new(MockFactory {
            store: Arc::clone(&store),
            workflow_uuid: new_job.uuid,
            fail_at: None,
            invocations: Mutex::new(Vec::new()),
        });
        let finalizer = Arc::new(RecordingFinalizer::new(false));
        let executor = WorkflowExecutor::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&factory) as Arc<dyn ComputationFactory>,
            Arc::clone(&finalizer) as Arc<dyn Finalizer>,
            fast_config(),
        );
        let uuid = new_job.uuid;

        executor
            .execute(
                new_job,
                WorkflowPlan {
                    stages_to_run: Vec::new(),
                    input_uuid: None,
                    carried: BTreeMap::new(),
                },
                p,
            )
            .await;

        let finished = job(store.as_ref(), uuid).await;
        assert_eq!(finished.status, WorkflowStatus::Failed);
        assert!(finished.error.as_deref().unwrap().contains("Timed out"));
        assert_eq!(finalizer.call_count(), 0);
    }

    #[tokio::test]
    async fn finalization_failure_leaves_the_job_succeeded() {
        let store = Arc::new(MemoryRecordStore::new());
        let new_job = WorkflowJob::new("run1", BTreeMap::new());
        WorkflowJobRepo::insert(store.as_ref(), &new_job)
            .await
            .unwrap();

        let factory = Arc::new(MockFactory {
            store: Arc::clone(&store),
            workflow_uuid: new_job.uuid,
            fail_at: None,
            invocations: Mutex::new(Vec::new()),
        });
        let finalizer = Arc::new(RecordingFinalizer::new(true));
        let executor = WorkflowExecutor::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            Arc::clone(&factory) as Arc<dyn ComputationFactory>,
            Arc::clone(&finalizer) as Arc<dyn Finalizer>,
            fast_config(),
        );
        let uuid = new_job.uuid;

        executor
            .execute(
                new_job,
                WorkflowPlan {
                    stages_to_run: Stage::ORDER.to_vec(),
                    input_uuid: None,
                    carried: BTreeMap::new(),
                },
                params(),
            )
            .await;

        let finished = job(store.as_ref(), uuid).await;
        assert_eq!(finished.status, WorkflowStatus::Succeeded);
        assert!(finished.error.is_none());
        assert_eq!(finalizer.call_count(), 1);
    }
}
