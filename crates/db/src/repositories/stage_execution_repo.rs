//! Repository for the per-stage execution collections.
//!
//! Each stage type has its own collection (see [`Stage::collection`]); the
//! lifecycle is submitted -> running -> {succeeded | failed}, written by the
//! stage runner as the computation progresses.

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use dropsight_core::stage::Stage;
use dropsight_core::status::StageStatus;

use crate::models::stage_execution::StageExecution;
use crate::store::{DbError, RecordStore};

/// Key field used for all stage execution lookups and updates.
const KEY: &str = "uuid";

/// Typed operations over stage-level execution records.
pub struct StageExecutionRepo;

impl StageExecutionRepo {
    /// Persist the initial `submitted` record before the computation is
    /// dispatched.
    pub async fn insert_submitted(
        store: &dyn RecordStore,
        stage: Stage,
        execution: &StageExecution,
    ) -> Result<(), DbError> {
        store
            .insert(stage.collection(), &[execution.to_document()?])
            .await
    }

    /// Mark an execution as running.
    pub async fn mark_running(
        store: &dyn RecordStore,
        stage: Stage,
        uuid: Uuid,
    ) -> Result<(), DbError> {
        store
            .update(
                stage.collection(),
                KEY,
                &uuid.to_string(),
                &json!({ "status": StageStatus::Running }),
            )
            .await?;
        Ok(())
    }

    /// Mark an execution as succeeded, recording its output locations.
    pub async fn complete(
        store: &dyn RecordStore,
        stage: Stage,
        uuid: Uuid,
        outfile_path: Option<&str>,
        plot_path: Option<&str>,
    ) -> Result<(), DbError> {
        store
            .update(
                stage.collection(),
                KEY,
                &uuid.to_string(),
                &json!({
                    "status": StageStatus::Succeeded,
                    "finish_time": Utc::now(),
                    "outfile_path": outfile_path,
                    "plot_path": plot_path,
                }),
            )
            .await?;
        Ok(())
    }

    /// Mark an execution as failed with a human-readable message.
    ///
    /// No retry happens at this layer; re-running is always a new workflow
    /// request.
    pub async fn fail(
        store: &dyn RecordStore,
        stage: Stage,
        uuid: Uuid,
        error: &str,
    ) -> Result<(), DbError> {
        store
            .update(
                stage.collection(),
                KEY,
                &uuid.to_string(),
                &json!({
                    "status": StageStatus::Failed,
                    "finish_time": Utc::now(),
                    "error": error,
                }),
            )
            .await?;
        Ok(())
    }

    /// Find an execution by its UUID within a stage's collection.
    pub async fn find_by_uuid(
        store: &dyn RecordStore,
        stage: Stage,
        uuid: Uuid,
    ) -> Result<Option<StageExecution>, DbError> {
        let doc = store
            .find_one(stage.collection(), KEY, &uuid.to_string())
            .await?;
        doc.map(StageExecution::from_document).transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRecordStore;

    async fn submitted(store: &MemoryRecordStore, stage: Stage) -> StageExecution {
        let exec = StageExecution::submitted(Uuid::new_v4(), json!({"input_uuid": "prev"}));
        StageExecutionRepo::insert_submitted(store, stage, &exec)
            .await
            .unwrap();
        exec
    }

    #[tokio::test]
    async fn lifecycle_submitted_running_succeeded() {
        let store = MemoryRecordStore::new();
        let exec = submitted(&store, Stage::Identity).await;

        StageExecutionRepo::mark_running(&store, Stage::Identity, exec.uuid)
            .await
            .unwrap();
        let running = StageExecutionRepo::find_by_uuid(&store, Stage::Identity, exec.uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(running.status, StageStatus::Running);

        StageExecutionRepo::complete(
            &store,
            Stage::Identity,
            exec.uuid,
            Some("/results/identity/out.json"),
            Some("/results/identity/plot.png"),
        )
        .await
        .unwrap();

        let done = StageExecutionRepo::find_by_uuid(&store, Stage::Identity, exec.uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.status, StageStatus::Succeeded);
        assert!(done.finish_time.is_some());
        assert_eq!(done.outfile_path.as_deref(), Some("/results/identity/out.json"));
    }

    #[tokio::test]
    async fn fail_records_error_message() {
        let store = MemoryRecordStore::new();
        let exec = submitted(&store, Stage::Genotyper).await;

        StageExecutionRepo::fail(&store, Stage::Genotyper, exec.uuid, "model did not converge")
            .await
            .unwrap();

        let failed = StageExecutionRepo::find_by_uuid(&store, Stage::Genotyper, exec.uuid)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, StageStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("model did not converge"));
    }

    #[tokio::test]
    async fn executions_live_in_their_stage_collection() {
        let store = MemoryRecordStore::new();
        let exec = submitted(&store, Stage::AssayCaller).await;

        // Visible under its own stage, invisible under another.
        assert!(
            StageExecutionRepo::find_by_uuid(&store, Stage::AssayCaller, exec.uuid)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            StageExecutionRepo::find_by_uuid(&store, Stage::Identity, exec.uuid)
                .await
                .unwrap()
                .is_none()
        );
    }
}
