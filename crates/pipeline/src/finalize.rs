//! Post-pipeline artifact composition.
//!
//! Once every stage has succeeded, the per-stage artifacts are composed into
//! one combined report document. This step is best-effort: a failure here is
//! logged by the executor and does not alter the workflow's recorded
//! success.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use dropsight_core::stage::Stage;
use dropsight_db::models::workflow_job::WorkflowJob;
use dropsight_db::store::{DbError, RecordStore, REPORTS};

/// Errors from report composition.
#[derive(Debug, thiserror::Error)]
pub enum FinalizeError {
    #[error("Report composition failed: {0}")]
    Compose(String),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Composes downstream artifacts from a completed workflow job.
#[async_trait::async_trait]
pub trait Finalizer: Send + Sync {
    async fn finalize(&self, job: &WorkflowJob) -> Result<(), FinalizeError>;
}

/// Default finalizer: merges each stage's artifact locators into a single
/// report document in the `reports` collection.
pub struct ReportBundler {
    store: Arc<dyn RecordStore>,
}

impl ReportBundler {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Finalizer for ReportBundler {
    async fn finalize(&self, job: &WorkflowJob) -> Result<(), FinalizeError> {
        let mut artifacts = Vec::new();
        for stage in Stage::ORDER {
            if let Some(record) = job.stage_documents.get(&stage) {
                artifacts.push(json!({
                    "stage": stage,
                    "stage_uuid": record.stage_uuid,
                    "outfile_url": record.outfile_url,
                    "plot_url": record.plot_url,
                }));
            }
        }

        if artifacts.is_empty() {
            return Err(FinalizeError::Compose(format!(
                "workflow {} has no stage artifacts to bundle",
                job.uuid
            )));
        }

        let artifact_count = artifacts.len();
        let report = json!({
            "uuid": Uuid::new_v4(),
            "workflow_uuid": job.uuid,
            "job_name": job.job_name,
            "generated_at": Utc::now(),
            "artifacts": artifacts,
        });
        self.store.insert(REPORTS, &[report]).await?;

        tracing::info!(
            workflow_uuid = %job.uuid,
            artifact_count,
            "Report bundled",
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
