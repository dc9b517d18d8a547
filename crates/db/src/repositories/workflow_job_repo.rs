//! Repository for the `workflow_jobs` collection.

use uuid::Uuid;

use dropsight_core::status::WorkflowStatus;

use crate::models::workflow_job::WorkflowJob;
use crate::store::{DbError, RecordStore, WORKFLOW_JOBS};

/// Key field used for all job lookups and updates.
const KEY: &str = "uuid";

/// Typed operations over the top-level workflow job documents.
pub struct WorkflowJobRepo;

impl WorkflowJobRepo {
    /// Persist a newly created job. Must happen before any stage work so a
    /// crash after creation still leaves a discoverable record.
    pub async fn insert(store: &dyn RecordStore, job: &WorkflowJob) -> Result<(), DbError> {
        store.insert(WORKFLOW_JOBS, &[job.to_document()?]).await
    }

    /// Find a job by its UUID.
    pub async fn find_by_uuid(
        store: &dyn RecordStore,
        uuid: Uuid,
    ) -> Result<Option<WorkflowJob>, DbError> {
        let doc = store
            .find_one(WORKFLOW_JOBS, KEY, &uuid.to_string())
            .await?;
        doc.map(WorkflowJob::from_document).transpose()
    }

    /// Find a job by its unique name.
    pub async fn find_by_name(
        store: &dyn RecordStore,
        name: &str,
    ) -> Result<Option<WorkflowJob>, DbError> {
        let doc = store.find_one(WORKFLOW_JOBS, "job_name", name).await?;
        doc.map(WorkflowJob::from_document).transpose()
    }

    /// Overwrite the stored document with the current state of `job`.
    ///
    /// The write is a whole-document merge keyed by UUID, so saving the same
    /// state twice leaves the stored document unchanged.
    pub async fn save(store: &dyn RecordStore, job: &WorkflowJob) -> Result<(), DbError> {
        let updated = store
            .update(WORKFLOW_JOBS, KEY, &job.uuid.to_string(), &job.to_document()?)
            .await?;
        if updated == 0 {
            return Err(DbError::MissingDocument {
                collection: WORKFLOW_JOBS.to_string(),
                field: KEY.to_string(),
                value: job.uuid.to_string(),
            });
        }
        Ok(())
    }

    /// All job names currently known to the store.
    ///
    /// Used by the planner's duplicate-name gate.
    pub async fn job_names(store: &dyn RecordStore) -> Result<Vec<String>, DbError> {
        store.distinct(WORKFLOW_JOBS, "job_name").await
    }

    /// All jobs currently known to the store, in insertion order.
    pub async fn list(store: &dyn RecordStore) -> Result<Vec<WorkflowJob>, DbError> {
        let mut jobs = Vec::new();
        for uuid in store.distinct(WORKFLOW_JOBS, KEY).await? {
            if let Some(doc) = store.find_one(WORKFLOW_JOBS, KEY, &uuid).await? {
                jobs.push(WorkflowJob::from_document(doc)?);
            }
        }
        Ok(jobs)
    }

    /// All jobs with the given status.
    pub async fn find_by_status(
        store: &dyn RecordStore,
        status: WorkflowStatus,
    ) -> Result<Vec<WorkflowJob>, DbError> {
        let docs = store.find(WORKFLOW_JOBS, "status", status.as_str()).await?;
        docs.into_iter().map(WorkflowJob::from_document).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
