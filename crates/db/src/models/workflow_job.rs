//! The top-level persisted record of one end-to-end pipeline run.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use dropsight_core::stage::Stage;
use dropsight_core::status::{StageStatus, WorkflowStatus};
use dropsight_core::types::Timestamp;

use crate::models::stage_execution::StageExecution;
use crate::store::DbError;

/// Per-stage sub-document inside a [`WorkflowJob`].
///
/// Owned exclusively by its job; on reuse across a re-run the *content* is
/// copied by value into the new job, never shared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Identifier of the underlying stage execution (distinct from the
    /// workflow job's own UUID).
    pub stage_uuid: Uuid,
    pub status: StageStatus,
    pub start_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<Timestamp>,
    /// Present only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Echo of the configuration this stage ran with; compared verbatim when
    /// deciding whether a prior result can be reused.
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outfile_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_url: Option<String>,
}

impl StageRecord {
    /// Placeholder persisted before a stage is launched, so a crash
    /// mid-stage still shows which stage was in flight.
    pub fn pending(stage_uuid: Uuid, parameters: Value) -> Self {
        Self {
            stage_uuid,
            status: StageStatus::Pending,
            start_time: Utc::now(),
            finish_time: None,
            error: None,
            parameters,
            outfile_url: None,
            plot_url: None,
        }
    }

    /// Copy the relevant fields of a finished stage-level execution into
    /// this record.
    pub fn absorb(&mut self, execution: &StageExecution) {
        self.stage_uuid = execution.uuid;
        self.status = execution.status;
        self.finish_time = execution.finish_time;
        self.error = execution.error.clone();
        self.outfile_url = execution.outfile_path.clone();
        self.plot_url = execution.plot_path.clone();
    }
}

/// The top-level persisted record representing one full-pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowJob {
    /// Assigned at creation, immutable thereafter.
    pub uuid: Uuid,
    pub job_name: String,
    pub status: WorkflowStatus,
    pub submit_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Populated incrementally as stages complete or are carried forward
    /// from a prior job.
    #[serde(default)]
    pub stage_documents: BTreeMap<Stage, StageRecord>,
}

impl WorkflowJob {
    /// Create a new job in the `submitted` state, optionally pre-populated
    /// with stage records carried forward from a prior run.
    pub fn new(job_name: impl Into<String>, carried: BTreeMap<Stage, StageRecord>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            job_name: job_name.into(),
            status: WorkflowStatus::Submitted,
            submit_time: Utc::now(),
            start_time: None,
            finish_time: None,
            error: None,
            stage_documents: carried,
        }
    }

    /// Serialize into a store document.
    pub fn to_document(&self) -> Result<Value, DbError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Deserialize from a store document.
    pub fn from_document(doc: Value) -> Result<Self, DbError> {
        Ok(serde_json::from_value(doc)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_job_is_submitted_with_no_timestamps() {
        let job = WorkflowJob::new("run1", BTreeMap::new());
        assert_eq!(job.status, WorkflowStatus::Submitted);
        assert!(job.start_time.is_none());
        assert!(job.finish_time.is_none());
        assert!(job.stage_documents.is_empty());
    }

    #[test]
    fn document_round_trip_preserves_stage_records() {
        let mut job = WorkflowJob::new("run1", BTreeMap::new());
        let record = StageRecord::pending(Uuid::new_v4(), json!({"training_factor": 1000}));
        job.stage_documents.insert(Stage::Identity, record);

        let doc = job.to_document().unwrap();
        let restored = WorkflowJob::from_document(doc).unwrap();
        assert_eq!(restored, job);
    }

    #[test]
    fn stage_keys_serialize_as_wire_strings() {
        let mut job = WorkflowJob::new("run1", BTreeMap::new());
        job.stage_documents.insert(
            Stage::PrimaryAnalysis,
            StageRecord::pending(Uuid::new_v4(), json!({})),
        );

        let doc = job.to_document().unwrap();
        assert!(doc["stage_documents"]["primary_analysis"].is_object());
    }

    #[test]
    fn absorb_copies_execution_outcome() {
        let exec_uuid = Uuid::new_v4();
        let mut execution = StageExecution::submitted(exec_uuid, json!({}));
        execution.status = StageStatus::Succeeded;
        execution.finish_time = Some(Utc::now());
        execution.outfile_path = Some("/results/identity/out.json".to_string());

        let mut record = StageRecord::pending(exec_uuid, json!({}));
        record.absorb(&execution);

        assert_eq!(record.status, StageStatus::Succeeded);
        assert_eq!(
            record.outfile_url.as_deref(),
            Some("/results/identity/out.json")
        );
        assert!(record.finish_time.is_some());
        assert!(record.error.is_none());
    }
}
