//! Stage-level execution record, persisted into each stage's own collection.
//!
//! Distinct from the [`StageRecord`](crate::models::workflow_job::StageRecord)
//! embedded in a workflow job: this is the record the stage computation's
//! lifecycle writes go to, and the one the executor polls for artifact
//! readiness after the final stage.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use dropsight_core::status::StageStatus;
use dropsight_core::types::Timestamp;

use crate::store::DbError;

/// One stage execution as stored in the stage's own collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageExecution {
    pub uuid: Uuid,
    pub status: StageStatus,
    pub start_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Merged parameters the computation was launched with.
    pub parameters: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outfile_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plot_path: Option<String>,
}

impl StageExecution {
    /// Initial record written before the computation is dispatched.
    pub fn submitted(uuid: Uuid, parameters: Value) -> Self {
        Self {
            uuid,
            status: StageStatus::Submitted,
            start_time: Utc::now(),
            finish_time: None,
            error: None,
            parameters,
            outfile_path: None,
            plot_path: None,
        }
    }

    pub fn to_document(&self) -> Result<Value, DbError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_document(doc: Value) -> Result<Self, DbError> {
        Ok(serde_json::from_value(doc)?)
    }
}
