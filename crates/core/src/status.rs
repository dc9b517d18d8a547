//! Workflow and stage status enums and their transition tables.
//!
//! This module lives in `core` (zero internal deps) so it can be used by both
//! the storage layer and the pipeline engine.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// WorkflowStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a top-level workflow job.
///
/// `Submitted` is entered exactly once at creation, `Running` exactly once
/// when execution begins. `Succeeded` and `Failed` are terminal; a re-run
/// always creates a new job rather than mutating a terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl WorkflowStatus {
    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parse from a wire-format string.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "submitted" => Ok(Self::Submitted),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::Validation(format!(
                "Invalid workflow status: '{s}'. Must be one of: submitted, running, succeeded, failed"
            ))),
        }
    }

    /// Whether no further transitions are allowed out of this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns the set of valid target statuses reachable from `self`.
    ///
    /// Terminal states return an empty slice because no further transitions
    /// are allowed.
    pub fn valid_transitions(&self) -> &'static [WorkflowStatus] {
        match self {
            Self::Submitted => &[Self::Running],
            Self::Running => &[Self::Succeeded, Self::Failed],
            Self::Succeeded | Self::Failed => &[],
        }
    }

    /// Check whether a transition from `self` to `to` is valid.
    pub fn can_transition(&self, to: WorkflowStatus) -> bool {
        self.valid_transitions().contains(&to)
    }

    /// Validate a state transition, returning a descriptive error for
    /// invalid ones.
    pub fn validate_transition(&self, to: WorkflowStatus) -> Result<(), CoreError> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(CoreError::Validation(format!(
                "Invalid workflow transition: {} -> {}",
                self.as_str(),
                to.as_str()
            )))
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StageStatus
// ---------------------------------------------------------------------------

/// Status of a single stage execution.
///
/// `Pending` is the placeholder the executor persists into the workflow
/// document before launching a stage. `Submitted` and `Running` are the
/// transient states of the stage's own record while the computation is in
/// flight. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Submitted,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    /// Return the wire-format string for this variant.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parse from a wire-format string.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "submitted" => Ok(Self::Submitted),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::Validation(format!(
                "Invalid stage status: '{s}'. Must be one of: pending, submitted, running, succeeded, failed"
            ))),
        }
    }

    /// Whether this status is terminal for a stage execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
