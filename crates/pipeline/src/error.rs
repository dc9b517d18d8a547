use uuid::Uuid;

use dropsight_core::error::CoreError;
use dropsight_core::stage::Stage;
use dropsight_db::store::DbError;

/// Errors raised by the workflow planner and executor.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The requested job name collides with an existing job. Raised before
    /// any persistence; the caller may retry with a different name.
    #[error("A job named \"{0}\" already exists")]
    DuplicateJobName(String),

    /// The referenced prior job does not exist. Raised during planning,
    /// before any side effects.
    #[error("Prior job {0} not found")]
    PriorJobNotFound(Uuid),

    /// A stage's computation reported a non-success terminal status.
    #[error("Stage {stage} failed: {message}")]
    StageFailed { stage: Stage, message: String },

    /// The bounded wait for the final stage's artifacts was exhausted.
    /// Treated identically to a stage failure.
    #[error("Timed out waiting for {stage} artifacts after {polls} polls")]
    FinalizeTimeout { stage: Stage, polls: u32 },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Db(#[from] DbError),
}
