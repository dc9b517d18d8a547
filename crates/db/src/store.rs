//! The minimal document-store contract consumed by the workflow engine.
//!
//! The engine treats documents as string-keyed JSON objects with no enforced
//! schema beyond the fields it reads and writes itself, and only ever queries
//! by equality on a single top-level string field. Everything richer than
//! that (indexing, transactions, projections) belongs to the store behind
//! this trait, not to the engine.

use serde_json::Value;

/// Collection holding the top-level workflow job documents.
pub const WORKFLOW_JOBS: &str = "workflow_jobs";

/// Collection holding composed end-of-run report documents.
pub const REPORTS: &str = "reports";

/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Malformed document in {collection}: {reason}")]
    Malformed { collection: String, reason: String },

    #[error("No document in {collection} with {field} = {value}")]
    MissingDocument {
        collection: String,
        field: String,
        value: String,
    },
}

/// Typed read/write operations against named document collections.
///
/// Implementations must provide atomic per-document updates; the engine never
/// needs cross-document transactions. Two implementations exist:
/// [`MemoryRecordStore`](crate::memory::MemoryRecordStore) for tests and
/// [`PgRecordStore`](crate::postgres::PgRecordStore) for production.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Find the first document in `collection` whose top-level `field`
    /// equals the string `value`.
    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, DbError>;

    /// Find all documents in `collection` whose top-level `field` equals the
    /// string `value`.
    async fn find(&self, collection: &str, field: &str, value: &str)
        -> Result<Vec<Value>, DbError>;

    /// Insert documents into `collection`.
    async fn insert(&self, collection: &str, docs: &[Value]) -> Result<(), DbError>;

    /// Shallow-merge the fields of `update_spec` into every document in
    /// `collection` whose top-level `field` equals the string `value`.
    ///
    /// Returns the number of documents updated. Merging the same spec twice
    /// is idempotent.
    async fn update(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        update_spec: &Value,
    ) -> Result<u64, DbError>;

    /// Distinct string values of `field` across all documents in
    /// `collection`. Documents without the field are skipped.
    async fn distinct(&self, collection: &str, field: &str) -> Result<Vec<String>, DbError>;
}
