//! PostgreSQL-backed [`RecordStore`] over a single JSONB table.
//!
//! Every collection shares one `records` table; the collection name is a
//! column and the document is a `JSONB` value. Lookups use the `doc->>field`
//! expression so the engine's single-field equality queries stay index-able,
//! and updates use the JSONB `||` merge operator, which is atomic per row.

use serde_json::Value;
use sqlx::PgPool;

use crate::store::{DbError, RecordStore};

/// A [`RecordStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `records` table and its indexes if they do not exist.
    ///
    /// Safe to call on every startup.
    pub async fn ensure_schema(&self) -> Result<(), DbError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records ( \
                 id BIGSERIAL PRIMARY KEY, \
                 collection TEXT NOT NULL, \
                 doc JSONB NOT NULL, \
                 created_at TIMESTAMPTZ NOT NULL DEFAULT NOW() \
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_collection ON records (collection)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_doc_uuid ON records ((doc->>'uuid'))",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Record store schema ensured");
        Ok(())
    }
}

#[async_trait::async_trait]
impl RecordStore for PgRecordStore {
    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, DbError> {
        let doc = sqlx::query_scalar::<_, Value>(
            "SELECT doc FROM records WHERE collection = $1 AND doc->>$2 = $3 LIMIT 1",
        )
        .bind(collection)
        .bind(field)
        .bind(value)
        .fetch_optional(&self.pool)
        .await?;
        Ok(doc)
    }

    async fn find(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, DbError> {
        let docs = sqlx::query_scalar::<_, Value>(
            "SELECT doc FROM records \
             WHERE collection = $1 AND doc->>$2 = $3 \
             ORDER BY id ASC",
        )
        .bind(collection)
        .bind(field)
        .bind(value)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    async fn insert(&self, collection: &str, docs: &[Value]) -> Result<(), DbError> {
        for doc in docs {
            sqlx::query("INSERT INTO records (collection, doc) VALUES ($1, $2)")
                .bind(collection)
                .bind(doc)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        update_spec: &Value,
    ) -> Result<u64, DbError> {
        if !update_spec.is_object() {
            return Err(DbError::Malformed {
                collection: collection.to_string(),
                reason: "update spec must be a JSON object".to_string(),
            });
        }

        let result = sqlx::query(
            "UPDATE records SET doc = doc || $4 \
             WHERE collection = $1 AND doc->>$2 = $3",
        )
        .bind(collection)
        .bind(field)
        .bind(value)
        .bind(update_spec)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn distinct(&self, collection: &str, field: &str) -> Result<Vec<String>, DbError> {
        let values = sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT doc->>$2 FROM records \
             WHERE collection = $1 AND doc->>$2 IS NOT NULL",
        )
        .bind(collection)
        .bind(field)
        .fetch_all(&self.pool)
        .await?;
        Ok(values)
    }
}
