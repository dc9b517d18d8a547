//! In-memory [`RecordStore`] used by unit and integration tests.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::store::{DbError, RecordStore};

/// A [`RecordStore`] backed by a process-local map of collections.
///
/// Updates are applied under a write lock, which gives the same atomic
/// per-document guarantee the engine requires of the real store.
#[derive(Default)]
pub struct MemoryRecordStore {
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in `collection`.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }
}

fn matches(doc: &Value, field: &str, value: &str) -> bool {
    doc.get(field).and_then(Value::as_str) == Some(value)
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<Value>, DbError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| matches(d, field, value)).cloned()))
    }

    async fn find(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>, DbError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| matches(d, field, value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, docs: &[Value]) -> Result<(), DbError> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(docs);
        Ok(())
    }

    async fn update(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        update_spec: &Value,
    ) -> Result<u64, DbError> {
        let spec = update_spec.as_object().ok_or_else(|| DbError::Malformed {
            collection: collection.to_string(),
            reason: "update spec must be a JSON object".to_string(),
        })?;

        let mut collections = self.collections.write().await;
        let mut updated = 0;
        if let Some(docs) = collections.get_mut(collection) {
            for doc in docs.iter_mut().filter(|d| matches(d, field, value)) {
                if let Some(obj) = doc.as_object_mut() {
                    for (k, v) in spec {
                        obj.insert(k.clone(), v.clone());
                    }
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn distinct(&self, collection: &str, field: &str) -> Result<Vec<String>, DbError> {
        let collections = self.collections.read().await;
        let mut values: Vec<String> = Vec::new();
        if let Some(docs) = collections.get(collection) {
            for doc in docs {
                if let Some(v) = doc.get(field).and_then(Value::as_str) {
                    if !values.iter().any(|existing| existing == v) {
                        values.push(v.to_string());
                    }
                }
            }
        }
        Ok(values)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_then_find_one() {
        let store = MemoryRecordStore::new();
        store
            .insert("jobs", &[json!({"uuid": "a", "status": "submitted"})])
            .await
            .unwrap();

        let doc = store.find_one("jobs", "uuid", "a").await.unwrap().unwrap();
        assert_eq!(doc["status"], "submitted");
    }

    #[tokio::test]
    async fn find_one_misses_on_unknown_value() {
        let store = MemoryRecordStore::new();
        store.insert("jobs", &[json!({"uuid": "a"})]).await.unwrap();
        assert!(store.find_one("jobs", "uuid", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_returns_all_matches() {
        let store = MemoryRecordStore::new();
        store
            .insert(
                "jobs",
                &[
                    json!({"uuid": "a", "status": "failed"}),
                    json!({"uuid": "b", "status": "failed"}),
                    json!({"uuid": "c", "status": "succeeded"}),
                ],
            )
            .await
            .unwrap();

        let failed = store.find("jobs", "status", "failed").await.unwrap();
        assert_eq!(failed.len(), 2);
    }

    #[tokio::test]
    async fn update_merges_fields_and_preserves_others() {
        let store = MemoryRecordStore::new();
        store
            .insert("jobs", &[json!({"uuid": "a", "status": "submitted", "name": "run1"})])
            .await
            .unwrap();

        let n = store
            .update("jobs", "uuid", "a", &json!({"status": "running"}))
            .await
            .unwrap();
        assert_eq!(n, 1);

        let doc = store.find_one("jobs", "uuid", "a").await.unwrap().unwrap();
        assert_eq!(doc["status"], "running");
        assert_eq!(doc["name"], "run1");
    }

    #[tokio::test]
    async fn update_twice_is_idempotent() {
        let store = MemoryRecordStore::new();
        store.insert("jobs", &[json!({"uuid": "a"})]).await.unwrap();

        let spec = json!({"status": "failed", "error": "boom"});
        store.update("jobs", "uuid", "a", &spec).await.unwrap();
        let after_first = store.find_one("jobs", "uuid", "a").await.unwrap();
        store.update("jobs", "uuid", "a", &spec).await.unwrap();
        let after_second = store.find_one("jobs", "uuid", "a").await.unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(store.len("jobs").await, 1);
    }

    #[tokio::test]
    async fn update_on_missing_doc_touches_nothing() {
        let store = MemoryRecordStore::new();
        let n = store
            .update("jobs", "uuid", "ghost", &json!({"status": "running"}))
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn non_object_update_spec_rejected() {
        let store = MemoryRecordStore::new();
        let result = store.update("jobs", "uuid", "a", &json!([1, 2])).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn distinct_deduplicates_and_skips_missing() {
        let store = MemoryRecordStore::new();
        store
            .insert(
                "jobs",
                &[
                    json!({"job_name": "run1"}),
                    json!({"job_name": "run2"}),
                    json!({"job_name": "run1"}),
                    json!({"other": "x"}),
                ],
            )
            .await
            .unwrap();

        let names = store.distinct("jobs", "job_name").await.unwrap();
        assert_eq!(names, vec!["run1".to_string(), "run2".to_string()]);
    }

    #[tokio::test]
    async fn unknown_collection_is_empty() {
        let store = MemoryRecordStore::new();
        assert!(store.find("nope", "f", "v").await.unwrap().is_empty());
        assert!(store.distinct("nope", "f").await.unwrap().is_empty());
    }
}
