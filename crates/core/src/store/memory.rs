//! Process-local document store.

use super::{
    validate_collection, Document, DocumentPage, DocumentStore, Query, StoreError, StoreResult,
};
use async_trait::async_trait;
use hms_uuid::DocumentId;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

type Collections = HashMap<String, HashMap<DocumentId, Document>>;

/// Keeps every collection in a map behind one lock. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &DocumentId) -> StoreResult<Option<Document>> {
        validate_collection(collection)?;
        let guard = self.collections.read().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(collection).and_then(|docs| docs.get(id)).cloned())
    }

    async fn list(&self, collection: &str, query: &Query) -> StoreResult<DocumentPage> {
        validate_collection(collection)?;
        let guard = self.collections.read().map_err(|_| StoreError::Poisoned)?;
        let docs = guard
            .get(collection)
            .map(|docs| docs.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(query.apply(docs))
    }

    async fn create(
        &self,
        collection: &str,
        id: DocumentId,
        data: Value,
    ) -> StoreResult<Document> {
        validate_collection(collection)?;
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let docs = guard.entry(collection.to_string()).or_default();
        if docs.contains_key(&id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id,
            });
        }
        let doc = Document::first_revision(id, data);
        docs.insert(id, doc.clone());
        Ok(doc)
    }

    async fn replace(
        &self,
        collection: &str,
        id: &DocumentId,
        expected_revision: u64,
        data: Value,
    ) -> StoreResult<Document> {
        validate_collection(collection)?;
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        let current = guard
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: *id,
            })?;

        if current.revision != expected_revision {
            return Err(StoreError::Conflict {
                collection: collection.to_string(),
                id: *id,
                expected: expected_revision,
            });
        }

        let next = current.next_revision(data);
        *current = next.clone();
        Ok(next)
    }

    async fn delete(&self, collection: &str, id: &DocumentId) -> StoreResult<bool> {
        validate_collection(collection)?;
        let mut guard = self.collections.write().map_err(|_| StoreError::Poisoned)?;
        Ok(guard
            .get_mut(collection)
            .map(|docs| docs.remove(id).is_some())
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_get_replace_delete() {
        let store = MemoryStore::new();
        let id = DocumentId::new();

        let created = store
            .create("patients", id, json!({"first_name": "Ada"}))
            .await
            .unwrap();
        assert_eq!(created.revision, 1);

        let fetched = store.get("patients", &id).await.unwrap().unwrap();
        assert_eq!(fetched.data["first_name"], "Ada");

        let replaced = store
            .replace("patients", &id, 1, json!({"first_name": "Grace"}))
            .await
            .unwrap();
        assert_eq!(replaced.revision, 2);

        assert!(store.delete("patients", &id).await.unwrap());
        assert!(!store.delete("patients", &id).await.unwrap());
        assert!(store.get("patients", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let store = MemoryStore::new();
        let id = DocumentId::new();
        store.create("invoices", id, json!({})).await.unwrap();

        let err = store.create("invoices", id, json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn replace_with_stale_revision_conflicts() {
        let store = MemoryStore::new();
        let id = DocumentId::new();
        store.create("medications", id, json!({"stock_quantity": 5})).await.unwrap();
        store
            .replace("medications", &id, 1, json!({"stock_quantity": 4}))
            .await
            .unwrap();

        let err = store
            .replace("medications", &id, 1, json!({"stock_quantity": 3}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, .. }));

        let current = store.get("medications", &id).await.unwrap().unwrap();
        assert_eq!(current.data["stock_quantity"], 4);
    }

    #[tokio::test]
    async fn replace_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .replace("patients", &DocumentId::new(), 1, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_applies_query() {
        let store = MemoryStore::new();
        for status in ["issued", "paid", "issued"] {
            store
                .create("invoices", DocumentId::new(), json!({"status": status}))
                .await
                .unwrap();
        }

        let page = store
            .list("invoices", &Query::new().where_eq("status", "issued"))
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let empty = store.list("payments", &Query::new()).await.unwrap();
        assert_eq!(empty.total, 0);
    }
}
