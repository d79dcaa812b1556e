//! Document store abstraction.
//!
//! Every entity in HMS is a JSON document in a named collection. Services never talk to a
//! backend directly; they go through [`DocumentStore`], usually via the typed
//! [`Collection`] wrapper.
//!
//! ## Revisions
//!
//! Each stored [`Document`] carries a `revision` that starts at 1 and is incremented by
//! every successful [`DocumentStore::replace`]. A replace names the revision it read; if
//! the stored revision has moved on, the store answers [`StoreError::Conflict`] and the
//! caller re-reads and retries. This compare-and-swap is the only concurrency control in
//! the system, and it is what keeps read-modify-write sequences (invoice balances, stock
//! levels) from losing updates.
//!
//! ## Backends
//!
//! - [`MemoryStore`]: process-local, used by tests and throwaway deployments
//! - [`FileStore`]: sharded YAML files on local disk
//! - [`RemoteStore`]: a hosted document service over HTTP/JSON

mod collection;
mod file;
mod memory;
mod query;
mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hms_uuid::DocumentId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

pub use collection::{Collection, Entity, Page, PageParams, Stored};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use query::{Filter, FilterOp, Order, Query, Search};
pub use remote::{decode_query_params, encode_query_params, RemoteStore, RemoteStoreConfig};

use crate::config::{CoreConfig, StoreBackend};

/// A stored document as seen by every backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub data: Value,
}

impl Document {
    /// Builds the first revision of a document.
    pub fn first_revision(id: DocumentId, data: Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            revision: 1,
            created_at: now,
            updated_at: now,
            data,
        }
    }

    /// Builds the next revision, keeping identity and creation time.
    pub fn next_revision(&self, data: Value) -> Self {
        Self {
            id: self.id,
            revision: self.revision + 1,
            created_at: self.created_at,
            updated_at: Utc::now(),
            data,
        }
    }
}

/// One page of a listing. `total` counts every match, not just this page.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPage {
    pub total: usize,
    pub documents: Vec<Document>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: DocumentId },
    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: DocumentId },
    #[error("revision conflict on {collection}/{id}: expected revision {expected}")]
    Conflict {
        collection: String,
        id: DocumentId,
        expected: u64,
    },
    #[error("invalid collection name: {0}")]
    InvalidCollection(String),
    #[error("invalid query parameter: {0}")]
    InvalidQuery(String),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to encode document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("remote store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote store returned {status}: {message}")]
    Remote { status: u16, message: String },
    #[error("store lock poisoned")]
    Poisoned,
    #[error("store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence operations every backend provides.
///
/// Collection names are validated by each backend with [`validate_collection`].
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Fetches a document, `None` if absent.
    async fn get(&self, collection: &str, id: &DocumentId) -> StoreResult<Option<Document>>;

    /// Lists documents matching `query`.
    async fn list(&self, collection: &str, query: &Query) -> StoreResult<DocumentPage>;

    /// Creates a document at revision 1.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the id is taken.
    async fn create(&self, collection: &str, id: DocumentId, data: Value)
        -> StoreResult<Document>;

    /// Replaces a document's data if its current revision equals `expected_revision`.
    ///
    /// Fails with [`StoreError::NotFound`] or [`StoreError::Conflict`].
    async fn replace(
        &self,
        collection: &str,
        id: &DocumentId,
        expected_revision: u64,
        data: Value,
    ) -> StoreResult<Document>;

    /// Deletes a document. Returns whether anything was removed.
    async fn delete(&self, collection: &str, id: &DocumentId) -> StoreResult<bool>;
}

/// Collection names become path segments and URL segments, so they are restricted to
/// lowercase ASCII letters and underscores.
pub fn validate_collection(name: &str) -> StoreResult<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name.bytes().all(|b| matches!(b, b'a'..=b'z' | b'_'));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(name.to_string()))
    }
}

/// Opens the backend selected in the configuration.
pub fn open_store(cfg: &CoreConfig) -> StoreResult<Arc<dyn DocumentStore>> {
    match cfg.store_backend() {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory document store; data will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::File { root } => {
            tracing::info!("using file document store at {}", root.display());
            Ok(Arc::new(FileStore::open(root)?))
        }
        StoreBackend::Remote(remote) => {
            tracing::info!("using remote document store at {}", remote.endpoint);
            Ok(Arc::new(RemoteStore::new(remote.clone())?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_are_restricted() {
        assert!(validate_collection("patients").is_ok());
        assert!(validate_collection("stock_movements").is_ok());
        assert!(validate_collection("").is_err());
        assert!(validate_collection("../etc").is_err());
        assert!(validate_collection("Patients").is_err());
    }

    #[test]
    fn next_revision_keeps_identity() {
        let first = Document::first_revision(DocumentId::new(), serde_json::json!({"a": 1}));
        let second = first.next_revision(serde_json::json!({"a": 2}));

        assert_eq!(second.id, first.id);
        assert_eq!(second.revision, 2);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }
}
