//! File-backed document store.
//!
//! ## Storage Layout
//!
//! ```text
//! <root>/
//!   <collection>/
//!     <s1>/
//!       <s2>/
//!         <id>/
//!           document.yaml
//! ```
//!
//! where `s1` and `s2` are the first four hex characters of the id.
//!
//! Writes go to a temporary file that is renamed over `document.yaml`, so readers never
//! see a half-written document. All writes in the process are serialised by one mutex,
//! which makes the revision check and the write a single atomic step. Running two
//! processes against the same root is not supported.

use super::{
    validate_collection, Document, DocumentPage, DocumentStore, Query, StoreError, StoreResult,
};
use async_trait::async_trait;
use hms_uuid::DocumentId;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const DOCUMENT_FILENAME: &str = "document.yaml";
const DOCUMENT_TMP_FILENAME: &str = "document.yaml.tmp";

#[derive(Debug, Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            inner: Arc::new(Inner {
                root: root.to_path_buf(),
                write_lock: Mutex::new(()),
            }),
        })
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> StoreResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

impl Inner {
    fn document_path(&self, collection: &str, id: &DocumentId) -> PathBuf {
        id.sharded_dir(&self.root.join(collection))
            .join(DOCUMENT_FILENAME)
    }

    fn read(&self, path: &Path) -> StoreResult<Option<Document>> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Some(serde_yaml::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    fn write(&self, path: &Path, document: &Document) -> StoreResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::Io(std::io::Error::other("document path has no parent")))?;
        fs::create_dir_all(dir)?;

        let yaml = serde_yaml::to_string(document)?;
        let tmp = dir.join(DOCUMENT_TMP_FILENAME);
        fs::write(&tmp, yaml)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn get(&self, collection: &str, id: &DocumentId) -> StoreResult<Option<Document>> {
        validate_collection(collection)?;
        self.read(&self.document_path(collection, id))
    }

    /// Walks the sharded tree. Documents that fail to parse are skipped with a warning.
    fn scan(&self, collection: &str) -> StoreResult<Vec<Document>> {
        validate_collection(collection)?;
        let mut documents = Vec::new();

        let s1_iter = match fs::read_dir(self.root.join(collection)) {
            Ok(it) => it,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(documents),
            Err(e) => return Err(StoreError::Io(e)),
        };

        for s1 in s1_iter.flatten() {
            let s1_path = s1.path();
            if !s1_path.is_dir() {
                continue;
            }

            let s2_iter = match fs::read_dir(&s1_path) {
                Ok(it) => it,
                Err(_) => continue,
            };

            for s2 in s2_iter.flatten() {
                let s2_path = s2.path();
                if !s2_path.is_dir() {
                    continue;
                }

                let id_iter = match fs::read_dir(&s2_path) {
                    Ok(it) => it,
                    Err(_) => continue,
                };

                for id_ent in id_iter.flatten() {
                    let doc_path = id_ent.path().join(DOCUMENT_FILENAME);
                    if !doc_path.is_file() {
                        continue;
                    }

                    match self.read(&doc_path) {
                        Ok(Some(doc)) => documents.push(doc),
                        Ok(None) => {}
                        Err(e) => {
                            tracing::warn!(
                                "failed to read document: {} - {}",
                                doc_path.display(),
                                e
                            );
                        }
                    }
                }
            }
        }

        Ok(documents)
    }

    fn create(&self, collection: &str, id: DocumentId, data: Value) -> StoreResult<Document> {
        validate_collection(collection)?;
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let path = self.document_path(collection, &id);
        if path.exists() {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id,
            });
        }

        let document = Document::first_revision(id, data);
        self.write(&path, &document)?;
        Ok(document)
    }

    fn replace(
        &self,
        collection: &str,
        id: &DocumentId,
        expected_revision: u64,
        data: Value,
    ) -> StoreResult<Document> {
        validate_collection(collection)?;
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let path = self.document_path(collection, id);
        let current = self.read(&path)?.ok_or_else(|| StoreError::NotFound {
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
        self.write(&path, &next)?;
        Ok(next)
    }

    fn delete(&self, collection: &str, id: &DocumentId) -> StoreResult<bool> {
        validate_collection(collection)?;
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let dir = id.sharded_dir(&self.root.join(collection));
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, collection: &str, id: &DocumentId) -> StoreResult<Option<Document>> {
        let collection = collection.to_string();
        let id = *id;
        self.run(move |inner| inner.get(&collection, &id)).await
    }

    async fn list(&self, collection: &str, query: &Query) -> StoreResult<DocumentPage> {
        let collection = collection.to_string();
        let query = query.clone();
        self.run(move |inner| Ok(query.apply(inner.scan(&collection)?)))
            .await
    }

    async fn create(
        &self,
        collection: &str,
        id: DocumentId,
        data: Value,
    ) -> StoreResult<Document> {
        let collection = collection.to_string();
        self.run(move |inner| inner.create(&collection, id, data))
            .await
    }

    async fn replace(
        &self,
        collection: &str,
        id: &DocumentId,
        expected_revision: u64,
        data: Value,
    ) -> StoreResult<Document> {
        let collection = collection.to_string();
        let id = *id;
        self.run(move |inner| inner.replace(&collection, &id, expected_revision, data))
            .await
    }

    async fn delete(&self, collection: &str, id: &DocumentId) -> StoreResult<bool> {
        let collection = collection.to_string();
        let id = *id;
        self.run(move |inner| inner.delete(&collection, &id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn documents_are_written_to_sharded_yaml_files() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let store = FileStore::open(temp.path()).unwrap();
        let id = DocumentId::parse("550e8400e29b41d4a716446655440000").unwrap();

        store
            .create("patients", id, json!({"first_name": "Ada"}))
            .await
            .unwrap();

        let path = temp
            .path()
            .join("patients/55/0e/550e8400e29b41d4a716446655440000/document.yaml");
        assert!(path.is_file(), "document.yaml should exist");

        let reopened = FileStore::open(temp.path()).unwrap();
        let doc = reopened.get("patients", &id).await.unwrap().unwrap();
        assert_eq!(doc.data["first_name"], "Ada");
        assert_eq!(doc.revision, 1);
    }

    #[tokio::test]
    async fn replace_checks_revision() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        let id = DocumentId::new();
        store.create("invoices", id, json!({"balance": 100})).await.unwrap();

        let updated = store
            .replace("invoices", &id, 1, json!({"balance": 60}))
            .await
            .unwrap();
        assert_eq!(updated.revision, 2);

        let err = store
            .replace("invoices", &id, 1, json!({"balance": 0}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[tokio::test]
    async fn create_rejects_existing_id() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        let id = DocumentId::new();
        store.create("invoices", id, json!({})).await.unwrap();

        let err = store.create("invoices", id, json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn list_skips_corrupt_documents() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        store
            .create("patients", DocumentId::new(), json!({"first_name": "Valid"}))
            .await
            .unwrap();

        let corrupt_dir = DocumentId::new().sharded_dir(&temp.path().join("patients"));
        fs::create_dir_all(&corrupt_dir).unwrap();
        fs::write(corrupt_dir.join(DOCUMENT_FILENAME), "invalid: yaml: [[[").unwrap();

        let page = store.list("patients", &Query::new()).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.documents[0].data["first_name"], "Valid");
    }

    #[tokio::test]
    async fn list_of_missing_collection_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        let page = store.list("payments", &Query::new()).await.unwrap();
        assert_eq!(page, DocumentPage::default());
    }

    #[tokio::test]
    async fn delete_removes_document_directory() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        let id = DocumentId::new();
        store.create("roles", id, json!({"name": "Nurse"})).await.unwrap();

        assert!(store.delete("roles", &id).await.unwrap());
        assert!(!id.sharded_dir(&temp.path().join("roles")).exists());
        assert!(!store.delete("roles", &id).await.unwrap());
    }
}
