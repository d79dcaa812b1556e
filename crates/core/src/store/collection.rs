//! Typed access to one collection.

use super::{Document, DocumentStore, Query, StoreError};
use crate::constants::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, MAX_WRITE_ATTEMPTS};
use crate::{HmsError, HmsResult};
use chrono::{DateTime, Utc};
use hms_uuid::DocumentId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;

/// A type stored as the `data` of documents in one collection.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: &'static str;
    /// Human-readable name used in error messages.
    const NAME: &'static str;
}

/// An entity together with its document metadata. Serialises flat, so API clients see
/// `id`, `revision` and the timestamps next to the entity fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stored<T> {
    pub id: DocumentId,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: T,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: usize,
    pub items: Vec<Stored<T>>,
}

impl<T> Page<T> {
    pub fn map<U>(self, mut f: impl FnMut(Stored<T>) -> Stored<U>) -> Page<U> {
        Page {
            total: self.total,
            items: self.items.into_iter().map(&mut f).collect(),
        }
    }
}

/// Caller-supplied pagination, clamped before it reaches the store.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct PageParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PageParams {
    pub fn new(limit: Option<usize>, offset: Option<usize>) -> Self {
        Self { limit, offset }
    }

    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }

    pub fn apply(&self, query: Query) -> Query {
        query.limit(self.limit()).offset(self.offset())
    }
}

pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("collection", &T::COLLECTION)
            .finish()
    }
}

impl<T: Entity> Collection<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    fn decode(document: Document) -> HmsResult<Stored<T>> {
        let data = serde_json::from_value(document.data).map_err(|source| HmsError::Decode {
            entity: T::NAME,
            id: document.id.to_string(),
            source,
        })?;
        Ok(Stored {
            id: document.id,
            revision: document.revision,
            created_at: document.created_at,
            updated_at: document.updated_at,
            data,
        })
    }

    pub async fn get(&self, id: &DocumentId) -> HmsResult<Option<Stored<T>>> {
        match self.store.get(T::COLLECTION, id).await? {
            Some(document) => Ok(Some(Self::decode(document)?)),
            None => Ok(None),
        }
    }

    /// Like [`Collection::get`], but absence is an [`HmsError::NotFound`].
    pub async fn require(&self, id: &DocumentId) -> HmsResult<Stored<T>> {
        self.get(id)
            .await?
            .ok_or_else(|| HmsError::not_found(T::NAME, id))
    }

    /// Lists matching entities. Documents that no longer decode are skipped with a warning
    /// and are not counted in `total`.
    pub async fn list(&self, query: &Query) -> HmsResult<Page<T>> {
        let page = self.store.list(T::COLLECTION, query).await?;
        let mut skipped = 0;
        let mut items = Vec::with_capacity(page.documents.len());

        for document in page.documents {
            let id = document.id;
            match Self::decode(document) {
                Ok(item) => items.push(item),
                Err(e) => {
                    skipped += 1;
                    tracing::warn!("skipping {} {}: {}", T::NAME, id, e);
                }
            }
        }

        Ok(Page {
            total: page.total.saturating_sub(skipped),
            items,
        })
    }

    /// Every matching entity, ignoring pagination.
    pub async fn all(&self, query: Query) -> HmsResult<Vec<Stored<T>>> {
        let mut query = query;
        query.limit = None;
        query.offset = 0;
        Ok(self.list(&query).await?.items)
    }

    pub async fn exists(&self, query: Query) -> HmsResult<bool> {
        let page = self.store.list(T::COLLECTION, &query.limit(1)).await?;
        Ok(page.total > 0)
    }

    pub async fn create(&self, data: T) -> HmsResult<Stored<T>> {
        self.create_with_id(DocumentId::new(), data).await
    }

    /// Creates at a caller-chosen id. With a derived id this is how uniqueness of a natural
    /// key is enforced: the second create fails with [`HmsError::AlreadyExists`].
    pub async fn create_with_id(&self, id: DocumentId, data: T) -> HmsResult<Stored<T>> {
        let value = serde_json::to_value(&data)?;
        match self.store.create(T::COLLECTION, id, value).await {
            Ok(document) => Self::decode(document),
            Err(StoreError::AlreadyExists { .. }) => Err(HmsError::AlreadyExists {
                entity: T::NAME,
                detail: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces `current` with `data` if nobody wrote in between.
    pub async fn replace(&self, current: &Stored<T>, data: T) -> HmsResult<Stored<T>> {
        let value = serde_json::to_value(&data)?;
        match self
            .store
            .replace(T::COLLECTION, &current.id, current.revision, value)
            .await
        {
            Ok(document) => Self::decode(document),
            Err(StoreError::Conflict { .. }) => Err(HmsError::Conflict(format!(
                "{} {} was modified concurrently",
                T::NAME,
                current.id
            ))),
            Err(StoreError::NotFound { .. }) => Err(HmsError::not_found(T::NAME, current.id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Read-modify-write with optimistic concurrency.
    ///
    /// `apply` may run several times, once per attempt, and must be free of side effects
    /// beyond the entity it is given. An error from `apply` aborts without writing.
    pub async fn modify<F>(&self, id: &DocumentId, mut apply: F) -> HmsResult<Stored<T>>
    where
        F: FnMut(&mut T) -> HmsResult<()> + Send,
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.require(id).await?;
            let revision = current.revision;
            let mut data = current.data;
            apply(&mut data)?;

            let value = serde_json::to_value(&data)?;
            match self.store.replace(T::COLLECTION, id, revision, value).await {
                Ok(document) => return Self::decode(document),
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(
                        "revision conflict on {} {} (attempt {}/{})",
                        T::NAME,
                        id,
                        attempt,
                        MAX_WRITE_ATTEMPTS
                    );
                }
                Err(StoreError::NotFound { .. }) => return Err(HmsError::not_found(T::NAME, id)),
                Err(e) => return Err(e.into()),
            }
        }

        Err(HmsError::Conflict(format!(
            "{} {} is being modified concurrently, try again",
            T::NAME,
            id
        )))
    }

    pub async fn delete(&self, id: &DocumentId) -> HmsResult<bool> {
        Ok(self.store.delete(T::COLLECTION, id).await?)
    }
}
