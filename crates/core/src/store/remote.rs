//! Hosted document service backend.
//!
//! The service exposes one resource per document:
//!
//! | Method   | Path                                      | Notes                        |
//! |----------|-------------------------------------------|------------------------------|
//! | `GET`    | `/collections/{c}/documents`              | query encoded as parameters  |
//! | `POST`   | `/collections/{c}/documents`              | body `{id, data}`            |
//! | `GET`    | `/collections/{c}/documents/{id}`         |                              |
//! | `PUT`    | `/collections/{c}/documents/{id}`         | `If-Match: <revision>`       |
//! | `DELETE` | `/collections/{c}/documents/{id}`         |                              |
//!
//! Every request carries `X-Project-Id` and `X-Api-Key`.

use super::{
    validate_collection, Document, DocumentPage, DocumentStore, FilterOp, Order, Query,
    StoreError, StoreResult,
};
use async_trait::async_trait;
use hms_uuid::DocumentId;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

const PROJECT_HEADER: &str = "X-Project-Id";
const API_KEY_HEADER: &str = "X-Api-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RemoteStoreConfig {
    pub endpoint: String,
    pub project: String,
    pub api_key: String,
}

impl fmt::Debug for RemoteStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStoreConfig")
            .field("endpoint", &self.endpoint)
            .field("project", &self.project)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CreateBody {
    id: DocumentId,
    data: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ReplaceBody {
    data: Value,
}

#[derive(Debug)]
pub struct RemoteStore {
    cfg: RemoteStoreConfig,
    client: reqwest::Client,
}

impl RemoteStore {
    pub fn new(cfg: RemoteStoreConfig) -> StoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { cfg, client })
    }

    fn collection_url(&self, collection: &str) -> StoreResult<String> {
        validate_collection(collection)?;
        Ok(format!(
            "{}/collections/{}/documents",
            self.cfg.endpoint.trim_end_matches('/'),
            collection
        ))
    }

    fn document_url(&self, collection: &str, id: &DocumentId) -> StoreResult<String> {
        Ok(format!("{}/{}", self.collection_url(collection)?, id))
    }

    fn authorised(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(PROJECT_HEADER, &self.cfg.project)
            .header(API_KEY_HEADER, &self.cfg.api_key)
    }
}

/// Turns an unexpected response into [`StoreError::Remote`].
async fn unexpected(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    StoreError::Remote { status, message }
}

#[async_trait]
impl DocumentStore for RemoteStore {
    async fn get(&self, collection: &str, id: &DocumentId) -> StoreResult<Option<Document>> {
        let url = self.document_url(collection, id)?;
        let response = self.authorised(self.client.get(url)).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(unexpected(response).await),
        }
    }

    async fn list(&self, collection: &str, query: &Query) -> StoreResult<DocumentPage> {
        let url = self.collection_url(collection)?;
        let response = self
            .authorised(self.client.get(url).query(&encode_query_params(query)))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            _ => Err(unexpected(response).await),
        }
    }

    async fn create(
        &self,
        collection: &str,
        id: DocumentId,
        data: Value,
    ) -> StoreResult<Document> {
        let url = self.collection_url(collection)?;
        let response = self
            .authorised(self.client.post(url).json(&CreateBody { id, data }))
            .send()
            .await?;
        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
            StatusCode::CONFLICT => Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id,
            }),
            _ => Err(unexpected(response).await),
        }
    }

    async fn replace(
        &self,
        collection: &str,
        id: &DocumentId,
        expected_revision: u64,
        data: Value,
    ) -> StoreResult<Document> {
        let url = self.document_url(collection, id)?;
        let response = self
            .authorised(
                self.client
                    .put(url)
                    .header(reqwest::header::IF_MATCH, expected_revision.to_string())
                    .json(&ReplaceBody { data }),
            )
            .send()
            .await?;
        match response.status() {
            StatusCode::OK => Ok(response.json().await?),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: *id,
            }),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Err(StoreError::Conflict {
                collection: collection.to_string(),
                id: *id,
                expected: expected_revision,
            }),
            _ => Err(unexpected(response).await),
        }
    }

    async fn delete(&self, collection: &str, id: &DocumentId) -> StoreResult<bool> {
        let url = self.document_url(collection, id)?;
        let response = self.authorised(self.client.delete(url)).send().await?;
        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(unexpected(response).await),
        }
    }
}

/// Encodes a query as URL parameters.
///
/// Filters become repeated `filter=<field>:<op>:<json value>` pairs.
pub fn encode_query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = Vec::new();

    for filter in &query.filters {
        params.push((
            "filter".to_string(),
            format!("{}:{}:{}", filter.field, filter.op.as_str(), filter.value),
        ));
    }

    if let Some(search) = &query.search {
        params.push(("search".to_string(), search.term.clone()));
        params.push(("search_fields".to_string(), search.fields.join(",")));
    }

    let order = match query.order {
        Order::CreatedAsc => "created_asc",
        Order::CreatedDesc => "created_desc",
    };
    params.push(("order".to_string(), order.to_string()));

    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    if query.offset > 0 {
        params.push(("offset".to_string(), query.offset.to_string()));
    }

    params
}

/// Inverse of [`encode_query_params`]. Unknown parameters are ignored.
pub fn decode_query_params(params: &[(String, String)]) -> StoreResult<Query> {
    let mut query = Query::new();
    let mut search_term = None;
    let mut search_fields = Vec::new();

    let invalid = |key: &str, value: &str| StoreError::InvalidQuery(format!("{key}={value}"));

    for (key, value) in params {
        match key.as_str() {
            "filter" => {
                let mut parts = value.splitn(3, ':');
                let (field, op, raw) = match (parts.next(), parts.next(), parts.next()) {
                    (Some(field), Some(op), Some(raw)) if !field.is_empty() => (field, op, raw),
                    _ => return Err(invalid(key, value)),
                };
                let op = FilterOp::parse(op).ok_or_else(|| invalid(key, value))?;
                let value: Value =
                    serde_json::from_str(raw).map_err(|_| invalid(key, value))?;
                query = query.filter(field, op, value);
            }
            "search" => search_term = Some(value.clone()),
            "search_fields" => {
                search_fields = value
                    .split(',')
                    .map(str::trim)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            "order" => {
                let order = match value.as_str() {
                    "created_asc" => Order::CreatedAsc,
                    "created_desc" => Order::CreatedDesc,
                    _ => return Err(invalid(key, value)),
                };
                query = query.order(order);
            }
            "limit" => {
                let limit = value.parse().map_err(|_| invalid(key, value))?;
                query = query.limit(limit);
            }
            "offset" => {
                let offset = value.parse().map_err(|_| invalid(key, value))?;
                query = query.offset(offset);
            }
            _ => {}
        }
    }

    if let Some(term) = search_term {
        let fields: Vec<&str> = search_fields.iter().map(String::as_str).collect();
        query = query.search(&fields, &term);
    }

    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::{
        extract::{Path, Query as UrlQuery, State},
        http::{HeaderMap, StatusCode as AxumStatus},
        routing::get,
        Json, Router,
    };
    use serde_json::json;
    use std::sync::Arc;

    type StubState = Arc<MemoryStore>;
    type StubResult<T> = Result<T, (AxumStatus, String)>;

    fn stub_error(e: StoreError) -> (AxumStatus, String) {
        let status = match e {
            StoreError::NotFound { .. } => AxumStatus::NOT_FOUND,
            StoreError::AlreadyExists { .. } => AxumStatus::CONFLICT,
            StoreError::Conflict { .. } => AxumStatus::PRECONDITION_FAILED,
            StoreError::InvalidQuery(_) => AxumStatus::BAD_REQUEST,
            _ => AxumStatus::INTERNAL_SERVER_ERROR,
        };
        (status, e.to_string())
    }

    fn check_key(headers: &HeaderMap) -> StubResult<()> {
        let project = headers.get(PROJECT_HEADER).and_then(|v| v.to_str().ok());
        let key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
        if project == Some("hms-test") && key == Some("secret") {
            Ok(())
        } else {
            Err((AxumStatus::UNAUTHORIZED, "bad credentials".into()))
        }
    }

    async fn list_docs(
        State(store): State<StubState>,
        Path(collection): Path<String>,
        headers: HeaderMap,
        UrlQuery(params): UrlQuery<Vec<(String, String)>>,
    ) -> StubResult<Json<DocumentPage>> {
        check_key(&headers)?;
        let query = decode_query_params(&params).map_err(stub_error)?;
        let page = store.list(&collection, &query).await.map_err(stub_error)?;
        Ok(Json(page))
    }

    async fn create_doc(
        State(store): State<StubState>,
        Path(collection): Path<String>,
        headers: HeaderMap,
        Json(body): Json<CreateBody>,
    ) -> StubResult<(AxumStatus, Json<Document>)> {
        check_key(&headers)?;
        let doc = store
            .create(&collection, body.id, body.data)
            .await
            .map_err(stub_error)?;
        Ok((AxumStatus::CREATED, Json(doc)))
    }

    async fn get_doc(
        State(store): State<StubState>,
        Path((collection, id)): Path<(String, DocumentId)>,
        headers: HeaderMap,
    ) -> StubResult<Json<Document>> {
        check_key(&headers)?;
        store
            .get(&collection, &id)
            .await
            .map_err(stub_error)?
            .map(Json)
            .ok_or((AxumStatus::NOT_FOUND, "missing".into()))
    }

    async fn replace_doc(
        State(store): State<StubState>,
        Path((collection, id)): Path<(String, DocumentId)>,
        headers: HeaderMap,
        Json(body): Json<ReplaceBody>,
    ) -> StubResult<Json<Document>> {
        check_key(&headers)?;
        let expected = headers
            .get("if-match")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or((AxumStatus::BAD_REQUEST, "missing If-Match".into()))?;
        let doc = store
            .replace(&collection, &id, expected, body.data)
            .await
            .map_err(stub_error)?;
        Ok(Json(doc))
    }

    async fn delete_doc(
        State(store): State<StubState>,
        Path((collection, id)): Path<(String, DocumentId)>,
        headers: HeaderMap,
    ) -> StubResult<AxumStatus> {
        check_key(&headers)?;
        if store.delete(&collection, &id).await.map_err(stub_error)? {
            Ok(AxumStatus::NO_CONTENT)
        } else {
            Err((AxumStatus::NOT_FOUND, "missing".into()))
        }
    }

    async fn spawn_stub() -> String {
        let app = Router::new()
            .route(
                "/collections/:collection/documents",
                get(list_docs).post(create_doc),
            )
            .route(
                "/collections/:collection/documents/:id",
                get(get_doc).put(replace_doc).delete(delete_doc),
            )
            .with_state(Arc::new(MemoryStore::new()));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn remote(endpoint: String, api_key: &str) -> RemoteStore {
        RemoteStore::new(RemoteStoreConfig {
            endpoint,
            project: "hms-test".into(),
            api_key: api_key.into(),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn remote_store_round_trips_through_http() {
        let store = remote(spawn_stub().await, "secret");
        let id = DocumentId::new();

        let created = store
            .create("patients", id, json!({"first_name": "Ada"}))
            .await
            .unwrap();
        assert_eq!(created.revision, 1);

        let dup = store.create("patients", id, json!({})).await.unwrap_err();
        assert!(matches!(dup, StoreError::AlreadyExists { .. }));

        let fetched = store.get("patients", &id).await.unwrap().unwrap();
        assert_eq!(fetched.data["first_name"], "Ada");
        assert!(store
            .get("patients", &DocumentId::new())
            .await
            .unwrap()
            .is_none());

        store
            .replace("patients", &id, 1, json!({"first_name": "Grace"}))
            .await
            .unwrap();
        let stale = store
            .replace("patients", &id, 1, json!({"first_name": "Nope"}))
            .await
            .unwrap_err();
        assert!(matches!(stale, StoreError::Conflict { expected: 1, .. }));

        let page = store
            .list(
                "patients",
                &Query::new().search(&["first_name"], "grace").limit(10),
            )
            .await
            .unwrap();
        assert_eq!(page.total, 1);

        assert!(store.delete("patients", &id).await.unwrap());
        assert!(!store.delete("patients", &id).await.unwrap());
    }

    #[tokio::test]
    async fn remote_store_surfaces_rejected_credentials() {
        let store = remote(spawn_stub().await, "wrong");
        let err = store.list("patients", &Query::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Remote { status: 401, .. }));
    }

    #[test]
    fn query_params_decode_to_the_same_query() {
        let query = Query::new()
            .where_eq("status", "issued")
            .filter("total", FilterOp::Gt, 1000)
            .filter("notes", FilterOp::Ne, "a:b")
            .search(&["first_name", "last_name"], "ada")
            .order(Order::CreatedAsc)
            .limit(20)
            .offset(40);

        let decoded = decode_query_params(&encode_query_params(&query)).unwrap();
        assert_eq!(decoded, query);
    }

    #[test]
    fn malformed_filters_are_rejected() {
        let params = vec![("filter".to_string(), "status:between:1".to_string())];
        assert!(matches!(
            decode_query_params(&params),
            Err(StoreError::InvalidQuery(_))
        ));

        let params = vec![("filter".to_string(), "status:eq:not-json".to_string())];
        assert!(decode_query_params(&params).is_err());
    }
}
