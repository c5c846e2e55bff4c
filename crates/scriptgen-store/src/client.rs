//! Firestore REST API client.
//!
//! Thin transport over the v1 REST surface with:
//! - Cached service-account tokens, refreshed once on `ACCESS_TOKEN_EXPIRED`
//! - Pooled HTTP client with request and connect timeouts
//! - Per-request tracing spans and metrics

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info_span, Instrument};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::retry::RetryConfig;
use crate::token_cache::TokenCache;
use crate::types::{
    CommitRequest, CommitResponse, Document, ListDocumentsResponse, RunQueryRequest,
    RunQueryResponse, StructuredQuery, Value, Write,
};

/// Firestore allows at most this many writes per commit.
pub const MAX_COMMIT_WRITES: usize = 500;

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Database ID (usually "(default)")
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
}

impl FirestoreConfig {
    pub fn from_env() -> StoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .unwrap_or_default();

        if project_id.trim().is_empty() {
            return Err(StoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to use Firestore",
            ));
        }

        let secs = |key: &str, default: u64| {
            Duration::from_secs(
                std::env::var(key)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(default),
            )
        };

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: secs("FIRESTORE_TIMEOUT_SECS", 30),
            connect_timeout: secs("FIRESTORE_CONNECT_TIMEOUT_SECS", 5),
            retry: RetryConfig::from_env(),
        })
    }
}

/// Firestore REST API client.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    tokens: Arc<TokenCache>,
}

impl FirestoreClient {
    pub async fn new(config: FirestoreConfig) -> StoreResult<Self> {
        let provider = Self::service_account()?;
        Self::with_provider(config, provider)
    }

    /// Build a client around any token provider.
    pub fn with_provider(
        config: FirestoreConfig,
        provider: Arc<dyn TokenProvider>,
    ) -> StoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("scriptgen-store/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base_url = format!(
            "https://firestore.googleapis.com/v1/projects/{}/databases/{}/documents",
            config.project_id, config.database_id
        );

        Ok(Self {
            http,
            config,
            base_url,
            tokens: Arc::new(TokenCache::new(provider)),
        })
    }

    pub async fn from_env() -> StoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    fn service_account() -> StoreResult<Arc<dyn TokenProvider>> {
        match CustomServiceAccount::from_env() {
            Ok(Some(sa)) => Ok(Arc::new(sa)),
            Ok(None) => Err(StoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS must point to a service account JSON file",
            )),
            Err(e) => Err(StoreError::auth_error(format!(
                "Failed to load service account: {}",
                e
            ))),
        }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.config.retry
    }

    /// Resource name used inside commit writes and queries.
    pub fn document_name(&self, collection: &str, doc_id: &str) -> String {
        format!(
            "projects/{}/databases/{}/documents/{}/{}",
            self.config.project_id, self.config.database_id, collection, doc_id
        )
    }

    fn document_url(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    /// Send a request with a bearer token, refreshing the token once if the
    /// API reports it expired.
    async fn send<F>(&self, build: F) -> StoreResult<Response>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.tokens.get().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !(body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")) {
            return Err(StoreError::auth_error(body));
        }

        debug!("Access token rejected as expired, refreshing");
        self.tokens.invalidate().await;
        let token = self.tokens.get().await?;
        Ok(build(&token).send().await?)
    }

    async fn error_from(response: Response, url: &str) -> StoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        StoreError::from_http_status(status, format!("{} failed: {}", url, body))
    }

    /// Fetch a document; `None` when it does not exist.
    pub async fn get_document(&self, collection: &str, doc_id: &str) -> StoreResult<Option<Document>> {
        let url = self.document_url(collection, doc_id);
        self.instrumented("get_document", collection, Some(doc_id), async {
            let response = self.send(|t| self.http.get(&url).bearer_auth(t)).await?;
            match response.status() {
                StatusCode::OK => Ok(Some(response.json().await?)),
                StatusCode::NOT_FOUND => Ok(None),
                _ => Err(Self::error_from(response, &url).await),
            }
        })
        .await
    }

    /// Write a whole document, creating it if absent.
    ///
    /// With `update_time`, the write only applies if the stored document
    /// still carries that update time.
    pub async fn set_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_time: Option<&str>,
    ) -> StoreResult<Document> {
        let mut url = self.document_url(collection, doc_id);
        if let Some(ts) = update_time {
            url = format!("{}?currentDocument.updateTime={}", url, urlencoding::encode(ts));
        }
        let body = Document::new(fields);
        self.instrumented("set_document", collection, Some(doc_id), async {
            let response = self
                .send(|t| self.http.patch(&url).bearer_auth(t).json(&body))
                .await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                StatusCode::PRECONDITION_FAILED | StatusCode::CONFLICT => {
                    let body = response.text().await.unwrap_or_default();
                    Err(StoreError::PreconditionFailed(body))
                }
                StatusCode::BAD_REQUEST => {
                    // Firestore reports a stale updateTime as 400 FAILED_PRECONDITION
                    let body = response.text().await.unwrap_or_default();
                    if body.contains("FAILED_PRECONDITION") {
                        Err(StoreError::PreconditionFailed(body))
                    } else {
                        Err(StoreError::request_failed(format!("{} failed: {}", url, body)))
                    }
                }
                _ => Err(Self::error_from(response, &url).await),
            }
        })
        .await
    }

    /// List every document in a collection, following page tokens.
    pub async fn list_all_documents(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list_documents(collection, 300, page_token.as_deref()).await?;
            documents.extend(page.documents.unwrap_or_default());
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => return Ok(documents),
            }
        }
    }

    async fn list_documents(
        &self,
        collection: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> StoreResult<ListDocumentsResponse> {
        let mut url = format!("{}/{}?pageSize={}", self.base_url, collection, page_size);
        if let Some(token) = page_token {
            url = format!("{}&pageToken={}", url, urlencoding::encode(token));
        }
        self.instrumented("list_documents", collection, None, async {
            let response = self.send(|t| self.http.get(&url).bearer_auth(t)).await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                // A missing parent simply has no children
                StatusCode::NOT_FOUND => Ok(ListDocumentsResponse {
                    documents: None,
                    next_page_token: None,
                }),
                _ => Err(Self::error_from(response, &url).await),
            }
        })
        .await
    }

    /// Apply writes atomically.
    pub async fn commit(&self, writes: Vec<Write>) -> StoreResult<CommitResponse> {
        if writes.is_empty() {
            return Ok(CommitResponse {
                write_results: Some(Vec::new()),
                commit_time: None,
            });
        }
        if writes.len() > MAX_COMMIT_WRITES {
            return Err(StoreError::request_failed(format!(
                "commit of {} writes exceeds the {} write limit",
                writes.len(),
                MAX_COMMIT_WRITES
            )));
        }

        let url = format!("{}:commit", self.base_url);
        let request = CommitRequest { writes };
        self.instrumented("commit", "batch", None, async {
            let response = self
                .send(|t| self.http.post(&url).bearer_auth(t).json(&request))
                .await?;
            match response.status() {
                StatusCode::OK => Ok(response.json().await?),
                _ => Err(Self::error_from(response, &url).await),
            }
        })
        .await
    }

    /// Run a structured query against top-level collections.
    pub async fn run_query(&self, query: StructuredQuery) -> StoreResult<Vec<Document>> {
        let url = format!("{}:runQuery", self.base_url);
        let collection = query
            .from
            .first()
            .map(|c| c.collection_id.clone())
            .unwrap_or_default();
        let request = RunQueryRequest {
            structured_query: query,
        };
        self.instrumented("run_query", &collection, None, async {
            let response = self
                .send(|t| self.http.post(&url).bearer_auth(t).json(&request))
                .await?;
            match response.status() {
                StatusCode::OK => {
                    let rows: Vec<RunQueryResponse> = response.json().await?;
                    Ok(rows.into_iter().filter_map(|r| r.document).collect())
                }
                _ => Err(Self::error_from(response, &url).await),
            }
        })
        .await
    }

    async fn instrumented<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        let span = info_span!(
            "firestore_request",
            operation = %operation,
            collection = %collection,
            doc_id = doc_id.unwrap_or("")
        );

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, start.elapsed().as_millis() as f64);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_requires_project_id() {
        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIREBASE_PROJECT_ID");
        assert!(FirestoreConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_config_defaults() {
        std::env::set_var("GCP_PROJECT_ID", "test-project");
        std::env::remove_var("FIRESTORE_DATABASE_ID");
        std::env::remove_var("FIRESTORE_CONNECT_TIMEOUT_SECS");
        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.database_id, "(default)");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.timeout, Duration::from_secs(30));
        std::env::remove_var("GCP_PROJECT_ID");
    }
}
