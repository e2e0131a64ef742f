use crate::error::{ReconcileError, Result};
use crate::traits::StatefulSetStore;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use stately_core::ResourceKey;
use std::time::Duration;
use tracing::{debug, warn};

/// Request timeout applied when none is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Lightweight HTTP client for StatefulSets on the API server
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    client: Client,
}

/// Builder for [`ApiClient`]
#[derive(Debug, Clone)]
pub struct ApiClientBuilder {
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl ApiClientBuilder {
    /// Bearer token sent with every request
    pub fn token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.token = (!token.trim().is_empty()).then(|| token.trim().to_string());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| {
                ReconcileError::transport("build client", &self.base_url, e.to_string())
            })?;

        Ok(ApiClient {
            base_url: self.base_url.trim_end_matches('/').to_string(),
            token: self.token,
            client,
        })
    }
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            client: Client::new(),
        }
    }

    pub fn builder(base_url: impl Into<String>) -> ApiClientBuilder {
        ApiClientBuilder {
            base_url: base_url.into(),
            token: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL of a single StatefulSet
    pub fn object_url(&self, key: &ResourceKey) -> String {
        format!("{}{}", self.base_url, key.api_path())
    }

    /// Full URL of the StatefulSet collection in a namespace
    pub fn collection_url(&self, key: &ResourceKey) -> String {
        format!("{}{}", self.base_url, key.collection_path())
    }

    async fn send(&self, operation: &str, key: &ResourceKey, request: RequestBuilder) -> Result<Response> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        request
            .send()
            .await
            .map_err(|e| ReconcileError::transport(operation, key.to_string(), format!("HTTP request failed: {}", e)))
    }

    async fn parse(operation: &str, key: &ResourceKey, resp: Response) -> Result<StatefulSet> {
        resp.json::<StatefulSet>().await.map_err(|e| {
            ReconcileError::transport(
                operation,
                key.to_string(),
                format!("Failed to parse StatefulSet: {}", e),
            )
        })
    }

    async fn failure(operation: &str, key: &ResourceKey, resp: Response) -> ReconcileError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        ReconcileError::transport(
            operation,
            key.to_string(),
            format!("status {}: {}", status, body),
        )
    }
}

#[async_trait]
impl StatefulSetStore for ApiClient {
    /// GET /apis/apps/v1/namespaces/{namespace}/statefulsets/{name}
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        let key = ResourceKey::stateful_set(namespace, name);
        let url = self.object_url(&key);
        debug!("GET {}", url);

        let resp = self.send("GET", &key, self.client.get(&url)).await?;

        if resp.status() == StatusCode::NOT_FOUND {
            debug!(statefulset = %key, "StatefulSet not found");
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::failure("GET", &key, resp).await);
        }

        Self::parse("GET", &key, resp).await.map(Some)
    }

    /// POST /apis/apps/v1/namespaces/{namespace}/statefulsets
    async fn create(&self, namespace: &str, object: &StatefulSet) -> Result<StatefulSet> {
        let key = ResourceKey::stateful_set(
            namespace,
            object.metadata.name.clone().unwrap_or_default(),
        );
        let url = self.collection_url(&key);
        debug!("POST {}", url);

        let resp = self.send("POST", &key, self.client.post(&url).json(object)).await?;

        if resp.status() == StatusCode::CONFLICT {
            let body = resp.text().await.unwrap_or_default();
            warn!(statefulset = %key, "StatefulSet already exists");
            return Err(ReconcileError::conflict(key.to_string(), body));
        }
        if !resp.status().is_success() {
            return Err(Self::failure("POST", &key, resp).await);
        }

        Self::parse("POST", &key, resp).await
    }

    /// PUT /apis/apps/v1/namespaces/{namespace}/statefulsets/{name}
    async fn update(&self, namespace: &str, object: &StatefulSet) -> Result<StatefulSet> {
        let name = object.metadata.name.clone().ok_or_else(|| {
            ReconcileError::inconsistent_state("cannot update a StatefulSet without a name")
        })?;
        let key = ResourceKey::stateful_set(namespace, name);
        let url = self.object_url(&key);
        debug!("PUT {}", url);

        let resp = self.send("PUT", &key, self.client.put(&url).json(object)).await?;

        // 409 means the resourceVersion we sent is stale
        if resp.status() == StatusCode::CONFLICT {
            let body = resp.text().await.unwrap_or_default();
            warn!(statefulset = %key, "Update rejected, StatefulSet was modified concurrently");
            return Err(ReconcileError::conflict(key.to_string(), body));
        }
        if !resp.status().is_success() {
            return Err(Self::failure("PUT", &key, resp).await);
        }

        Self::parse("PUT", &key, resp).await
    }
}
