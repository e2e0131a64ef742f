use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;

/// Trait for StatefulSet persistence
///
/// Abstracts the API server so the reconciler can run against the HTTP
/// `ApiClient` or the in-memory `MockStore`.
#[async_trait]
pub trait StatefulSetStore: Send + Sync {
    /// Fetch a StatefulSet; `Ok(None)` when it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>>;

    /// Create a StatefulSet, returning the stored object
    async fn create(&self, namespace: &str, object: &StatefulSet) -> Result<StatefulSet>;

    /// Replace a StatefulSet; rejected with a conflict when `metadata.resourceVersion` is stale
    async fn update(&self, namespace: &str, object: &StatefulSet) -> Result<StatefulSet>;
}
