use crate::error::{ReconcileError, Result};
use crate::traits::StatefulSetStore;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{
    RollingUpdateStatefulSetStrategy, StatefulSet, StatefulSetStatus, StatefulSetUpdateStrategy,
};
use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ManagedFieldsEntry, Time};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Store call kinds, for counters and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    Get,
    Create,
    Update,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOperation::Get => write!(f, "GET"),
            StoreOperation::Create => write!(f, "POST"),
            StoreOperation::Update => write!(f, "PUT"),
        }
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    get: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
}

impl CallCounters {
    fn counter(&self, op: StoreOperation) -> &AtomicUsize {
        match op {
            StoreOperation::Get => &self.get,
            StoreOperation::Create => &self.create,
            StoreOperation::Update => &self.update,
        }
    }
}

/// In-memory StatefulSet store
///
/// Behaves like the API server for the parts the reconciler relies on:
/// assigns uid, resourceVersion, creationTimestamp and managedFields,
/// rejects updates carrying a stale resourceVersion and, unless disabled,
/// fills in the defaults the server adds to every StatefulSet.
pub struct MockStore {
    objects: Arc<RwLock<HashMap<String, StatefulSet>>>,
    next_version: AtomicUsize,
    calls: CallCounters,
    failures: Arc<RwLock<HashMap<StoreOperation, String>>>,
    submitted: Arc<RwLock<HashMap<StoreOperation, StatefulSet>>>,
    server_defaults: bool,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            next_version: AtomicUsize::new(1),
            calls: CallCounters::default(),
            failures: Arc::new(RwLock::new(HashMap::new())),
            submitted: Arc::new(RwLock::new(HashMap::new())),
            server_defaults: true,
        }
    }

    /// Store objects exactly as submitted, apart from store-owned metadata
    pub fn without_server_defaults() -> Self {
        Self {
            server_defaults: false,
            ..Self::new()
        }
    }

    fn key(namespace: &str, name: &str) -> String {
        format!("{}/{}", namespace, name)
    }

    /// Place an object in the store without going through `create`
    pub async fn insert(&self, namespace: &str, object: StatefulSet) {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.objects
            .write()
            .await
            .insert(Self::key(namespace, &name), object);
    }

    /// Read an object without counting a call
    pub async fn peek(&self, namespace: &str, name: &str) -> Option<StatefulSet> {
        self.objects
            .read()
            .await
            .get(&Self::key(namespace, name))
            .cloned()
    }

    /// Make every subsequent `op` fail with a transport error
    pub async fn fail_on(&self, op: StoreOperation, message: impl Into<String>) {
        self.failures.write().await.insert(op, message.into());
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// Number of calls made for `op`, including failed ones
    pub fn calls(&self, op: StoreOperation) -> usize {
        self.calls.counter(op).load(Ordering::SeqCst)
    }

    /// The object most recently handed to `op`, before the store touched it
    pub async fn last_submitted(&self, op: StoreOperation) -> Option<StatefulSet> {
        self.submitted.read().await.get(&op).cloned()
    }

    /// Number of create and update calls
    pub fn mutations(&self) -> usize {
        self.calls(StoreOperation::Create) + self.calls(StoreOperation::Update)
    }

    async fn record(&self, op: StoreOperation, namespace: &str, name: &str) -> Result<()> {
        self.calls.counter(op).fetch_add(1, Ordering::SeqCst);
        match self.failures.read().await.get(&op) {
            Some(message) => Err(ReconcileError::transport(
                op.to_string(),
                stately_core::ResourceKey::stateful_set(namespace, name).to_string(),
                message.clone(),
            )),
            None => Ok(()),
        }
    }

    fn next_resource_version(&self) -> String {
        self.next_version.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn stamp(&self, object: &mut StatefulSet, operation: &str) {
        object.metadata.resource_version = Some(self.next_resource_version());
        object.metadata.managed_fields = Some(vec![ManagedFieldsEntry {
            manager: Some("stately".to_string()),
            operation: Some(operation.to_string()),
            api_version: Some("apps/v1".to_string()),
            time: Some(Time(chrono::Utc::now())),
            ..Default::default()
        }]);
    }

    /// Fill in what the API server adds to a submitted StatefulSet
    fn apply_server_defaults(object: &mut StatefulSet) {
        let replicas = object.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        object.status = Some(StatefulSetStatus {
            replicas,
            ..Default::default()
        });

        let Some(spec) = object.spec.as_mut() else {
            return;
        };
        spec.replicas.get_or_insert(1);
        spec.revision_history_limit.get_or_insert(10);
        spec.pod_management_policy
            .get_or_insert_with(|| "OrderedReady".to_string());
        spec.update_strategy
            .get_or_insert_with(|| StatefulSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateStatefulSetStrategy {
                    partition: Some(0),
                    ..Default::default()
                }),
            });

        if let Some(pod) = spec.template.spec.as_mut() {
            pod.restart_policy.get_or_insert_with(|| "Always".to_string());
            pod.dns_policy.get_or_insert_with(|| "ClusterFirst".to_string());
            pod.scheduler_name
                .get_or_insert_with(|| "default-scheduler".to_string());
            pod.termination_grace_period_seconds.get_or_insert(30);
            for container in &mut pod.containers {
                container
                    .termination_message_path
                    .get_or_insert_with(|| "/dev/termination-log".to_string());
                container
                    .termination_message_policy
                    .get_or_insert_with(|| "File".to_string());
                container
                    .image_pull_policy
                    .get_or_insert_with(|| "IfNotPresent".to_string());
            }
        }

        for claim in spec.volume_claim_templates.iter_mut().flatten() {
            if let Some(claim_spec) = claim.spec.as_mut() {
                claim_spec
                    .volume_mode
                    .get_or_insert_with(|| "Filesystem".to_string());
            }
            claim.status.get_or_insert_with(|| PersistentVolumeClaimStatus {
                phase: Some("Pending".to_string()),
                ..Default::default()
            });
        }
    }
}

#[async_trait]
impl StatefulSetStore for MockStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<StatefulSet>> {
        self.record(StoreOperation::Get, namespace, name).await?;
        let found = self.peek(namespace, name).await;
        debug!("Mock: get {}/{} found={}", namespace, name, found.is_some());
        Ok(found)
    }

    async fn create(&self, namespace: &str, object: &StatefulSet) -> Result<StatefulSet> {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.record(StoreOperation::Create, namespace, &name).await?;
        self.submitted
            .write()
            .await
            .insert(StoreOperation::Create, object.clone());

        let mut objects = self.objects.write().await;
        let key = Self::key(namespace, &name);
        if objects.contains_key(&key) {
            return Err(ReconcileError::conflict(
                key,
                "StatefulSet already exists",
            ));
        }

        let mut stored = object.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.uid = Some(uuid::Uuid::new_v4().to_string());
        stored.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        stored.metadata.generation = Some(1);
        self.stamp(&mut stored, "Update");
        if self.server_defaults {
            Self::apply_server_defaults(&mut stored);
        }

        objects.insert(key.clone(), stored.clone());
        debug!("Mock: StatefulSet created: {}", key);
        Ok(stored)
    }

    async fn update(&self, namespace: &str, object: &StatefulSet) -> Result<StatefulSet> {
        let name = object.metadata.name.clone().unwrap_or_default();
        self.record(StoreOperation::Update, namespace, &name).await?;
        self.submitted
            .write()
            .await
            .insert(StoreOperation::Update, object.clone());

        let mut objects = self.objects.write().await;
        let key = Self::key(namespace, &name);
        let existing = objects.get(&key).ok_or_else(|| {
            ReconcileError::inconsistent_state(format!("StatefulSet {} does not exist", key))
        })?;

        if object.metadata.resource_version != existing.metadata.resource_version {
            return Err(ReconcileError::conflict(
                key,
                format!(
                    "resourceVersion {:?} does not match stored {:?}",
                    object.metadata.resource_version, existing.metadata.resource_version
                ),
            ));
        }

        let mut stored = object.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        stored.metadata.uid = existing.metadata.uid.clone();
        stored.metadata.creation_timestamp = existing.metadata.creation_timestamp.clone();
        let spec_changed = stored.spec != existing.spec;
        stored.metadata.generation = existing
            .metadata
            .generation
            .map(|g| if spec_changed { g + 1 } else { g });
        self.stamp(&mut stored, "Update");
        if self.server_defaults {
            Self::apply_server_defaults(&mut stored);
        }

        objects.insert(key.clone(), stored.clone());
        debug!("Mock: StatefulSet updated: {}", key);
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetSpec;
    use k8s_openapi::api::core::v1::{Container, PodSpec};

    fn make_test_sts(name: &str) -> StatefulSet {
        let mut sts = StatefulSet::default();
        sts.metadata.name = Some(name.to_string());
        sts.spec = Some(StatefulSetSpec {
            replicas: Some(3),
            ..Default::default()
        });
        sts.spec.as_mut().unwrap().template.spec = Some(PodSpec {
            containers: vec![Container {
                name: "db".to_string(),
                image: Some("mongo:7.0".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        });
        sts
    }

    #[tokio::test]
    async fn test_create_assigns_store_owned_fields() {
        let store = MockStore::new();
        let created = store.create("ns", &make_test_sts("db-0")).await.unwrap();

        assert!(created.metadata.uid.is_some());
        assert!(created.metadata.creation_timestamp.is_some());
        assert!(created.metadata.managed_fields.is_some());
        assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
        assert_eq!(created.metadata.namespace.as_deref(), Some("ns"));

        let spec = created.spec.unwrap();
        assert_eq!(spec.revision_history_limit, Some(10));
        let pod = spec.template.spec.unwrap();
        assert_eq!(
            pod.containers[0].termination_message_path.as_deref(),
            Some("/dev/termination-log")
        );
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let store = MockStore::new();
        assert!(store.get("ns", "nope").await.unwrap().is_none());
        assert_eq!(store.calls(StoreOperation::Get), 1);
    }

    #[tokio::test]
    async fn test_duplicate_create_is_conflict() {
        let store = MockStore::new();
        store.create("ns", &make_test_sts("db-0")).await.unwrap();
        let err = store.create("ns", &make_test_sts("db-0")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_requires_current_resource_version() {
        let store = MockStore::new();
        let created = store.create("ns", &make_test_sts("db-0")).await.unwrap();

        let mut stale = created.clone();
        stale.metadata.resource_version = Some("0".to_string());
        let err = store.update("ns", &stale).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Conflict { .. }));

        let mut fresh = created.clone();
        fresh.spec.as_mut().unwrap().replicas = Some(5);
        let updated = store.update("ns", &fresh).await.unwrap();
        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_eq!(updated.metadata.generation, Some(2));
        assert_ne!(updated.metadata.resource_version, created.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_last_submitted_is_the_unmodified_request() {
        let store = MockStore::new();
        assert!(store.last_submitted(StoreOperation::Create).await.is_none());

        let created = store.create("ns", &make_test_sts("db-0")).await.unwrap();
        let submitted = store.last_submitted(StoreOperation::Create).await.unwrap();
        assert!(submitted.metadata.uid.is_none());
        assert!(submitted.status.is_none());

        let mut stale = created.clone();
        stale.metadata.creation_timestamp = None;
        stale.metadata.resource_version = Some("0".to_string());
        assert!(store.update("ns", &stale).await.is_err());

        let submitted = store.last_submitted(StoreOperation::Update).await.unwrap();
        assert!(submitted.metadata.creation_timestamp.is_none());
        assert_eq!(submitted.metadata.resource_version.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_update_missing_object() {
        let store = MockStore::new();
        let err = store.update("ns", &make_test_sts("db-0")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::InconsistentState { .. }));
    }

    #[tokio::test]
    async fn test_injected_failures_are_counted() {
        let store = MockStore::new();
        store.fail_on(StoreOperation::Get, "connection reset").await;

        let err = store.get("ns", "db-0").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Transport { .. }));
        assert_eq!(store.calls(StoreOperation::Get), 1);

        store.clear_failures().await;
        assert!(store.get("ns", "db-0").await.is_ok());
    }

    #[tokio::test]
    async fn test_without_server_defaults() {
        let store = MockStore::without_server_defaults();
        let created = store.create("ns", &make_test_sts("db-0")).await.unwrap();
        assert!(created.status.is_none());
        assert!(created.spec.unwrap().revision_history_limit.is_none());
        assert_eq!(store.mutations(), 1);
    }
}
