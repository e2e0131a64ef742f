use crate::error::{ReconcileError, Result};
use crate::observer::ReconcileObserver;
use crate::traits::StatefulSetStore;
use k8s_openapi::api::apps::v1::StatefulSet;
use stately_core::{synthesize, DesiredStateParameters, ResourceKey, StatelyError};
use stately_patch::{
    default_rules, Annotator, IgnoreRule, PatchEngine, PatchResult, ThreeWayPatchEngine,
    LAST_APPLIED_ANNOTATION,
};
use std::sync::Arc;
use tracing::debug;

/// Configuration for the reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Annotation holding the last-applied snapshot
    pub annotation_key: String,
    /// Subtrees excluded when comparing stored and desired objects
    pub ignore_rules: Vec<IgnoreRule>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            annotation_key: LAST_APPLIED_ANNOTATION.to_string(),
            ignore_rules: default_rules(),
        }
    }
}

impl ReconcilerConfig {
    /// Three-way patch engine writing snapshots under `annotation_key`
    pub fn patch_engine(&self) -> ThreeWayPatchEngine {
        ThreeWayPatchEngine::new(Annotator::new(&self.annotation_key))
    }
}

/// Result of one reconcile cycle
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The StatefulSet did not exist and was created
    Created,
    /// The stored StatefulSet was replaced; `patch` describes the difference
    Updated { patch: PatchResult },
    /// Nothing to do
    Unchanged,
}

/// Create-or-update state machine for one StatefulSet
///
/// Each call to [`reconcile`](Reconciler::reconcile) fetches the stored
/// object, builds the desired one and issues at most one create or update.
pub struct Reconciler {
    store: Arc<dyn StatefulSetStore>,
    engine: Arc<dyn PatchEngine>,
    observer: Arc<dyn ReconcileObserver>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn StatefulSetStore>,
        engine: Arc<dyn PatchEngine>,
        observer: Arc<dyn ReconcileObserver>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            engine,
            observer,
            config,
        }
    }

    /// Reconciler using the three-way patch engine built from `config`
    pub fn with_config(
        store: Arc<dyn StatefulSetStore>,
        observer: Arc<dyn ReconcileObserver>,
        config: ReconcilerConfig,
    ) -> Self {
        let engine = Arc::new(config.patch_engine());
        Self::new(store, engine, observer, config)
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Bring the stored StatefulSet in line with `params`
    pub async fn reconcile(&self, params: &DesiredStateParameters) -> Result<ReconcileOutcome> {
        let name = params.name();
        let namespace = params.namespace.as_str();
        let key = ResourceKey::stateful_set(namespace, name);

        // Validate before touching the store
        if name.is_empty() || namespace.is_empty() {
            let err = ReconcileError::from(StatelyError::validation_failed(
                "StatefulSet",
                format!("name '{}' and namespace '{}' must both be set", name, namespace),
                "Set metadata.name and namespace in the reconcile parameters",
            ));
            self.observer.synthesis_failed(&key, &err);
            return Err(err);
        }

        debug!(statefulset = name, namespace, "Reconciling StatefulSet");

        let stored = match self.store.get(namespace, name).await {
            Ok(stored) => stored,
            Err(e) => {
                self.observer.fetch_failed(&key, &e);
                return Err(e);
            }
        };

        let desired = match synthesize(&params.with_defaults()) {
            Ok(desired) => desired,
            Err(e) => {
                let err = ReconcileError::from(e);
                self.observer.synthesis_failed(&key, &err);
                return Err(err);
            }
        };

        match stored {
            None => self.create(&key, desired).await,
            Some(stored) => self.update(&key, stored, desired).await,
        }
    }

    async fn create(&self, key: &ResourceKey, mut desired: StatefulSet) -> Result<ReconcileOutcome> {
        self.snapshot(key, &mut desired)?;

        self.observer.creating(key);
        let created = match self.store.create(&key.namespace, &desired).await {
            Ok(created) => created,
            Err(e) => {
                self.observer.create_failed(key, &e);
                return Err(e);
            }
        };
        self.observer.created(key, &created);

        Ok(ReconcileOutcome::Created)
    }

    async fn update(
        &self,
        key: &ResourceKey,
        stored: StatefulSet,
        mut desired: StatefulSet,
    ) -> Result<ReconcileOutcome> {
        copy_store_owned_fields(&stored, &mut desired);

        let patch = match self
            .engine
            .calculate(&stored, &desired, &self.config.ignore_rules)
        {
            Ok(patch) => patch,
            Err(e) => {
                let err = ReconcileError::from(e);
                self.observer.patch_failed(key, &err);
                return Err(err);
            }
        };
        if patch.is_empty() {
            self.observer.unchanged(key);
            return Ok(ReconcileOutcome::Unchanged);
        }

        carry_forward_annotations(&stored, &mut desired);
        self.snapshot(key, &mut desired)?;

        self.observer.updating(key, &patch);
        let updated = match self.store.update(&key.namespace, &desired).await {
            Ok(updated) => updated,
            Err(e) => {
                self.observer.update_failed(key, &e);
                return Err(e);
            }
        };
        self.observer.updated(key, &updated);

        Ok(ReconcileOutcome::Updated { patch })
    }

    /// Record `desired` as the last-applied snapshot on itself
    fn snapshot(&self, key: &ResourceKey, desired: &mut StatefulSet) -> Result<()> {
        self.engine.set_last_applied(desired).map_err(|e| {
            let err = ReconcileError::from(e);
            self.observer.patch_failed(key, &err);
            err
        })
    }
}

/// Copy the fields only the store may author from `stored` into `desired`
pub fn copy_store_owned_fields(stored: &StatefulSet, desired: &mut StatefulSet) {
    desired.metadata.resource_version = stored.metadata.resource_version.clone();
    desired.metadata.creation_timestamp = stored.metadata.creation_timestamp.clone();
    desired.metadata.managed_fields = stored.metadata.managed_fields.clone();
}

/// Keep annotations other writers put on the stored object
///
/// Annotations the desired object sets itself take precedence.
pub fn carry_forward_annotations(stored: &StatefulSet, desired: &mut StatefulSet) {
    let Some(existing) = stored.metadata.annotations.as_ref() else {
        return;
    };

    let annotations = desired.metadata.annotations.get_or_insert_with(Default::default);
    for (key, value) in existing {
        annotations
            .entry(key.clone())
            .or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockStore, StoreOperation};
    use crate::observer::{ReconcileEvent, RecordingObserver};
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use serde_json::{json, Value};
    use std::collections::BTreeMap;

    fn make_params(replicas: Option<i32>) -> DesiredStateParameters {
        let mut params = DesiredStateParameters::default();
        params.metadata.name = Some("db-0".to_string());
        params.namespace = "ns".to_string();
        params.replicas = replicas;
        params.labels = Some(BTreeMap::from([("app".to_string(), "db".to_string())]));
        params.container.image = "mongo:7.0".to_string();
        params.container.persistence_enabled = Some(true);
        params.storage.size = Some("10Gi".to_string());
        params
    }

    fn make_reconciler() -> (Arc<MockStore>, Arc<RecordingObserver>, Reconciler) {
        let store = Arc::new(MockStore::new());
        let observer = Arc::new(RecordingObserver::new());
        let reconciler = Reconciler::with_config(
            store.clone(),
            observer.clone(),
            ReconcilerConfig::default(),
        );
        (store, observer, reconciler)
    }

    #[tokio::test]
    async fn test_absent_statefulset_is_created_with_snapshot() {
        let (store, observer, reconciler) = make_reconciler();

        let outcome = reconciler.reconcile(&make_params(Some(3))).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);
        assert_eq!(store.calls(StoreOperation::Create), 1);
        assert_eq!(store.calls(StoreOperation::Update), 0);

        let stored = store.peek("ns", "db-0").await.unwrap();
        let annotations = stored.metadata.annotations.unwrap();
        let snapshot: Value =
            serde_json::from_str(annotations.get(LAST_APPLIED_ANNOTATION).unwrap()).unwrap();
        assert_eq!(snapshot.pointer("/spec/replicas"), Some(&json!(3)));

        assert_eq!(
            observer.events(),
            vec![ReconcileEvent::Creating, ReconcileEvent::Created]
        );
    }

    #[tokio::test]
    async fn test_second_reconcile_is_a_no_op() {
        let (store, observer, reconciler) = make_reconciler();
        let params = make_params(Some(3));

        reconciler.reconcile(&params).await.unwrap();
        let outcome = reconciler.reconcile(&params).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert_eq!(store.mutations(), 1);
        assert_eq!(store.calls(StoreOperation::Get), 2);
        assert_eq!(observer.events().last(), Some(&ReconcileEvent::Unchanged));
    }

    #[tokio::test]
    async fn test_defaulted_parameters_are_stable_across_cycles() {
        let (store, _observer, reconciler) = make_reconciler();
        let mut params = make_params(None);
        params.storage.size = Some(String::new());

        reconciler.reconcile(&params).await.unwrap();
        let outcome = reconciler.reconcile(&params).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);

        let stored = store.peek("ns", "db-0").await.unwrap();
        let spec = stored.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let claim = &spec.volume_claim_templates.unwrap()[0];
        let requests = claim
            .spec
            .as_ref()
            .and_then(|s| s.resources.as_ref())
            .and_then(|r| r.requests.as_ref())
            .unwrap();
        assert_eq!(requests.get("storage").map(|q| q.0.as_str()), Some("1Gi"));
    }

    #[tokio::test]
    async fn test_replica_change_updates_with_stored_version() {
        let (store, observer, reconciler) = make_reconciler();
        reconciler.reconcile(&make_params(Some(3))).await.unwrap();
        let before = store.peek("ns", "db-0").await.unwrap();

        let outcome = reconciler.reconcile(&make_params(Some(5))).await.unwrap();
        let patch = match outcome {
            ReconcileOutcome::Updated { patch } => patch,
            other => panic!("expected an update, got {:?}", other),
        };
        let patch: Value = serde_json::from_slice(&patch.patch).unwrap();
        assert_eq!(patch, json!({"spec": {"replicas": 5}}));

        // The mock rejects a stale resourceVersion, so success means it was carried
        assert_eq!(store.calls(StoreOperation::Update), 1);
        assert_eq!(store.mutations(), 2);

        let after = store.peek("ns", "db-0").await.unwrap();
        assert_eq!(after.spec.as_ref().unwrap().replicas, Some(5));
        assert_eq!(after.metadata.creation_timestamp, before.metadata.creation_timestamp);
        assert_eq!(after.metadata.uid, before.metadata.uid);

        assert!(matches!(
            observer.events().as_slice(),
            [.., ReconcileEvent::Updating(_), ReconcileEvent::Updated]
        ));
    }

    #[tokio::test]
    async fn test_update_preserves_external_annotations() {
        let (store, _observer, reconciler) = make_reconciler();
        reconciler.reconcile(&make_params(Some(3))).await.unwrap();

        let mut stored = store.peek("ns", "db-0").await.unwrap();
        stored
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert("backup.example.com/schedule".to_string(), "daily".to_string());
        store.insert("ns", stored).await;

        reconciler.reconcile(&make_params(Some(4))).await.unwrap();

        let after = store.peek("ns", "db-0").await.unwrap();
        let annotations = after.metadata.annotations.unwrap();
        assert_eq!(
            annotations.get("backup.example.com/schedule").map(String::as_str),
            Some("daily")
        );

        let snapshot: Value =
            serde_json::from_str(annotations.get(LAST_APPLIED_ANNOTATION).unwrap()).unwrap();
        assert_eq!(snapshot.pointer("/spec/replicas"), Some(&json!(4)));
    }

    #[tokio::test]
    async fn test_empty_name_fails_before_store_is_contacted() {
        let (store, observer, reconciler) = make_reconciler();
        let mut params = make_params(Some(3));
        params.metadata.name = None;

        let err = reconciler.reconcile(&params).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.calls(StoreOperation::Get), 0);
        assert_eq!(store.mutations(), 0);
        assert_eq!(observer.events(), vec![ReconcileEvent::SynthesisFailed]);
    }

    #[tokio::test]
    async fn test_empty_namespace_fails_before_store_is_contacted() {
        let (store, _observer, reconciler) = make_reconciler();
        let mut params = make_params(Some(3));
        params.namespace = String::new();

        assert!(reconciler.reconcile(&params).await.unwrap_err().is_validation());
        assert_eq!(store.calls(StoreOperation::Get), 0);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_without_mutation() {
        let (store, observer, reconciler) = make_reconciler();
        store.fail_on(StoreOperation::Get, "connection refused").await;

        let err = reconciler.reconcile(&make_params(Some(3))).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Transport { .. }));
        assert_eq!(store.mutations(), 0);
        assert_eq!(observer.events(), vec![ReconcileEvent::FetchFailed]);
    }

    #[tokio::test]
    async fn test_invalid_storage_size_is_a_synthesis_failure() {
        let (store, observer, reconciler) = make_reconciler();
        let mut params = make_params(Some(3));
        params.storage.size = Some("ten gigs".to_string());

        let err = reconciler.reconcile(&params).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.calls(StoreOperation::Get), 1);
        assert_eq!(store.mutations(), 0);
        assert_eq!(observer.events(), vec![ReconcileEvent::SynthesisFailed]);
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_a_patch_failure() {
        let (store, observer, reconciler) = make_reconciler();
        reconciler.reconcile(&make_params(Some(3))).await.unwrap();

        let mut stored = store.peek("ns", "db-0").await.unwrap();
        stored
            .metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(LAST_APPLIED_ANNOTATION.to_string(), "not json".to_string());
        store.insert("ns", stored).await;

        let err = reconciler.reconcile(&make_params(Some(3))).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Patch(_)));
        assert_eq!(store.mutations(), 1);
        assert_eq!(observer.events().last(), Some(&ReconcileEvent::PatchFailed));
    }

    #[tokio::test]
    async fn test_create_and_update_failures_propagate() {
        let (store, observer, reconciler) = make_reconciler();
        store.fail_on(StoreOperation::Create, "forbidden").await;

        let err = reconciler.reconcile(&make_params(Some(3))).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Transport { .. }));
        assert_eq!(
            observer.events(),
            vec![ReconcileEvent::Creating, ReconcileEvent::CreateFailed]
        );

        store.clear_failures().await;
        reconciler.reconcile(&make_params(Some(3))).await.unwrap();

        store.fail_on(StoreOperation::Update, "etcd unavailable").await;
        let err = reconciler.reconcile(&make_params(Some(5))).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Transport { .. }));
        assert!(matches!(
            observer.events().as_slice(),
            [.., ReconcileEvent::Updating(_), ReconcileEvent::UpdateFailed]
        ));
        assert_eq!(
            store.peek("ns", "db-0").await.unwrap().spec.unwrap().replicas,
            Some(3)
        );
    }

    #[tokio::test]
    async fn test_update_submits_store_owned_fields() {
        let (store, _observer, reconciler) = make_reconciler();
        reconciler.reconcile(&make_params(Some(3))).await.unwrap();
        let stored = store.peek("ns", "db-0").await.unwrap();

        reconciler.reconcile(&make_params(Some(5))).await.unwrap();

        let submitted = store.last_submitted(StoreOperation::Update).await.unwrap();
        assert!(submitted.metadata.creation_timestamp.is_some());
        assert!(submitted.metadata.managed_fields.is_some());
        assert_eq!(submitted.metadata.resource_version, stored.metadata.resource_version);
        assert_eq!(
            submitted.metadata.creation_timestamp,
            stored.metadata.creation_timestamp
        );
        assert_eq!(submitted.metadata.managed_fields, stored.metadata.managed_fields);
    }

    #[tokio::test]
    async fn test_canonical_quantities_echoed_by_store_are_unchanged() {
        let (store, observer, reconciler) = make_reconciler();
        let mut params = make_params(Some(3));
        params.storage.size = Some("1024Mi".to_string());
        params.container.resources = Some(ResourceRequirements {
            limits: Some(BTreeMap::from([(
                "memory".to_string(),
                Quantity("2048Mi".to_string()),
            )])),
            requests: Some(BTreeMap::from([("cpu".to_string(), Quantity("0.5".to_string()))])),
            ..Default::default()
        });
        reconciler.reconcile(&params).await.unwrap();

        // What the API server hands back: every quantity in canonical form
        let mut stored = store.peek("ns", "db-0").await.unwrap();
        let spec = stored.spec.as_mut().unwrap();
        let claim = &mut spec.volume_claim_templates.as_mut().unwrap()[0];
        claim.spec.as_mut().unwrap().resources.as_mut().unwrap().requests = Some(BTreeMap::from(
            [("storage".to_string(), Quantity("1Gi".to_string()))],
        ));
        let container = &mut spec.template.spec.as_mut().unwrap().containers[0];
        container.resources = Some(ResourceRequirements {
            limits: Some(BTreeMap::from([("memory".to_string(), Quantity("2Gi".to_string()))])),
            requests: Some(BTreeMap::from([("cpu".to_string(), Quantity("500m".to_string()))])),
            ..Default::default()
        });
        store.insert("ns", stored).await;

        let outcome = reconciler.reconcile(&params).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert_eq!(store.mutations(), 1);
        assert_eq!(observer.events().last(), Some(&ReconcileEvent::Unchanged));
    }

    #[tokio::test]
    async fn test_custom_annotation_key() {
        let store = Arc::new(MockStore::without_server_defaults());
        let config = ReconcilerConfig {
            annotation_key: "example.com/applied".to_string(),
            ..Default::default()
        };
        let reconciler =
            Reconciler::with_config(store.clone(), Arc::new(RecordingObserver::new()), config);

        reconciler.reconcile(&make_params(Some(2))).await.unwrap();
        let annotations = store.peek("ns", "db-0").await.unwrap().metadata.annotations.unwrap();
        assert!(annotations.contains_key("example.com/applied"));
        assert!(!annotations.contains_key(LAST_APPLIED_ANNOTATION));
    }

    #[test]
    fn test_copy_store_owned_fields() {
        let mut stored = StatefulSet::default();
        stored.metadata.resource_version = Some("41".to_string());
        stored.metadata.creation_timestamp = Some(Time(chrono::Utc::now()));
        stored.metadata.managed_fields = Some(vec![Default::default()]);
        let mut desired = StatefulSet::default();

        copy_store_owned_fields(&stored, &mut desired);
        assert_eq!(desired.metadata.resource_version.as_deref(), Some("41"));
        assert_eq!(
            desired.metadata.creation_timestamp,
            stored.metadata.creation_timestamp
        );
        assert_eq!(desired.metadata.managed_fields.map(|f| f.len()), Some(1));
    }

    #[test]
    fn test_desired_annotations_win_over_stored() {
        let mut stored = StatefulSet::default();
        stored.metadata.annotations = Some(BTreeMap::from([
            ("owner".to_string(), "old".to_string()),
            ("extra".to_string(), "kept".to_string()),
        ]));
        let mut desired = StatefulSet::default();
        desired.metadata.annotations =
            Some(BTreeMap::from([("owner".to_string(), "new".to_string())]));

        carry_forward_annotations(&stored, &mut desired);
        let annotations = desired.metadata.annotations.unwrap();
        assert_eq!(annotations.get("owner").map(String::as_str), Some("new"));
        assert_eq!(annotations.get("extra").map(String::as_str), Some("kept"));
    }
}
