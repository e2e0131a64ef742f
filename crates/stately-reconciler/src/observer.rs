use crate::error::ReconcileError;
use k8s_openapi::api::apps::v1::StatefulSet;
use stately_core::ResourceKey;
use stately_patch::PatchResult;
use std::sync::Mutex;
use tracing::{error, info};

/// Progress notifications emitted during a reconcile cycle
pub trait ReconcileObserver: Send + Sync {
    /// The StatefulSet is absent and is about to be created
    fn creating(&self, key: &ResourceKey);

    fn created(&self, key: &ResourceKey, object: &StatefulSet);

    fn create_failed(&self, key: &ResourceKey, error: &ReconcileError);

    /// The stored StatefulSet differs and is about to be replaced
    fn updating(&self, key: &ResourceKey, patch: &PatchResult);

    fn updated(&self, key: &ResourceKey, object: &StatefulSet);

    fn update_failed(&self, key: &ResourceKey, error: &ReconcileError);

    /// The stored StatefulSet already matches
    fn unchanged(&self, key: &ResourceKey);

    fn fetch_failed(&self, key: &ResourceKey, error: &ReconcileError);

    fn synthesis_failed(&self, key: &ResourceKey, error: &ReconcileError);

    /// The patch or the last-applied snapshot could not be computed
    fn patch_failed(&self, key: &ResourceKey, error: &ReconcileError);
}

/// Observer writing every notification as a tracing event
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

fn resource_version(object: &StatefulSet) -> &str {
    object.metadata.resource_version.as_deref().unwrap_or("")
}

impl ReconcileObserver for TracingObserver {
    fn creating(&self, key: &ResourceKey) {
        info!(
            statefulset = %key.name,
            namespace = %key.namespace,
            "StatefulSet not found, creating"
        );
    }

    fn created(&self, key: &ResourceKey, object: &StatefulSet) {
        info!(
            statefulset = %key.name,
            namespace = %key.namespace,
            resource_version = resource_version(object),
            "StatefulSet created"
        );
    }

    fn create_failed(&self, key: &ResourceKey, err: &ReconcileError) {
        error!(
            statefulset = %key.name,
            namespace = %key.namespace,
            error = %err,
            "StatefulSet creation failed"
        );
    }

    fn updating(&self, key: &ResourceKey, patch: &PatchResult) {
        info!(
            statefulset = %key.name,
            namespace = %key.namespace,
            patch = patch.patch_str(),
            "StatefulSet differs from desired state, updating"
        );
    }

    fn updated(&self, key: &ResourceKey, object: &StatefulSet) {
        info!(
            statefulset = %key.name,
            namespace = %key.namespace,
            resource_version = resource_version(object),
            "StatefulSet updated"
        );
    }

    fn update_failed(&self, key: &ResourceKey, err: &ReconcileError) {
        error!(
            statefulset = %key.name,
            namespace = %key.namespace,
            error = %err,
            "StatefulSet update failed"
        );
    }

    fn unchanged(&self, key: &ResourceKey) {
        info!(
            statefulset = %key.name,
            namespace = %key.namespace,
            "No changes required"
        );
    }

    fn fetch_failed(&self, key: &ResourceKey, err: &ReconcileError) {
        error!(
            statefulset = %key.name,
            namespace = %key.namespace,
            error = %err,
            "Failed to fetch StatefulSet"
        );
    }

    fn synthesis_failed(&self, key: &ResourceKey, err: &ReconcileError) {
        error!(
            statefulset = %key.name,
            namespace = %key.namespace,
            error = %err,
            "Failed to build desired StatefulSet"
        );
    }

    fn patch_failed(&self, key: &ResourceKey, err: &ReconcileError) {
        error!(
            statefulset = %key.name,
            namespace = %key.namespace,
            error = %err,
            "Unable to compute StatefulSet patch"
        );
    }
}

/// A notification captured by [`RecordingObserver`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileEvent {
    Creating,
    Created,
    CreateFailed,
    /// Carries the merge patch as JSON text
    Updating(String),
    Updated,
    UpdateFailed,
    Unchanged,
    FetchFailed,
    SynthesisFailed,
    PatchFailed,
}

/// Observer that keeps every notification in memory
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ReconcileEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ReconcileEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: ReconcileEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ReconcileObserver for RecordingObserver {
    fn creating(&self, _key: &ResourceKey) {
        self.push(ReconcileEvent::Creating);
    }

    fn created(&self, _key: &ResourceKey, _object: &StatefulSet) {
        self.push(ReconcileEvent::Created);
    }

    fn create_failed(&self, _key: &ResourceKey, _error: &ReconcileError) {
        self.push(ReconcileEvent::CreateFailed);
    }

    fn updating(&self, _key: &ResourceKey, patch: &PatchResult) {
        self.push(ReconcileEvent::Updating(patch.patch_str().to_string()));
    }

    fn updated(&self, _key: &ResourceKey, _object: &StatefulSet) {
        self.push(ReconcileEvent::Updated);
    }

    fn update_failed(&self, _key: &ResourceKey, _error: &ReconcileError) {
        self.push(ReconcileEvent::UpdateFailed);
    }

    fn unchanged(&self, _key: &ResourceKey) {
        self.push(ReconcileEvent::Unchanged);
    }

    fn fetch_failed(&self, _key: &ResourceKey, _error: &ReconcileError) {
        self.push(ReconcileEvent::FetchFailed);
    }

    fn synthesis_failed(&self, _key: &ResourceKey, _error: &ReconcileError) {
        self.push(ReconcileEvent::SynthesisFailed);
    }

    fn patch_failed(&self, _key: &ResourceKey, _error: &ReconcileError) {
        self.push(ReconcileEvent::PatchFailed);
    }
}
