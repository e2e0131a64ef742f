use crate::error::{Result, StatelyError};
use crate::params::{DefaultedParameters, StringMap};
use crate::quantity::storage_quantity;
use crate::template::{generate_containers, wants_volume_claim, EXTERNAL_CONFIG_VOLUME};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, LocalObjectReference, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PodSpec, PodTemplateSpec, Volume, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Build the desired StatefulSet from defaulted parameters
///
/// Deterministic and side-effect free apart from logging: the same input
/// always yields a structurally identical object, which keeps diffs stable
/// between reconciliation cycles. Fails only when the name or namespace is
/// empty, or when the storage size or a resource quantity is invalid.
pub fn synthesize(params: &DefaultedParameters) -> Result<StatefulSet> {
    let name = params.name();
    if name.is_empty() || params.namespace.is_empty() {
        return Err(StatelyError::validation_failed(
            "StatefulSet",
            format!(
                "name ({:?}) or namespace ({:?}) is empty",
                name, params.namespace
            ),
            "Set both metadata.name and namespace in the reconciliation parameters",
        ));
    }

    debug!(statefulset = name, namespace = %params.namespace, "Synthesizing StatefulSet");

    if params.labels.is_empty() {
        warn!(
            statefulset = name,
            namespace = %params.namespace,
            "Pod labels are empty; the selector will match nothing"
        );
    }

    let mut metadata = params.metadata.clone();
    metadata.namespace = Some(params.namespace.clone());
    if let Some(owner) = &params.owner {
        add_owner_reference(&mut metadata, owner);
    }

    let volume_claim_templates = if wants_volume_claim(params) {
        Some(vec![volume_claim_template(params)?])
    } else {
        None
    };

    let mut volumes = params.extra_volumes.clone();
    if let Some(config) = &params.additional_config {
        volumes.push(external_config_volume(config));
    }

    let image_pull_secrets = params
        .image_pull_secret
        .as_ref()
        .map(|secret| vec![LocalObjectReference { name: secret.clone().into() }]);

    Ok(StatefulSet {
        metadata,
        spec: Some(StatefulSetSpec {
            replicas: Some(params.replicas),
            // The selector must equal the template labels or the API server rejects it
            selector: LabelSelector {
                match_labels: Some(params.labels.clone()),
                ..Default::default()
            },
            service_name: name.to_string().into(),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(params.labels.clone()),
                    annotations: Some(params.annotations.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: generate_containers(params)?,
                    node_selector: Some(params.node_selector.clone()),
                    affinity: Some(params.affinity.clone()),
                    tolerations: Some(params.tolerations.clone()),
                    priority_class_name: params.priority_class_name.clone(),
                    security_context: Some(params.security_context.clone()),
                    volumes: (!volumes.is_empty()).then_some(volumes),
                    image_pull_secrets,
                    ..Default::default()
                }),
            },
            volume_claim_templates,
            ..Default::default()
        }),
        status: None,
    })
}

/// Append an owner reference unless one with the same uid is already present
pub fn add_owner_reference(metadata: &mut ObjectMeta, owner: &OwnerReference) {
    let refs = metadata.owner_references.get_or_insert_with(Vec::new);
    if !refs.iter().any(|r| r.uid == owner.uid) {
        refs.push(owner.clone());
    }
}

fn volume_claim_template(params: &DefaultedParameters) -> Result<PersistentVolumeClaim> {
    let storage = &params.storage;
    let quantity = storage_quantity(&storage.size)?;

    Ok(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(storage.name.clone()),
            labels: non_empty(&storage.labels),
            annotations: non_empty(&storage.annotations),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(storage.access_modes.clone()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), quantity)])),
                ..Default::default()
            }),
            storage_class_name: storage.storage_class_name.clone(),
            ..Default::default()
        }),
        status: None,
    })
}

fn external_config_volume(config: &str) -> Volume {
    Volume {
        name: EXTERNAL_CONFIG_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: config.to_string().into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn non_empty(map: &StringMap) -> Option<StringMap> {
    (!map.is_empty()).then(|| map.clone())
}
