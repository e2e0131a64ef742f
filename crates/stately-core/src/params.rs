use crate::error::{Result, StatelyError};
use k8s_openapi::api::core::v1::{
    Affinity, ContainerPort, EnvVar, PodSecurityContext, ResourceRequirements, Toleration, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Storage size applied when the caller leaves it unset
pub const DEFAULT_STORAGE_SIZE: &str = "1Gi";

/// Access mode applied when the caller lists none
pub const DEFAULT_ACCESS_MODE: &str = "ReadWriteOnce";

pub type StringMap = BTreeMap<String, String>;

/// Reconciliation request for one StatefulSet
///
/// Every field the caller may leave out is an `Option`; [`with_defaults`]
/// turns this into a [`DefaultedParameters`] where nothing is left unset.
///
/// [`with_defaults`]: DesiredStateParameters::with_defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DesiredStateParameters {
    /// Metadata of the StatefulSet itself (name, labels, annotations)
    pub metadata: ObjectMeta,
    pub namespace: String,
    /// Parent resource, for cascading deletion
    pub owner: Option<OwnerReference>,
    pub container: ContainerParameters,
    /// Pod labels, also used verbatim as the selector
    pub labels: Option<StringMap>,
    /// Pod template annotations
    pub annotations: Option<StringMap>,
    pub replicas: Option<i32>,
    pub storage: StorageParameters,
    pub extra_volumes: Option<Vec<Volume>>,
    pub image_pull_secret: Option<String>,
    pub affinity: Option<Affinity>,
    pub node_selector: Option<StringMap>,
    pub tolerations: Option<Vec<Toleration>>,
    pub priority_class_name: Option<String>,
    /// Name of a ConfigMap mounted as external configuration
    pub additional_config: Option<String>,
    pub security_context: Option<PodSecurityContext>,
}

/// Inputs for the database container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContainerParameters {
    pub image: String,
    pub image_pull_policy: Option<String>,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub env: Option<Vec<EnvVar>>,
    pub ports: Option<Vec<ContainerPort>>,
    pub resources: Option<ResourceRequirements>,
    /// Request a volume claim template and mount it into the container
    pub persistence_enabled: Option<bool>,
    /// Where the data volume is mounted (default `/data`)
    pub data_mount_path: Option<String>,
    /// Where the external configuration is mounted (default `/etc/config`)
    pub config_mount_path: Option<String>,
}

/// Inputs for the volume claim template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageParameters {
    pub name: String,
    pub labels: Option<StringMap>,
    pub annotations: Option<StringMap>,
    pub access_modes: Option<Vec<String>>,
    pub storage_class_name: Option<String>,
    /// Requested size as a Kubernetes quantity, e.g. "10Gi"
    pub size: Option<String>,
}

/// Parameters after defaulting: every optional input has a concrete value
///
/// Only true references (pull secret, configuration, storage class, priority
/// class, owner) stay optional, since "absent" is meaningful for them.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultedParameters {
    /// Metadata with `labels` and `annotations` always present
    pub metadata: ObjectMeta,
    pub namespace: String,
    pub owner: Option<OwnerReference>,
    /// Container inputs, with `persistence_enabled` always `Some`
    pub container: ContainerParameters,
    /// Whether a volume claim template is generated and mounted
    pub persistence_enabled: bool,
    pub labels: StringMap,
    pub annotations: StringMap,
    pub replicas: i32,
    pub storage: DefaultedStorage,
    pub extra_volumes: Vec<Volume>,
    pub image_pull_secret: Option<String>,
    pub affinity: Affinity,
    pub node_selector: StringMap,
    pub tolerations: Vec<Toleration>,
    pub priority_class_name: Option<String>,
    pub additional_config: Option<String>,
    pub security_context: PodSecurityContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefaultedStorage {
    pub name: String,
    pub labels: StringMap,
    pub annotations: StringMap,
    pub access_modes: Vec<String>,
    pub storage_class_name: Option<String>,
    pub size: String,
}

impl DesiredStateParameters {
    /// StatefulSet name, empty when unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Load parameters from a YAML or JSON file
    ///
    /// Files ending in `.json` are parsed as JSON, anything else as YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| StatelyError::io_error(path.display().to_string(), e.to_string()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => crate::from_json(&data),
            _ => crate::from_yaml(&data),
        }
    }
}

impl DefaultedParameters {
    /// StatefulSet name, empty when unset
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }
}

impl From<DefaultedParameters> for DesiredStateParameters {
    fn from(params: DefaultedParameters) -> Self {
        Self {
            metadata: params.metadata,
            namespace: params.namespace,
            owner: params.owner,
            container: ContainerParameters {
                persistence_enabled: Some(params.persistence_enabled),
                ..params.container
            },
            labels: Some(params.labels),
            annotations: Some(params.annotations),
            replicas: Some(params.replicas),
            storage: StorageParameters {
                name: params.storage.name,
                labels: Some(params.storage.labels),
                annotations: Some(params.storage.annotations),
                access_modes: Some(params.storage.access_modes),
                storage_class_name: params.storage.storage_class_name,
                size: Some(params.storage.size),
            },
            extra_volumes: Some(params.extra_volumes),
            image_pull_secret: params.image_pull_secret,
            affinity: Some(params.affinity),
            node_selector: Some(params.node_selector),
            tolerations: Some(params.tolerations),
            priority_class_name: params.priority_class_name,
            additional_config: params.additional_config,
            security_context: Some(params.security_context),
        }
    }
}
