use crate::params::{
    ContainerParameters, DefaultedParameters, DefaultedStorage, DesiredStateParameters,
    DEFAULT_ACCESS_MODE, DEFAULT_STORAGE_SIZE,
};
use tracing::{info, warn};

impl DesiredStateParameters {
    /// Fill every unset field with its default
    ///
    /// Pure: the caller's parameters are left untouched. Defaulting never
    /// fails; each substitution is logged, and a missing storage size is
    /// logged as a warning because it usually means the caller forgot it.
    pub fn with_defaults(&self) -> DefaultedParameters {
        let name = self.name();
        let namespace = self.namespace.as_str();

        let replicas = self.replicas.unwrap_or_else(|| {
            info!(statefulset = name, namespace, "Replicas is unset, defaulting to 1");
            1
        });

        let size = match self.storage.size.as_deref().map(str::trim) {
            Some(size) if !size.is_empty() => size.to_string(),
            _ => {
                warn!(
                    statefulset = name,
                    namespace,
                    default = DEFAULT_STORAGE_SIZE,
                    "Storage size is missing, using the default"
                );
                DEFAULT_STORAGE_SIZE.to_string()
            }
        };

        let storage_name = if self.storage.name.is_empty() {
            info!(
                statefulset = name,
                namespace,
                "Storage name is empty, using the StatefulSet name"
            );
            name.to_string()
        } else {
            self.storage.name.clone()
        };

        let access_modes = match &self.storage.access_modes {
            Some(modes) if !modes.is_empty() => modes.clone(),
            _ => {
                info!(
                    statefulset = name,
                    namespace,
                    default = DEFAULT_ACCESS_MODE,
                    "Storage access modes are unset, using the default"
                );
                vec![DEFAULT_ACCESS_MODE.to_string()]
            }
        };

        let persistence_enabled = self.container.persistence_enabled.unwrap_or_else(|| {
            info!(
                statefulset = name,
                namespace,
                "Persistence flag is unset, defaulting to false"
            );
            false
        });
        let container = ContainerParameters {
            persistence_enabled: Some(persistence_enabled),
            ..self.container.clone()
        };

        let mut metadata = self.metadata.clone();
        metadata.labels = Some(or_default(
            name,
            namespace,
            "metadata.labels",
            &metadata.labels,
        ));
        metadata.annotations = Some(or_default(
            name,
            namespace,
            "metadata.annotations",
            &metadata.annotations,
        ));

        DefaultedParameters {
            metadata,
            namespace: self.namespace.clone(),
            owner: self.owner.clone(),
            container,
            persistence_enabled,
            labels: or_default(name, namespace, "labels", &self.labels),
            annotations: or_default(name, namespace, "annotations", &self.annotations),
            replicas,
            storage: DefaultedStorage {
                name: storage_name,
                labels: or_default(name, namespace, "storage.labels", &self.storage.labels),
                annotations: or_default(
                    name,
                    namespace,
                    "storage.annotations",
                    &self.storage.annotations,
                ),
                access_modes,
                storage_class_name: self.storage.storage_class_name.clone(),
                size,
            },
            extra_volumes: or_default(name, namespace, "extraVolumes", &self.extra_volumes),
            image_pull_secret: self.image_pull_secret.clone(),
            affinity: or_default(name, namespace, "affinity", &self.affinity),
            node_selector: or_default(name, namespace, "nodeSelector", &self.node_selector),
            tolerations: or_default(name, namespace, "tolerations", &self.tolerations),
            priority_class_name: self.priority_class_name.clone(),
            additional_config: self.additional_config.clone(),
            security_context: or_default(
                name,
                namespace,
                "securityContext",
                &self.security_context,
            ),
        }
    }
}

fn or_default<T: Clone + Default>(
    name: &str,
    namespace: &str,
    field: &str,
    value: &Option<T>,
) -> T {
    match value {
        Some(v) => v.clone(),
        None => {
            info!(
                statefulset = name,
                namespace,
                field,
                "Field is unset, using an empty default"
            );
            T::default()
        }
    }
}
