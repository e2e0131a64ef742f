use crate::error::Result;
use crate::params::DefaultedParameters;
use crate::quantity::canonical_resources;
use k8s_openapi::api::core::v1::{Container, VolumeMount};

/// Default mount point for the data volume claim
pub const DATA_MOUNT_PATH: &str = "/data";

/// Default mount point for the external configuration
pub const CONFIG_MOUNT_PATH: &str = "/etc/config";

/// Volume name used for the external configuration ConfigMap
pub const EXTERNAL_CONFIG_VOLUME: &str = "external-config";

/// Build the container list for the pod template
///
/// Pure function of the parameters. The container is named after the
/// StatefulSet; it mounts the data claim when persistence is requested and
/// the external configuration when one is referenced. Resource quantities
/// are rewritten in canonical form; an unparsable one is an error.
pub fn generate_containers(params: &DefaultedParameters) -> Result<Vec<Container>> {
    let container = &params.container;

    let mut mounts = Vec::new();
    if wants_volume_claim(params) {
        mounts.push(VolumeMount {
            name: params.storage.name.clone(),
            mount_path: container
                .data_mount_path
                .clone()
                .unwrap_or_else(|| DATA_MOUNT_PATH.to_string()),
            ..Default::default()
        });
    }
    if params.additional_config.is_some() {
        mounts.push(VolumeMount {
            name: EXTERNAL_CONFIG_VOLUME.to_string(),
            mount_path: container
                .config_mount_path
                .clone()
                .unwrap_or_else(|| CONFIG_MOUNT_PATH.to_string()),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let resources = container
        .resources
        .as_ref()
        .map(canonical_resources)
        .transpose()?;

    Ok(vec![Container {
        name: params.name().to_string(),
        image: (!container.image.is_empty()).then(|| container.image.clone()),
        image_pull_policy: container.image_pull_policy.clone(),
        command: container.command.clone(),
        args: container.args.clone(),
        env: container.env.clone(),
        ports: container.ports.clone(),
        resources,
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    }])
}

/// Whether the StatefulSet gets a volume claim template
pub fn wants_volume_claim(params: &DefaultedParameters) -> bool {
    params.persistence_enabled && !params.storage.size.is_empty()
}
