//! Stately Core - desired-state synthesis for a managed StatefulSet
//!
//! This crate provides:
//! - Reconciliation parameters and their defaulting rules
//! - The pure StatefulSet synthesizer and container template generation
//! - Quantity parsing and canonical formatting
//! - Error types with miette diagnostics
//! - Resource keys and serialization helpers

pub mod defaults;
pub mod error;
pub mod params;
pub mod quantity;
pub mod synth;
pub mod template;
pub mod types;

// Re-export commonly used types
pub use error::{Result, StatelyError};
pub use params::{
    ContainerParameters, DefaultedParameters, DefaultedStorage, DesiredStateParameters,
    StorageParameters, DEFAULT_STORAGE_SIZE,
};
pub use synth::synthesize;
pub use types::{GroupVersionKind, ResourceKey};

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::apps::v1::StatefulSet;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Serialize a resource to JSON
pub fn to_json<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_json::to_string(resource).map_err(|e| {
        StatelyError::serialization_error(
            format!("Failed to serialize to JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from JSON
pub fn from_json<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| {
        StatelyError::serialization_error(
            format!("Failed to deserialize from JSON: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Serialize a resource to YAML
pub fn to_yaml<T: serde::Serialize>(resource: &T) -> Result<String> {
    serde_yaml::to_string(resource).map_err(|e| {
        StatelyError::serialization_error(
            format!("Failed to serialize to YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Deserialize a resource from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        StatelyError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Apply defaults and synthesize in one step
pub fn render(params: &DesiredStateParameters) -> Result<StatefulSet> {
    synthesize(&params.with_defaults())
}
