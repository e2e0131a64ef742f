use crate::error::{PatchError, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use serde::Serialize;
use serde_json::Value;

/// Annotation holding the JSON snapshot of the last applied object
pub const LAST_APPLIED_ANNOTATION: &str = "stately.io/last-applied";

/// Metadata fields assigned by the API server, never part of a snapshot
const STORE_OWNED_METADATA: [&str; 7] = [
    "resourceVersion",
    "creationTimestamp",
    "managedFields",
    "uid",
    "generation",
    "selfLink",
    "deletionTimestamp",
];

/// Reads and writes the last-applied snapshot annotation
#[derive(Debug, Clone)]
pub struct Annotator {
    key: String,
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new(LAST_APPLIED_ANNOTATION)
    }
}

impl Annotator {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Serialize `object` into the snapshot form
    ///
    /// Status, store-owned metadata and the snapshot annotation itself are
    /// dropped so the snapshot only records what the caller authored.
    pub fn snapshot<T: Serialize>(&self, object: &T) -> Result<Value> {
        let mut value = serde_json::to_value(object)?;

        if let Some(map) = value.as_object_mut() {
            map.remove("status");
        }

        if let Some(metadata) = value.get_mut("metadata").and_then(Value::as_object_mut) {
            for field in STORE_OWNED_METADATA {
                metadata.remove(field);
            }

            let drop_annotations = match metadata.get_mut("annotations").and_then(Value::as_object_mut) {
                Some(annotations) => {
                    annotations.remove(&self.key);
                    annotations.is_empty()
                }
                None => false,
            };
            if drop_annotations {
                metadata.remove("annotations");
            }
        }

        Ok(value)
    }

    /// Record the current content of `object` in its own snapshot annotation
    pub fn set_last_applied<T>(&self, object: &mut T) -> Result<()>
    where
        T: Serialize + Metadata<Ty = ObjectMeta>,
    {
        let snapshot = serde_json::to_string(&self.snapshot(object)?)?;
        object
            .metadata_mut()
            .annotations
            .get_or_insert_with(Default::default)
            .insert(self.key.clone(), snapshot);
        Ok(())
    }

    /// Parse the snapshot stored on `object`, if any
    pub fn last_applied<T>(&self, object: &T) -> Result<Option<Value>>
    where
        T: Metadata<Ty = ObjectMeta>,
    {
        let Some(raw) = object
            .metadata()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(&self.key))
        else {
            return Ok(None);
        };

        let value: Value = serde_json::from_str(raw)
            .map_err(|e| PatchError::invalid_snapshot(&self.key, e.to_string()))?;

        if !value.is_object() {
            return Err(PatchError::invalid_snapshot(
                &self.key,
                "snapshot is not a JSON object",
            ));
        }

        Ok(Some(value))
    }
}
