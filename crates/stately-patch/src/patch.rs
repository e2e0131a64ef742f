use crate::annotator::Annotator;
use crate::error::Result;
use crate::ignore::{apply_all, IgnoreRule};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::Metadata;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tracing::trace;

/// Outcome of a patch calculation
#[derive(Clone, PartialEq)]
pub struct PatchResult {
    /// JSON merge patch (RFC 7386) turning the stored object into the desired one
    pub patch: Vec<u8>,
    empty: bool,
}

impl PatchResult {
    /// True when the stored object already matches the desired one
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn patch_str(&self) -> &str {
        std::str::from_utf8(&self.patch).unwrap_or("<non-utf8 patch>")
    }
}

impl fmt::Debug for PatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchResult")
            .field("patch", &self.patch_str())
            .field("empty", &self.empty)
            .finish()
    }
}

/// Three-way structural diff between stored, desired and last-applied state
///
/// A field changes when the desired value differs from the stored one. A
/// field is removed only when it was in the last-applied snapshot and the
/// desired object dropped it. Fields present only on the stored object
/// (defaults filled in by the API server) are left alone, so they never
/// trigger an update.
#[derive(Debug, Clone, Default)]
pub struct ThreeWayPatchEngine {
    annotator: Annotator,
}

impl ThreeWayPatchEngine {
    pub fn new(annotator: Annotator) -> Self {
        Self { annotator }
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    pub fn calculate<T>(&self, current: &T, modified: &T, rules: &[IgnoreRule]) -> Result<PatchResult>
    where
        T: Serialize + Metadata<Ty = ObjectMeta>,
    {
        let original = match self.annotator.last_applied(current)? {
            Some(mut snapshot) => {
                apply_all(rules, &mut snapshot);
                snapshot
            }
            None => Value::Null,
        };

        let mut current = serde_json::to_value(current)?;
        apply_all(rules, &mut current);

        let mut modified = serde_json::to_value(modified)?;
        apply_all(rules, &mut modified);

        let diff = three_way_diff(Some(&original), &modified, Some(&current));
        trace!(?diff, "Computed three-way diff");

        let empty = diff.is_none();
        let patch = diff.unwrap_or_else(|| Value::Object(Map::new()));

        Ok(PatchResult {
            patch: serde_json::to_vec(&patch)?,
            empty,
        })
    }
}

/// Merge patch for one node, or `None` when nothing changes
fn three_way_diff(original: Option<&Value>, modified: &Value, current: Option<&Value>) -> Option<Value> {
    let current = current.filter(|c| !c.is_null());

    match (modified, current) {
        (Value::Null, None) => None,
        (Value::Null, Some(_)) => Some(Value::Null),
        (_, None) => (!is_blank(modified)).then(|| modified.clone()),
        (Value::Object(m), Some(Value::Object(c))) => {
            let original = original.and_then(Value::as_object);
            let mut patch = Map::new();

            for (key, desired) in m {
                let before = original.and_then(|o| o.get(key));
                if let Some(change) = three_way_diff(before, desired, c.get(key)) {
                    patch.insert(key.clone(), change);
                }
            }

            if let Some(original) = original {
                for key in original.keys() {
                    let still_stored = c.get(key).is_some_and(|v| !v.is_null());
                    if !m.contains_key(key) && still_stored {
                        patch.insert(key.clone(), Value::Null);
                    }
                }
            }

            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (Value::Array(m), Some(Value::Array(c))) => {
            let original = original.and_then(Value::as_array);
            let same = m.len() == c.len()
                && m.iter().zip(c).enumerate().all(|(i, (desired, stored))| {
                    let before = original.and_then(|o| o.get(i));
                    three_way_diff(before, desired, Some(stored)).is_none()
                });
            // Merge patches replace arrays wholesale
            (!same).then(|| modified.clone())
        }
        (_, Some(stored)) => (modified != stored).then(|| modified.clone()),
    }
}

/// Values that carry no content: null, empty arrays, objects of blanks
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.values().all(is_blank),
        _ => false,
    }
}
