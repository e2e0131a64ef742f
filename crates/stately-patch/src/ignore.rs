use serde_json::Value;

/// A subtree excluded from patch computation
///
/// Rules are applied to both sides of the comparison (and to the last-applied
/// snapshot) before any diffing takes place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreRule {
    /// The top-level `status` subtree
    Status,
    /// `kind`, `apiVersion` and `status` of every volume claim template
    VolumeClaimTemplateTypeMetaAndStatus,
    /// Fields the API server fills in on volume claim templates
    /// (`metadata.creationTimestamp`, `spec.volumeMode`)
    PersistentVolumeFields,
    /// An arbitrary dotted path such as `metadata` or `spec.template.metadata.creationTimestamp`
    Field(String),
}

impl IgnoreRule {
    pub fn field(path: impl Into<String>) -> Self {
        Self::Field(path.into())
    }

    /// Strip the ignored subtree from `object` in place
    pub fn apply(&self, object: &mut Value) {
        match self {
            IgnoreRule::Status => remove_path(object, &["status"]),
            IgnoreRule::VolumeClaimTemplateTypeMetaAndStatus => {
                for template in volume_claim_templates(object) {
                    remove_path(template, &["kind"]);
                    remove_path(template, &["apiVersion"]);
                    remove_path(template, &["status"]);
                }
            }
            IgnoreRule::PersistentVolumeFields => {
                for template in volume_claim_templates(object) {
                    remove_path(template, &["metadata", "creationTimestamp"]);
                    remove_path(template, &["spec", "volumeMode"]);
                }
            }
            IgnoreRule::Field(path) => {
                let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
                remove_path(object, &segments);
            }
        }
    }
}

/// The rule set used when reconciling a StatefulSet
///
/// Metadata is excluded as a whole: annotations are merged explicitly and
/// the store-owned fields are copied through.
pub fn default_rules() -> Vec<IgnoreRule> {
    vec![
        IgnoreRule::Status,
        IgnoreRule::VolumeClaimTemplateTypeMetaAndStatus,
        IgnoreRule::PersistentVolumeFields,
        IgnoreRule::field("kind"),
        IgnoreRule::field("apiVersion"),
        IgnoreRule::field("metadata"),
    ]
}

/// Apply every rule in order
pub fn apply_all(rules: &[IgnoreRule], object: &mut Value) {
    for rule in rules {
        rule.apply(object);
    }
}

fn volume_claim_templates(object: &mut Value) -> impl Iterator<Item = &mut Value> {
    object
        .pointer_mut("/spec/volumeClaimTemplates")
        .and_then(Value::as_array_mut)
        .into_iter()
        .flatten()
}

fn remove_path(object: &mut Value, segments: &[&str]) {
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut cursor = object;
    for segment in parents {
        match cursor.get_mut(*segment) {
            Some(next) => cursor = next,
            None => return,
        }
    }

    if let Some(map) = cursor.as_object_mut() {
        map.remove(*last);
    }
}
