// Allow unused assignments for diagnostic fields - they're used by the thiserror/miette macros
#![allow(unused_assignments)]

//! Structural comparison of a stored StatefulSet against its desired form
//!
//! The engine produces a JSON merge patch, reports whether anything changed
//! and maintains the last-applied snapshot annotation it compares against.

pub mod annotator;
pub mod error;
pub mod ignore;
pub mod patch;

pub use annotator::{Annotator, LAST_APPLIED_ANNOTATION};
pub use error::{PatchError, Result};
pub use ignore::{default_rules, IgnoreRule};
pub use patch::{PatchResult, ThreeWayPatchEngine};

use k8s_openapi::api::apps::v1::StatefulSet;

/// Diff and snapshot operations the reconciler depends on
pub trait PatchEngine: Send + Sync {
    /// Patch turning `current` into `modified`, with `rules` stripped from both sides
    fn calculate(
        &self,
        current: &StatefulSet,
        modified: &StatefulSet,
        rules: &[IgnoreRule],
    ) -> Result<PatchResult>;

    /// Store the snapshot of `object` in its last-applied annotation
    fn set_last_applied(&self, object: &mut StatefulSet) -> Result<()>;
}

impl PatchEngine for ThreeWayPatchEngine {
    fn calculate(
        &self,
        current: &StatefulSet,
        modified: &StatefulSet,
        rules: &[IgnoreRule],
    ) -> Result<PatchResult> {
        ThreeWayPatchEngine::calculate(self, current, modified, rules)
    }

    fn set_last_applied(&self, object: &mut StatefulSet) -> Result<()> {
        self.annotator().set_last_applied(object)
    }
}
