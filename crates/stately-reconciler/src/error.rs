use miette::Diagnostic;
use thiserror::Error;

/// Error type for a reconciliation cycle
#[derive(Error, Debug, Diagnostic)]
pub enum ReconcileError {
    /// Parameters could not be turned into a desired object
    #[error(transparent)]
    #[diagnostic(transparent)]
    Synthesis(#[from] stately_core::StatelyError),

    /// The stored and desired objects could not be compared
    #[error(transparent)]
    #[diagnostic(transparent)]
    Patch(#[from] stately_patch::PatchError),

    /// A store round trip failed
    #[error("{operation} {resource_key} failed: {message}")]
    #[diagnostic(
        code(stately::reconciler::transport_error),
        help("Check that the API server is reachable and the credentials allow {operation} on StatefulSets. The cycle made no further changes and can be retried")
    )]
    Transport {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        message: String,
    },

    /// The stored object changed between fetch and update
    #[error("Conflict updating {resource_key}: {message}")]
    #[diagnostic(
        code(stately::reconciler::conflict),
        help("Another writer modified the StatefulSet. Run the reconcile again to compare against the latest version")
    )]
    Conflict {
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        message: String,
    },

    /// The store returned something the cycle cannot work with
    #[error("Inconsistent state: {message}")]
    #[diagnostic(
        code(stately::reconciler::inconsistent_state),
        help("This is likely a bug in stately-reconciler or a misbehaving API server. Please report it with the full error details")
    )]
    InconsistentState {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for reconciliation
pub type Result<T> = std::result::Result<T, ReconcileError>;

impl ReconcileError {
    pub fn transport(
        operation: impl Into<String>,
        resource_key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transport {
            operation: operation.into(),
            resource_key: resource_key.into(),
            message: message.into(),
        }
    }

    pub fn conflict(resource_key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            resource_key: resource_key.into(),
            message: message.into(),
        }
    }

    pub fn inconsistent_state(message: impl Into<String>) -> Self {
        Self::InconsistentState {
            message: message.into(),
        }
    }

    /// True for failures caused by the parameters rather than the store
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Synthesis(e) if e.is_validation())
    }
}
