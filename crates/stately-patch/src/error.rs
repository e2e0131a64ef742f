use miette::Diagnostic;
use thiserror::Error;

/// Errors raised while computing a patch or maintaining the snapshot annotation
#[derive(Error, Debug, Diagnostic)]
pub enum PatchError {
    /// An object could not be converted to or from JSON
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(stately::patch::serialization_error),
        help("The object contains a value serde_json cannot represent")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<serde_json::Error>,
    },

    /// The last-applied annotation holds something other than a JSON object
    #[error("Invalid last-applied snapshot in annotation '{annotation}': {message}")]
    #[diagnostic(
        code(stately::patch::invalid_snapshot),
        help("Remove the annotation from the object; it is rewritten on the next successful apply")
    )]
    InvalidSnapshot {
        #[allow(unused)]
        annotation: String,
        #[allow(unused)]
        message: String,
    },
}

/// Result type for patch operations
pub type Result<T> = std::result::Result<T, PatchError>;

impl PatchError {
    pub fn serialization_error(message: impl Into<String>, source: Option<serde_json::Error>) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    pub fn invalid_snapshot(annotation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            annotation: annotation.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for PatchError {
    fn from(err: serde_json::Error) -> Self {
        PatchError::serialization_error(format!("JSON error: {}", err), Some(err))
    }
}
