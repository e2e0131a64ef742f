// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Stately operations
#[derive(Error, Debug, Diagnostic)]
pub enum StatelyError {
    /// Validation failed
    #[error("Validation failed for {resource_type}: {details}")]
    #[diagnostic(
        code(stately::validation_failed),
        help("{help_text}")
    )]
    ValidationFailed {
        #[allow(unused)]
        resource_type: String,
        #[allow(unused)]
        details: String,
        #[allow(unused)]
        help_text: String,
    },

    /// Malformed resource quantity
    #[error("Invalid quantity '{value}': {reason}")]
    #[diagnostic(
        code(stately::invalid_quantity),
        help("Use a Kubernetes quantity such as '512Mi', '1Gi' or '10G'")
    )]
    InvalidQuantity {
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(stately::serialization_error),
        help("Ensure the parameter file is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O error while reading parameters
    #[error("Failed to read {path}: {message}")]
    #[diagnostic(
        code(stately::io_error),
        help("Check that the file exists and is readable")
    )]
    IoError {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for Stately operations
pub type Result<T> = std::result::Result<T, StatelyError>;

impl StatelyError {
    /// Create a ValidationFailed error
    pub fn validation_failed(
        resource_type: impl Into<String>,
        details: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::ValidationFailed {
            resource_type: resource_type.into(),
            details: details.into(),
            help_text: help_text.into(),
        }
    }

    /// Create an InvalidQuantity error
    pub fn invalid_quantity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an IoError
    pub fn io_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IoError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether this error means the caller's parameters were rejected
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ValidationFailed { .. } | Self::InvalidQuantity { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = StatelyError::validation_failed(
            "StatefulSet",
            "metadata.name is empty",
            "Set a name for the StatefulSet",
        );
        assert!(matches!(err, StatelyError::ValidationFailed { .. }));
        assert!(err.is_validation());

        let err = StatelyError::invalid_quantity("ten gigs", "unknown suffix");
        assert!(err.is_validation());

        let err = StatelyError::io_error("params.yaml", "not found");
        assert!(!err.is_validation());
    }

    #[test]
    fn test_error_display() {
        let err = StatelyError::invalid_quantity("1Qi", "unknown suffix 'Qi'");
        assert_eq!(err.to_string(), "Invalid quantity '1Qi': unknown suffix 'Qi'");
    }
}
