//! Error types for the listsync engine.

use crate::{IndexId, ReplicaId};
use thiserror::Error;

/// All possible errors from the listsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("invalid value for cell '{cell}': {reason}")]
    InvalidValue { cell: String, reason: String },

    #[error("missing required cell '{cell}' in table '{table}'")]
    MissingRequiredCell { table: String, cell: String },

    #[error("type mismatch for cell '{table}.{cell}': expected {expected}, got {got}")]
    TypeMismatch {
        table: String,
        cell: String,
        expected: String,
        got: String,
    },

    #[error("index not found: {0}")]
    IndexNotFound(IndexId),

    // Merge errors
    #[error("malformed content: {0}")]
    MalformedContent(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("replica id mismatch: expected '{expected}', got '{actual}'")]
    ReplicaMismatch {
        expected: ReplicaId,
        actual: ReplicaId,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::IndexNotFound("todosByList".into());
        assert_eq!(err.to_string(), "index not found: todosByList");

        let err = Error::MissingRequiredCell {
            table: "todos".into(),
            cell: "text".into(),
        };
        assert_eq!(
            err.to_string(),
            "missing required cell 'text' in table 'todos'"
        );

        let err = Error::TypeMismatch {
            table: "todos".into(),
            cell: "done".into(),
            expected: "Bool".into(),
            got: "String".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for cell 'todos.done': expected Bool, got String"
        );
    }
}
