//! Query-layer error taxonomy.
//!
//! Errors discovered before execution (syntax, semantics, unprovided
//! parameters) abort the pipeline without emitting rows. Errors discovered
//! mid-execution abort the pull loop; no summary is emitted and the
//! transaction disposition stays with the caller.

use thiserror::Error;

use crate::query::value::ValueError;
use crate::types::VesperError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    /// Tokenization or grammar failure. Surfaced verbatim, never retried.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },
    /// Symbol resolution or type-rule violation found before planning ends.
    #[error("semantic error: {0}")]
    Semantic(String),
    /// A `$name` in the query has no binding in the caller's parameters.
    #[error("parameter ${0} not provided")]
    UnprovidedParameter(String),
    /// Anything that goes wrong while pulling rows.
    #[error("runtime error: {0}")]
    Runtime(String),
    /// Storage/transaction failure observed through the accessor.
    #[error(transparent)]
    Storage(#[from] StorageFailure),
}

/// Wrapper keeping `VesperError` comparable in tests without forcing
/// `PartialEq` onto the storage error itself.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct StorageFailure {
    pub message: String,
}

impl PartialEq for StorageFailure {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl QueryError {
    pub fn syntax(offset: usize, message: impl Into<String>) -> Self {
        QueryError::Syntax {
            offset,
            message: message.into(),
        }
    }

    pub fn semantic(message: impl Into<String>) -> Self {
        QueryError::Semantic(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        QueryError::Runtime(message.into())
    }

    /// Machine-readable code for the error class.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::Syntax { .. } => "SyntaxError",
            QueryError::Semantic(_) => "SemanticError",
            QueryError::UnprovidedParameter(_) => "UnprovidedParameter",
            QueryError::Runtime(_) => "RuntimeError",
            QueryError::Storage(_) => "StorageError",
        }
    }
}

impl From<VesperError> for QueryError {
    fn from(err: VesperError) -> Self {
        QueryError::Storage(StorageFailure {
            message: err.to_string(),
        })
    }
}

impl From<ValueError> for QueryError {
    fn from(err: ValueError) -> Self {
        QueryError::Runtime(err.to_string())
    }
}
