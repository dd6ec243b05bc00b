use thiserror::Error;

use crate::types::Phase;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    /// A named input failed validation; no state was changed.
    #[error("validation failed for {field}: {message}")]
    Validation { field: String, message: String },

    /// A phase operation was invoked while the migration sat in a different phase.
    #[error("phase mismatch: expected {expected}, migration is in {actual}")]
    PhaseMismatch { expected: Phase, actual: Phase },

    #[error("bulk statement for {0} was already performed")]
    DoublePerform(String),

    #[error("table lock error: {0}")]
    Lock(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
