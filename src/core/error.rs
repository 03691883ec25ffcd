//! Error types for kgforecast.

use thiserror::Error;

/// Result type alias for kgforecast operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, running or persisting a model.
#[derive(Error, Debug)]
pub enum Error {
    // Tensor errors
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Categorical index {index} out of range for field '{field}' (table size {size})")]
    CategoryOutOfRange {
        field: String,
        index: f32,
        size: usize,
    },

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Checkpoint errors
    #[error("Parameter not found: {0}")]
    MissingParameter(String),

    #[error("Checkpoint digest mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    // Compression errors
    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a shape mismatch error.
    pub fn shape(context: &str, expected: &[usize], actual: &[usize]) -> Self {
        Error::ShapeMismatch {
            context: context.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Error::DeserializationError(err.to_string())
        } else {
            Error::SerializationError(err.to_string())
        }
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
