//! Error types for the PC-DARTS search engine

use thiserror::Error;

/// Result type alias for search operations
pub type Result<T> = std::result::Result<T, DartsError>;

/// Main error type for the search engine
#[derive(Error, Debug)]
pub enum DartsError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },
}

impl DartsError {
    /// Shape mismatch between what a layer expects and what it received
    pub fn shape(expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> Self {
        DartsError::ShapeError {
            expected: format!("{:?}", expected),
            actual: format!("{:?}", actual),
        }
    }

    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        DartsError::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn no_forward_cache(layer: &str) -> Self {
        DartsError::TrainingError(format!("{}: backward called before forward", layer))
    }
}

impl From<ndarray::ShapeError> for DartsError {
    fn from(err: ndarray::ShapeError) -> Self {
        DartsError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for DartsError {
    fn from(err: serde_json::Error) -> Self {
        DartsError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for DartsError {
    fn from(err: toml::de::Error) -> Self {
        DartsError::ConfigError(err.to_string())
    }
}

impl From<toml::ser::Error> for DartsError {
    fn from(err: toml::ser::Error) -> Self {
        DartsError::SerializationError(err.to_string())
    }
}
