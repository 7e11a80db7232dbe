//! Error types for DIMSE operations

use thiserror::Error;

/// Result type alias for DIMSE operations
pub type Result<T> = std::result::Result<T, DimseError>;

/// Error types that can occur during DIMSE operations
#[derive(Error, Debug)]
pub enum DimseError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("DICOM parsing error: {0}")]
    DicomParsing(String),

    #[error("DICOM object error: {0}")]
    DicomObject(String),

    #[error("Invalid AE Title: {0}")]
    InvalidAeTitle(String),

    #[error("Missing command element: {0}")]
    MissingCommandElement(String),

    #[error("Router error: {0}")]
    Router(String),
}

impl DimseError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new router error
    pub fn router(msg: impl Into<String>) -> Self {
        Self::Router(msg.into())
    }

    /// Create a new parsing error
    pub fn parsing(msg: impl Into<String>) -> Self {
        Self::DicomParsing(msg.into())
    }

    /// Whether the error came from the inbound byte stream rather than the
    /// content of the dataset
    pub fn is_network(&self) -> bool {
        matches!(self, DimseError::Network(_))
    }
}
