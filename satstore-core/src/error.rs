/*!
Error types for the satstore persistence pipeline.
*/

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used throughout satstore.
pub type Result<T> = std::result::Result<T, SatStoreError>;

/// Errors that can occur while persisting raster artifacts.
///
/// A skipped artifact (missing or `nan` acquisition datetime) is not an
/// error and never shows up here.
#[derive(Error, Debug)]
pub enum SatStoreError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A naming template is malformed or references an unknown variable
    #[error("Naming template error: {0}")]
    NamingTemplate(String),

    /// Invalid or incomplete save configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization or local write failure
    #[error("Write error: {0}")]
    Write(String),

    /// Remote object upload failure
    #[error("Upload of '{key}' failed: {message}")]
    Upload {
        key: String,
        message: String,
        transient: bool,
    },

    /// Malformed input artifact
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Coarse error classification reported per failed write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NamingTemplate,
    Configuration,
    Write,
    Validation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NamingTemplate => "naming_template",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Write => "write",
            ErrorKind::Validation => "validation",
        };
        f.write_str(name)
    }
}

impl SatStoreError {
    /// Create a new naming template error
    pub fn naming_template<S: Into<String>>(msg: S) -> Self {
        Self::NamingTemplate(msg.into())
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new write error
    pub fn write<S: Into<String>>(msg: S) -> Self {
        Self::Write(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new upload error
    pub fn upload<K: Into<String>, M: Into<String>>(key: K, msg: M, transient: bool) -> Self {
        Self::Upload {
            key: key.into(),
            message: msg.into(),
            transient,
        }
    }

    /// Map the error onto the reporting taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            SatStoreError::NamingTemplate(_) => ErrorKind::NamingTemplate,
            SatStoreError::Configuration(_) => ErrorKind::Configuration,
            SatStoreError::Validation(_) => ErrorKind::Validation,
            SatStoreError::Io(_)
            | SatStoreError::Json(_)
            | SatStoreError::Write(_)
            | SatStoreError::Upload { .. } => ErrorKind::Write,
        }
    }
}

impl satstore_retry::RetryableError for SatStoreError {
    fn is_transient(&self) -> bool {
        match self {
            SatStoreError::Upload { transient, .. } => *transient,
            SatStoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}
