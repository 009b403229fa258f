//! Error types for xmigrate.
//!
//! One error enum covers the transport, codec and engine layers. The walker
//! never matches on variants directly; it asks [`MigrateError::failure_class`]
//! how a resource-local error should be recorded.

use crate::kind::ResourceKind;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the migration engine.
#[derive(Debug, Error)]
pub enum MigrateError {
    // Transport errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    #[error("HTTP {status} from {url}: {message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },

    #[error("Resource not found: {path}")]
    NotFound { path: String },

    // Codec errors
    #[error("XML error: {message}")]
    Xml { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("CSV error: {message}")]
    Csv {
        message: String,
        #[source]
        source: Option<csv::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Engine errors
    #[error("Identifier map conflict for {kind} {source_id}: already mapped to {existing}, refusing {attempted}")]
    IdMapConflict {
        kind: ResourceKind,
        source_id: String,
        existing: String,
        attempted: String,
    },

    #[error("No destination identifier for {kind} {source_id} ({context})")]
    MappingMiss {
        kind: ResourceKind,
        source_id: String,
        context: String,
    },

    #[error("Path {value} does not start with expected archive root {expected_prefix}")]
    PathLayout {
        value: String,
        expected_prefix: String,
    },

    #[error("Datatypes not enabled on destination: {}", missing.join(", "))]
    UnsupportedDatatypes { missing: Vec<String> },

    #[error("{kind} {label} already owned by project {owner}, refusing owner {attempted}")]
    OwnershipConflict {
        kind: ResourceKind,
        label: String,
        owner: String,
        attempted: String,
    },

    #[error("File synchronisation failed: {message}")]
    FileSync { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// How a resource-local failure is classified when it is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// An identifier reference or freshly created resource had no mapping.
    MappingMiss,
    /// A file-location reference did not have the expected archive root.
    InvalidLayout,
    /// Any collaborator failure (network, server, codec).
    Transient,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureClass::MappingMiss => "mapping miss",
            FailureClass::InvalidLayout => "invalid layout",
            FailureClass::Transient => "transient failure",
        };
        f.write_str(name)
    }
}

// Conversion implementations for common error types

impl From<std::io::Error> for MigrateError {
    fn from(err: std::io::Error) -> Self {
        MigrateError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MigrateError {
    fn from(err: serde_json::Error) -> Self {
        MigrateError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<csv::Error> for MigrateError {
    fn from(err: csv::Error) -> Self {
        MigrateError::Csv {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<quick_xml::Error> for MigrateError {
    fn from(err: quick_xml::Error) -> Self {
        MigrateError::Xml {
            message: err.to_string(),
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for MigrateError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        MigrateError::Xml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for MigrateError {
    fn from(err: reqwest::Error) -> Self {
        MigrateError::Network {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl MigrateError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        MigrateError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Classify this error for the failure log.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            MigrateError::MappingMiss { .. } | MigrateError::IdMapConflict { .. } => {
                FailureClass::MappingMiss
            }
            MigrateError::PathLayout { .. } => FailureClass::InvalidLayout,
            _ => FailureClass::Transient,
        }
    }

    /// Whether the server reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            MigrateError::NotFound { .. } | MigrateError::Http { status: 404, .. }
        )
    }
}
