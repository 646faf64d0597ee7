//! Error types for the route schema registry

use std::path::PathBuf;

use thiserror::Error;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Route schema registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Parse error in {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Unknown direction: {tag} (expected \"server\" or \"client\")")]
    UnknownDirection { tag: String },

    #[error("Verification failed for {type_name}: {path}: {reason}")]
    Verification {
        type_name: String,
        path: String,
        reason: String,
    },

    #[error("Unknown route: {route} (resolved to {type_name})")]
    UnknownRoute { route: String, type_name: String },

    #[error("Not a message type: {0}")]
    NotAMessage(String),

    #[error("No {0} schema loaded")]
    SchemaNotLoaded(&'static str),

    #[error("Encode error for {type_name}: {reason}")]
    Encode { type_name: String, reason: String },

    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl RegistryError {
    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn verification(
        type_name: impl Into<String>,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Verification {
            type_name: type_name.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from a bad call rather than the environment
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownDirection { .. }
                | Self::Verification { .. }
                | Self::UnknownRoute { .. }
                | Self::NotAMessage(_)
        )
    }
}
