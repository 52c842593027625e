use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Watch root not found: {}", .0.display())]
    RootNotFound(PathBuf),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Component {component} failed: {reason}")]
    ComponentFailed { component: String, reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl WorkspaceError {
    /// Errors that must abort service startup instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WorkspaceError::RootNotFound(_) | WorkspaceError::Config(_)
        )
    }
}

impl From<globset::Error> for WorkspaceError {
    fn from(err: globset::Error) -> Self {
        WorkspaceError::Config(ConfigError::ValidationError(err.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, WorkspaceError>;
