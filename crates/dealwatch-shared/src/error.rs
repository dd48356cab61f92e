//! Error types for the update subsystem.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Remote probe failed: {0}")]
    Probe(String),

    #[error("Clone failed: {0}")]
    Clone(String),

    #[error("Backup failed: {0}")]
    Backup(String),

    #[error("Install of {path} failed: {source}")]
    Install {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid managed path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UpdateError {
    /// Short machine-readable kind, used as a field in activity records
    pub fn kind(&self) -> &'static str {
        match self {
            UpdateError::Probe(_) => "probe",
            UpdateError::Clone(_) => "clone",
            UpdateError::Backup(_) => "backup",
            UpdateError::Install { .. } => "install",
            UpdateError::InvalidPath(_) => "invalid_path",
            UpdateError::Io(_) => "io",
            UpdateError::Json(_) => "json",
            UpdateError::Internal(_) => "internal",
        }
    }
}
