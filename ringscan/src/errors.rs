//! Error types for the scanning pipeline.
//!
//! Only conditions that abort a run are represented here. Running out of
//! input and being cancelled are normal outcomes and are reported through
//! [`RunSummary`](crate::results::RunSummary) instead.

use std::io;
use std::path::{Path, PathBuf};
use std::string::FromUtf8Error;
use thiserror::Error;

use crate::events::WorkerRole;

/// Result type for pipeline operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while configuring or running the pipeline
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Failed to load configuration: {0}")]
    Config(#[from] config::ConfigError),
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Invalid UTF-8 on line {line}: {source}")]
    EncodingError { line: usize, source: FromUtf8Error },
    #[error("Failed to spawn {role} {index}: {source}")]
    Spawn {
        role: WorkerRole,
        index: usize,
        source: io::Error,
    },
    #[error("{role} {index} panicked")]
    WorkerPanicked { role: WorkerRole, index: usize },
    #[error("Failed to install signal handler: {0}")]
    Signal(io::Error),
    #[error("Buffer state violated: {0}")]
    InvariantViolated(String),
}

impl ScanError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn encoding_error(line: usize, source: FromUtf8Error) -> Self {
        Self::EncodingError { line, source }
    }

    pub fn spawn(role: WorkerRole, index: usize, source: io::Error) -> Self {
        Self::Spawn {
            role,
            index,
            source,
        }
    }

    pub fn worker_panicked(role: WorkerRole, index: usize) -> Self {
        Self::WorkerPanicked { role, index }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolated(msg.into())
    }

    /// Maps an error from opening `path` onto the matching variant
    pub fn from_open(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::file_not_found(path),
            io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::IoError(err),
        }
    }
}
