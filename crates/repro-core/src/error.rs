//! Unified error types for Repro

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all Repro operations
#[derive(Error, Debug)]
pub enum ReproError {
    // Formula errors
    #[error("Invalid formula: {0}")]
    Validation(String),

    // Transport errors
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("No {registry} registered under the name {name:?}")]
    UnknownType { registry: &'static str, name: String },

    // Filesystem assembly errors
    #[error("Assembly error: {0}")]
    Assembly(String),

    // Execution errors
    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReproError {
    /// Which bucket of the error taxonomy this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Integrity { .. } => ErrorKind::Integrity,
            Self::Transport(_) | Self::UnknownType { .. } => ErrorKind::Transport,
            Self::Assembly(_) => ErrorKind::Assembly,
            Self::Execution(_) => ErrorKind::Execution,
            Self::Scheduler(_) | Self::Config(_) | Self::Io(_) | Self::Serialization(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Error taxonomy shared by every stage of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Integrity,
    Transport,
    Assembly,
    Execution,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation => write!(f, "validation"),
            Self::Integrity => write!(f, "integrity"),
            Self::Transport => write!(f, "transport"),
            Self::Assembly => write!(f, "assembly"),
            Self::Execution => write!(f, "execution"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// A job-fatal error as it is delivered to callers.
///
/// Unlike [`ReproError`] this is cheap to clone and serializable, so it can
/// travel inside a `JobResult` to any number of waiters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Human readable description of the failure
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

impl From<ReproError> for JobError {
    fn from(err: ReproError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

impl From<&ReproError> for JobError {
    fn from(err: &ReproError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}

/// Result type alias using ReproError
pub type Result<T> = std::result::Result<T, ReproError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            ReproError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ReproError::Integrity {
                expected: "a".into(),
                actual: "b".into()
            }
            .kind(),
            ErrorKind::Integrity
        );
        assert_eq!(
            ReproError::UnknownType {
                registry: "transmat",
                name: "ipfs".into()
            }
            .kind(),
            ErrorKind::Transport
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(ReproError::from(io).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_job_error_from_repro_error() {
        let err = ReproError::Assembly("mkdir failed".into());
        let job_err = JobError::from(err);
        assert_eq!(job_err.kind, ErrorKind::Assembly);
        assert_eq!(job_err.message(), "Assembly error: mkdir failed");
        assert_eq!(job_err.to_string(), "assembly error: Assembly error: mkdir failed");
    }
}
