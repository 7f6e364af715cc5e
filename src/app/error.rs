//! Errors raised by the application orchestrator

use thiserror::Error;

use super::record::AppStatus;
use super::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Application {0} not found")]
    NotFound(String),

    #[error("Application {0} already exists")]
    AlreadyExists(String),

    #[error("Invalid application name {0:?}: use lowercase letters, digits and '-'")]
    InvalidName(String),

    #[error("Application-{operation} rejected: operation is not allowed while the current status of {name} is {status}")]
    InvalidState {
        name: String,
        operation: &'static str,
        status: AppStatus,
    },

    #[error("Upload of application {name} failed: {reason}")]
    UploadFailure { name: String, reason: String },

    #[error("Apply of application {name} failed: {reason}")]
    ApplyFailure { name: String, reason: String },

    #[error("Progress monitoring of application {name} timed out after {secs}s")]
    ProgressMonitorTimeout { name: String, secs: u64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    pub fn upload(name: &str, reason: impl Into<String>) -> Self {
        AppError::UploadFailure {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn apply(name: &str, reason: impl Into<String>) -> Self {
        AppError::ApplyFailure {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
