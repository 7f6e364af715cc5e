//! Enhanced error types with actionable suggestions

use colored::Colorize;
use thiserror::Error;

use crate::app::record::AppStatus;
use crate::app::{AppError, store::StoreError};

/// Enhanced error with suggestions for the operator at the terminal
#[derive(Error, Debug)]
#[error("{message}")]
pub struct AppCtlError {
    pub message: String,
    pub suggestions: Vec<String>,
}

impl AppCtlError {
    /// Create a new error with suggestions
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestions: Vec::new(),
        }
    }

    /// Add a suggestion to the error
    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Display the error with suggestions
    pub fn display(&self) {
        crate::log_error!("{}", self.message);
        eprintln!("{} {}", "Error:".red().bold(), self.message);

        if !self.suggestions.is_empty() {
            eprintln!();
            eprintln!("{}", "Suggestions:".yellow().bold());
            for suggestion in &self.suggestions {
                eprintln!("  {} {}", "→".blue(), suggestion);
            }
        }
    }

    // Common error patterns

    pub fn app_not_found(name: &str) -> Self {
        Self::new(format!("Application {} not found", name))
            .suggest("List applications with: kubeapp list")
            .suggest(format!("Upload it first with: kubeapp upload {} <tarfile>", name))
    }

    pub fn app_exists(name: &str) -> Self {
        Self::new(format!("Application {} already exists", name))
            .suggest(format!("Delete it first with: kubeapp delete {}", name))
    }

    pub fn invalid_state(name: &str, operation: &str, status: AppStatus) -> Self {
        let err = Self::new(format!(
            "Application-{} rejected: {} is {}",
            operation, name, status
        ));
        match status {
            s if s.is_in_progress() => {
                err.suggest(format!("Wait for the current operation: kubeapp show {}", name))
            }
            AppStatus::UploadFailure => {
                err.suggest(format!("Delete and upload again: kubeapp delete {}", name))
            }
            AppStatus::UploadSuccess => {
                err.suggest(format!("Apply it first with: kubeapp apply {}", name))
            }
            AppStatus::RemoveFailure => {
                err.suggest(format!("Retry the removal: kubeapp remove {}", name))
            }
            _ => err,
        }
    }

    pub fn upload_rejected(reason: &str) -> Self {
        Self::new(format!("Application upload rejected: {}", reason))
            .suggest("The tarball must be a .tgz or .tar.gz holding exactly one manifest")
            .suggest("Verify checksums with: md5sum -c <file>.md5")
    }

    pub fn monitor_timeout(name: &str, secs: u64) -> Self {
        Self::new(format!(
            "Progress monitoring of {} gave up after {}s",
            name, secs
        ))
        .suggest("Increase [monitor] timeout_secs in the config file")
    }

    pub fn store_failure(reason: &str) -> Self {
        Self::new(format!("Application state is unavailable: {}", reason))
            .suggest("Check [paths] state_dir in the config file")
            .suggest("Run with -vv for more details")
    }

    pub fn tool_not_found(tool: &str, install_hint: &str) -> Self {
        Self::new(format!("Required tool '{}' not found", tool))
            .suggest(format!("Install with: {}", install_hint))
            .suggest("Ensure the tool is in your PATH")
    }
}

impl From<&AppError> for AppCtlError {
    fn from(err: &AppError) -> Self {
        match err {
            AppError::NotFound(name) => AppCtlError::app_not_found(name),
            AppError::AlreadyExists(name) => AppCtlError::app_exists(name),
            AppError::InvalidName(_) => AppCtlError::new(err.to_string())
                .suggest("Names are DNS labels, for example: stx-openstack"),
            AppError::InvalidState {
                name,
                operation,
                status,
            } => AppCtlError::invalid_state(name, operation, *status),
            AppError::UploadFailure { reason, .. } => AppCtlError::upload_rejected(reason),
            AppError::ApplyFailure { name, reason } => {
                AppCtlError::new(format!("Apply of {} failed: {}", name, reason))
                    .suggest(format!("Inspect the app with: kubeapp show {}", name))
            }
            AppError::ProgressMonitorTimeout { name, secs } => {
                AppCtlError::monitor_timeout(name, *secs)
            }
            AppError::Store(StoreError::NotFound(name)) => AppCtlError::app_not_found(name),
            AppError::Store(e) => AppCtlError::store_failure(&e.to_string()),
        }
    }
}

/// Helper to display error and exit
pub fn display_error_and_exit(error: AppCtlError) -> ! {
    error.display();
    std::process::exit(1);
}

/// Convert anyhow error to AppCtlError when possible
pub fn enhance_error(err: anyhow::Error) -> AppCtlError {
    if let Some(app_err) = err.downcast_ref::<AppError>() {
        return app_err.into();
    }

    let err_str = format!("{:#}", err);
    if err_str.contains("kubeconfig") {
        return AppCtlError::new(err_str)
            .suggest("Point [paths] kubeconfig at the cluster admin config");
    }
    if err_str.contains("Neither docker nor podman") {
        return AppCtlError::tool_not_found("docker", "https://docs.docker.com/get-docker/");
    }

    AppCtlError::new(err_str).suggest("Run with -vv for more details")
}
