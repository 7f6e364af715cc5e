//! Progress indicators for long-running operations

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::app::record::ApplicationRecord;

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .expect("Failed to create spinner template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Spinner showing the status and progress of an application operation
pub struct OperationProgress {
    pb: ProgressBar,
    app: String,
}

impl OperationProgress {
    pub fn new(operation: &str, app: &str) -> Self {
        Self {
            pb: create_spinner(&format!("{} {}", operation, app)),
            app: app.to_string(),
        }
    }

    /// Hidden progress for non-interactive runs
    pub fn hidden(app: &str) -> Self {
        Self {
            pb: ProgressBar::hidden(),
            app: app.to_string(),
        }
    }

    pub fn update(&self, record: &ApplicationRecord) {
        self.pb.set_message(status_line(record));
    }

    pub fn message(&self) -> String {
        self.pb.message()
    }

    pub fn finish_success(&self, message: &str) {
        self.pb
            .finish_with_message(format!("✓ {}: {}", self.app, message));
    }

    pub fn finish_error(&self, message: &str) {
        self.pb
            .finish_with_message(format!("✗ {}: {}", self.app, message));
    }
}

/// "<app> [<status>] <progress>"
pub fn status_line(record: &ApplicationRecord) -> String {
    match record.progress.as_deref() {
        Some(progress) => format!("{} [{}] {}", record.name, record.status, progress),
        None => format!("{} [{}]", record.name, record.status),
    }
}
