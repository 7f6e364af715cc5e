//! Utility modules for kubeapp

pub mod archive;
pub mod container;
pub mod errors;
pub mod logger;
pub mod paths;
pub mod prereqs;
pub mod progress;
pub mod prompt;

// Re-export commonly used items
pub use container::ContainerRuntime;
pub use logger::{log_error, log_info, log_warn};
pub use prereqs::{CommonPrereqs, Prerequisite};
pub use prompt::confirm;
