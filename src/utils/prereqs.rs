//! Prerequisite checking system for required tools

use anyhow::{Result, anyhow};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrereqError {
    #[error("Tool '{name}' not found")]
    NotFound { name: String, hint: String },
}

/// Trait for checking prerequisites
pub trait Prerequisite {
    /// Name of the prerequisite tool
    fn name(&self) -> &str;

    /// Check if the tool is available
    fn check(&self) -> Result<(), PrereqError>;

    /// Installation hint for the user
    fn install_hint(&self) -> &str;
}

/// Basic prerequisite that checks if a command exists
pub struct CommandPrereq {
    pub name: String,
    pub hint: String,
}

impl CommandPrereq {
    pub fn new(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hint: hint.into(),
        }
    }
}

impl Prerequisite for CommandPrereq {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Result<(), PrereqError> {
        which::which(&self.name).map_err(|_| PrereqError::NotFound {
            name: self.name.clone(),
            hint: self.hint.clone(),
        })?;
        Ok(())
    }

    fn install_hint(&self) -> &str {
        &self.hint
    }
}

/// Host tools the application pipelines shell out to
pub struct CommonPrereqs;

impl CommonPrereqs {
    pub fn helm() -> CommandPrereq {
        CommandPrereq::new("helm", "Install from: https://helm.sh/docs/intro/install/")
    }

    pub fn tar() -> CommandPrereq {
        CommandPrereq::new("tar", "Install GNU tar from your distribution packages")
    }

    pub fn md5sum() -> CommandPrereq {
        CommandPrereq::new("md5sum", "Install coreutils from your distribution packages")
    }

    /// The chart upload helper named in the config
    pub fn chart_upload(command: &str) -> CommandPrereq {
        CommandPrereq::new(command, "Provided by the platform's local chart repository")
    }

    /// Check all prerequisites and return detailed results
    /// Returns (found_tools, missing_tools)
    pub fn check_all(prereqs: &[&dyn Prerequisite]) -> (Vec<String>, Vec<(String, String)>) {
        let mut found = Vec::new();
        let mut missing = Vec::new();

        for prereq in prereqs {
            match prereq.check() {
                Ok(_) => found.push(prereq.name().to_string()),
                Err(PrereqError::NotFound { name, hint }) => missing.push((name, hint)),
            }
        }

        (found, missing)
    }
}

/// Check if either docker or podman is available
pub fn check_container_runtime() -> Result<()> {
    let docker_available = which::which("docker").is_ok();
    let podman_available = which::which("podman").is_ok();

    if !docker_available && !podman_available {
        return Err(anyhow!(
            "Neither docker nor podman found. Install one of them:\n  \
             - Docker: https://docs.docker.com/get-docker/\n  \
             - Podman: https://podman.io/getting-started/installation"
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prereq_trait() {
        let prereq = CommandPrereq::new("sh", "Should always exist");
        assert_eq!(prereq.name(), "sh");
        assert!(prereq.check().is_ok());
    }

    #[test]
    fn test_check_all_splits_found_and_missing() {
        let present = CommandPrereq::new("sh", "n/a");
        let absent = CommandPrereq::new("nonexistent-tool-xyz", "Test hint");
        let (found, missing) = CommonPrereqs::check_all(&[&present, &absent]);
        assert_eq!(found, vec!["sh"]);
        assert_eq!(
            missing,
            vec![("nonexistent-tool-xyz".to_string(), "Test hint".to_string())]
        );
    }
}
