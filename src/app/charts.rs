//! Helm chart validation and upload to the local chart repository

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::utils::paths::files_matching;

/// Chart tooling used by the upload pipeline
#[async_trait]
pub trait ChartTool: Send + Sync {
    /// Lint an unpacked chart directory. `Ok(false)` means lint ran and
    /// reported failures.
    async fn lint(&self, chart_dir: &Path) -> Result<bool>;

    /// Publish a packaged chart to the local repository
    async fn upload(&self, package: &Path) -> Result<()>;
}

/// `helm lint` plus the platform's upload helper
pub struct HelmCli {
    upload_command: String,
    upload_path: String,
}

impl HelmCli {
    pub fn new(upload_command: impl Into<String>, upload_path: impl Into<String>) -> Self {
        Self {
            upload_command: upload_command.into(),
            upload_path: upload_path.into(),
        }
    }

    fn search_path(&self) -> String {
        match std::env::var("PATH") {
            Ok(path) if !path.is_empty() => format!("{}:{}", self.upload_path, path),
            _ => self.upload_path.clone(),
        }
    }
}

#[async_trait]
impl ChartTool for HelmCli {
    async fn lint(&self, chart_dir: &Path) -> Result<bool> {
        let output = Command::new("helm")
            .arg("lint")
            .arg(chart_dir)
            .output()
            .await
            .context("Failed to execute helm lint")?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.contains("no failures"))
    }

    async fn upload(&self, package: &Path) -> Result<()> {
        let status = Command::new(&self.upload_command)
            .arg(package)
            .env("PATH", self.search_path())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to execute {}", self.upload_command))?;
        if !status.success() {
            bail!(
                "{} {} exited with {}",
                self.upload_command,
                package.display(),
                status
            );
        }
        Ok(())
    }
}

/// Unpacked chart directories (those holding a Chart.yaml) under `charts_dir`
pub fn chart_dirs(charts_dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(files_matching(charts_dir, "Chart.yaml")?
        .into_iter()
        .filter_map(|file| file.parent().map(Path::to_path_buf))
        .collect())
}

/// Packaged charts under `charts_dir`
pub fn chart_packages(charts_dir: &Path) -> Result<Vec<PathBuf>> {
    files_matching(charts_dir, ".tgz")
}
