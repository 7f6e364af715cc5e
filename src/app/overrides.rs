//! Chart overrides: generation port and the shared overrides directory

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::record::{ChartRef, is_excluded_chart};
use crate::utils::paths::remove_file_if_exists;

/// Produces per-chart override files in the overrides directory
#[async_trait]
pub trait OverrideGenerator: Send + Sync {
    /// (Re)generate the combined overrides for every chart of an app
    async fn generate_overrides(&self, app_name: &str) -> Result<()>;

    async fn remove_chart_overrides(&self, chart: &ChartRef) -> Result<()>;
}

/// The directory the helper sees at /overrides
#[derive(Debug, Clone)]
pub struct OverridesDir {
    dir: PathBuf,
    excluded: Vec<String>,
}

impl OverridesDir {
    pub fn new(dir: impl Into<PathBuf>, excluded: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            excluded,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, chart: &ChartRef) -> PathBuf {
        self.dir.join(chart.overrides_file_name())
    }

    /// Override files for `charts`, or `None` if any required one is missing.
    /// Excluded charts carry no overrides.
    pub fn files_for(&self, charts: &[ChartRef]) -> Option<Vec<PathBuf>> {
        let mut available = Vec::new();
        let mut missing = Vec::new();
        for chart in charts {
            if is_excluded_chart(&chart.name, &self.excluded) {
                tracing::debug!("Skipping overrides {}", chart.overrides_file_name());
                continue;
            }
            let file = self.path_for(chart);
            if file.exists() {
                available.push(file);
            } else {
                missing.push(file);
            }
        }

        if !missing.is_empty() {
            tracing::error!("Missing the following overrides: {:?}", missing);
            return None;
        }
        Some(available)
    }
}

/// Make override files readable by the helper's user
pub fn make_readable(files: &[PathBuf]) -> Result<()> {
    for file in files {
        fs::set_permissions(file, fs::Permissions::from_mode(0o644))
            .with_context(|| format!("Failed to set permissions on {}", file.display()))?;
    }
    Ok(())
}

/// Helper command-line arguments selecting the override files
pub fn overrides_arg(files: &[PathBuf]) -> String {
    files
        .iter()
        .filter_map(|f| f.file_name())
        .map(|name| format!(" --values /overrides/{}", name.to_string_lossy()))
        .collect()
}

/// Overrides written out of band by the platform's override generator.
///
/// Generation only checks that the directory is in place; removal deletes
/// the chart's file.
pub struct ProvisionedOverrides {
    dir: OverridesDir,
}

impl ProvisionedOverrides {
    pub fn new(dir: OverridesDir) -> Self {
        Self { dir }
    }
}

#[async_trait]
impl OverrideGenerator for ProvisionedOverrides {
    async fn generate_overrides(&self, app_name: &str) -> Result<()> {
        fs::create_dir_all(self.dir.dir()).with_context(|| {
            format!(
                "Failed to prepare overrides directory {}",
                self.dir.dir().display()
            )
        })?;
        tracing::debug!(app = %app_name, dir = %self.dir.dir().display(), "Using provisioned overrides");
        Ok(())
    }

    async fn remove_chart_overrides(&self, chart: &ChartRef) -> Result<()> {
        let file = self.dir.path_for(chart);
        remove_file_if_exists(&file)
            .with_context(|| format!("Failed to remove {}", file.display()))?;
        Ok(())
    }
}
