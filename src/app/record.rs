//! Application record, chart references and status values

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::config::settings::{PathSettings, SystemAppSettings};

static APP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid app name pattern"));

/// Application names become directory and file names, so they are limited
/// to DNS labels
pub fn is_valid_app_name(name: &str) -> bool {
    name.len() <= 63 && APP_NAME.is_match(name)
}

/// Whether `chart` is one of `excluded`, either bare or behind a release
/// prefix such as `osh-helm-toolkit`
pub fn is_excluded_chart(chart: &str, excluded: &[String]) -> bool {
    excluded.iter().any(|e| {
        chart == e
            || chart
                .strip_suffix(e.as_str())
                .is_some_and(|prefix| prefix.ends_with('-'))
    })
}

/// Progress strings written to `ApplicationRecord::progress`
pub mod progress {
    pub const EXTRACT_TARFILE: &str = "extracting application tar file";
    pub const VALIDATE_UPLOAD_CHARTS: &str = "validating and uploading charts";
    pub const GENERATE_OVERRIDES: &str = "generating application overrides";
    pub const DOWNLOAD_IMAGES: &str = "retrieving docker images";
    pub const APPLY_MANIFEST: &str = "applying application manifest";
    pub const DELETE_MANIFEST: &str = "deleting application manifest";
    pub const COMPLETED: &str = "completed";
    pub const ABORTED: &str = "operation aborted, check logs for detail";
}

/// Lifecycle status of an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppStatus {
    #[serde(rename = "uploading")]
    UploadInProgress,
    #[serde(rename = "uploaded")]
    UploadSuccess,
    #[serde(rename = "upload-failed")]
    UploadFailure,
    #[serde(rename = "applying")]
    ApplyInProgress,
    #[serde(rename = "applied")]
    ApplySuccess,
    #[serde(rename = "apply-failed")]
    ApplyFailure,
    #[serde(rename = "removing")]
    RemoveInProgress,
    #[serde(rename = "remove-failed")]
    RemoveFailure,
}

impl AppStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppStatus::UploadInProgress => "uploading",
            AppStatus::UploadSuccess => "uploaded",
            AppStatus::UploadFailure => "upload-failed",
            AppStatus::ApplyInProgress => "applying",
            AppStatus::ApplySuccess => "applied",
            AppStatus::ApplyFailure => "apply-failed",
            AppStatus::RemoveInProgress => "removing",
            AppStatus::RemoveFailure => "remove-failed",
        }
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            AppStatus::UploadInProgress | AppStatus::ApplyInProgress | AppStatus::RemoveInProgress
        )
    }

    /// The failure state an in-progress operation lands in when aborted
    pub fn aborted(&self) -> Option<AppStatus> {
        match self {
            AppStatus::UploadInProgress => Some(AppStatus::UploadFailure),
            AppStatus::ApplyInProgress => Some(AppStatus::ApplyFailure),
            AppStatus::RemoveInProgress => Some(AppStatus::RemoveFailure),
            _ => None,
        }
    }

    /// Success states always carry the "completed" progress string
    pub fn is_success(&self) -> bool {
        matches!(self, AppStatus::UploadSuccess | AppStatus::ApplySuccess)
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One chart of an application, in manifest order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChartRef {
    pub name: String,
    pub namespace: String,
}

impl ChartRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Name of the generated overrides file for this chart
    pub fn overrides_file_name(&self) -> String {
        format!("{}-{}.yaml", self.namespace, self.name)
    }
}

/// Where to look for the images an application needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageDiscovery {
    /// Overrides first, falling back to each chart's values files
    ChartOverrides,
    /// Every values file under the application directory
    ValuesFiles,
}

/// Platform-provided vs. user-uploaded application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppKind {
    System,
    Custom,
}

impl AppKind {
    pub fn for_name(name: &str, system: &SystemAppSettings) -> Self {
        if name == system.name {
            AppKind::System
        } else {
            AppKind::Custom
        }
    }

    pub fn image_discovery(&self) -> ImageDiscovery {
        match self {
            AppKind::System => ImageDiscovery::ChartOverrides,
            AppKind::Custom => ImageDiscovery::ValuesFiles,
        }
    }

    /// System apps are applied with generated overrides
    pub fn requires_overrides(&self) -> bool {
        matches!(self, AppKind::System)
    }

    /// System apps leave volumes and a namespace behind after removal
    pub fn cleans_cluster_on_remove(&self) -> bool {
        matches!(self, AppKind::System)
    }

    /// Whether a chart takes part in lint and progress accounting
    pub fn counts_chart(&self, chart: &str, excluded: &[String]) -> bool {
        match self {
            AppKind::System => !is_excluded_chart(chart, excluded),
            AppKind::Custom => true,
        }
    }

    /// Denominator for percent-complete calculations
    pub fn progress_total(&self, charts: &[ChartRef], excluded: &[String]) -> usize {
        charts
            .iter()
            .filter(|c| self.counts_chart(&c.name, excluded))
            .count()
    }

    /// Default node labels (controller, compute) the app always needs
    pub fn default_labels(&self, system: &SystemAppSettings) -> (Vec<String>, Vec<String>) {
        match self {
            AppKind::System => (system.controller_labels.clone(), system.compute_labels.clone()),
            AppKind::Custom => (Vec::new(), Vec::new()),
        }
    }
}

/// Persistent state of one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub name: String,
    pub status: AppStatus,
    #[serde(default)]
    pub progress: Option<String>,
    pub manifest_name: String,
    /// Manifest file name, relative to the extracted application directory
    pub manifest_file: String,
    /// Only valid while an upload is running
    #[serde(skip)]
    pub tarfile_path: Option<PathBuf>,
    #[serde(default)]
    pub charts: Vec<ChartRef>,
    pub kind: AppKind,
}

impl ApplicationRecord {
    pub fn new(
        name: impl Into<String>,
        manifest_name: impl Into<String>,
        manifest_file: impl Into<String>,
        kind: AppKind,
    ) -> Self {
        Self {
            name: name.into(),
            status: AppStatus::UploadInProgress,
            progress: None,
            manifest_name: manifest_name.into(),
            manifest_file: manifest_file.into(),
            tarfile_path: None,
            charts: Vec::new(),
            kind,
        }
    }

    pub fn is_system_app(&self) -> bool {
        self.kind == AppKind::System
    }
}

/// Filesystem locations derived from an application's name and manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Private extraction directory
    pub path: PathBuf,
    pub charts_dir: PathBuf,
    pub images_dir: PathBuf,
    pub metadata_file: PathBuf,
    /// Manifest inside the extraction directory
    pub manifest: PathBuf,
    /// Copy of the manifest in the synced directory
    pub synced_manifest: PathBuf,
    /// The synced copy as seen from inside the helper container
    pub helper_manifest: String,
    pub images_file: PathBuf,
}

impl AppPaths {
    pub fn new(layout: &PathSettings, app: &ApplicationRecord) -> Self {
        let path = layout.install_dir.join(&app.name);
        let synced_name = format!("{}-{}", app.name, app.manifest_file);
        Self {
            charts_dir: path.join("charts"),
            images_dir: path.join("images"),
            metadata_file: path.join("metadata.yaml"),
            manifest: path.join(&app.manifest_file),
            synced_manifest: layout.synced_dir.join(&synced_name),
            helper_manifest: Path::new("/manifests")
                .join(&synced_name)
                .to_string_lossy()
                .into_owned(),
            images_file: layout.synced_dir.join(format!("{}-images.yaml", app.name)),
            path,
        }
    }
}
