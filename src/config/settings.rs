//! Configuration file support for kubeapp

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub armada: ArmadaSettings,

    #[serde(default)]
    pub charts: ChartSettings,

    #[serde(default)]
    pub images: ImageSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub system_app: SystemAppSettings,

    #[serde(default)]
    pub behavior: Behavior,
}

/// Filesystem layout shared with the helper container
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PathSettings {
    /// Per-app private extraction directories live under here.
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// Synced manifests and image lists, mounted at /manifests in the helper.
    #[serde(default = "default_synced_dir")]
    pub synced_dir: PathBuf,

    /// Generated chart overrides, mounted at /overrides in the helper.
    #[serde(default = "default_overrides_dir")]
    pub overrides_dir: PathBuf,

    /// Application records are persisted here.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: PathBuf,
}

/// Helper container settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArmadaSettings {
    #[serde(default = "default_armada_image")]
    pub image: String,

    #[serde(default = "default_armada_container")]
    pub container_name: String,

    /// Owner given to the kube config copy so the helper can read it
    #[serde(default = "default_kube_config_uid")]
    pub kube_config_uid: u32,
}

/// Chart validation and upload
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChartSettings {
    #[serde(default = "default_upload_command")]
    pub upload_command: String,

    /// Prepended to PATH when running the upload command
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImageSettings {
    #[serde(default = "default_max_parallel_downloads")]
    pub max_parallel_downloads: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitorSettings {
    #[serde(default = "default_monitor_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
}

/// Platform-provided application settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemAppSettings {
    #[serde(default = "default_system_app_name")]
    pub name: String,

    #[serde(default = "default_system_app_namespace")]
    pub namespace: String,

    /// Infrastructure charts that carry no overrides and do not count
    /// towards progress.
    #[serde(default = "default_excluded_charts")]
    pub excluded_charts: Vec<String>,

    #[serde(default = "default_controller_labels")]
    pub controller_labels: Vec<String>,

    #[serde(default = "default_compute_labels")]
    pub compute_labels: Vec<String>,
}

/// Behavior settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Behavior {
    #[serde(default = "default_true")]
    pub confirm_destructive: bool,

    #[serde(default = "default_true")]
    pub show_progress: bool,
}

// Default value functions
fn default_install_dir() -> PathBuf {
    PathBuf::from("/scratch/apps")
}

fn default_synced_dir() -> PathBuf {
    PathBuf::from("/opt/platform/armada")
}

fn default_overrides_dir() -> PathBuf {
    PathBuf::from("/opt/platform/helm")
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/kubeapp")
}

fn default_kubeconfig() -> PathBuf {
    PathBuf::from("/etc/kubernetes/admin.conf")
}

fn default_armada_image() -> String {
    "quay.io/airshipit/armada:f807c3a1ec727c883c772ffc618f084d960ed5c9".to_string()
}

fn default_armada_container() -> String {
    "armada_service".to_string()
}

fn default_kube_config_uid() -> u32 {
    1000
}

fn default_upload_command() -> String {
    "helm-upload".to_string()
}

fn default_upload_path() -> String {
    "/usr/local/sbin".to_string()
}

fn default_max_parallel_downloads() -> usize {
    20
}

fn default_monitor_timeout_secs() -> u64 {
    3600
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_start_delay_ms() -> u64 {
    1000
}

fn default_system_app_name() -> String {
    "stx-openstack".to_string()
}

fn default_system_app_namespace() -> String {
    "openstack".to_string()
}

fn default_excluded_charts() -> Vec<String> {
    vec!["helm-toolkit".to_string()]
}

fn default_controller_labels() -> Vec<String> {
    vec!["openstack-control-plane=enabled".to_string()]
}

fn default_compute_labels() -> Vec<String> {
    vec![
        "openstack-compute-node=enabled".to_string(),
        "openvswitch=enabled".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            synced_dir: default_synced_dir(),
            overrides_dir: default_overrides_dir(),
            state_dir: default_state_dir(),
            kubeconfig: default_kubeconfig(),
        }
    }
}

impl PathSettings {
    /// Lay every directory out under one root. Used for sandboxed runs.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            install_dir: root.join("apps"),
            synced_dir: root.join("armada"),
            overrides_dir: root.join("helm"),
            state_dir: root.join("state"),
            kubeconfig: root.join("admin.conf"),
        }
    }
}

impl Default for ArmadaSettings {
    fn default() -> Self {
        Self {
            image: default_armada_image(),
            container_name: default_armada_container(),
            kube_config_uid: default_kube_config_uid(),
        }
    }
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            upload_command: default_upload_command(),
            upload_path: default_upload_path(),
        }
    }
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            max_parallel_downloads: default_max_parallel_downloads(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_monitor_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            start_delay_ms: default_start_delay_ms(),
        }
    }
}

impl MonitorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }
}

impl Default for SystemAppSettings {
    fn default() -> Self {
        Self {
            name: default_system_app_name(),
            namespace: default_system_app_namespace(),
            excluded_charts: default_excluded_charts(),
            controller_labels: default_controller_labels(),
            compute_labels: default_compute_labels(),
        }
    }
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            confirm_destructive: default_true(),
            show_progress: default_true(),
        }
    }
}

impl Settings {
    /// Load settings from file or return defaults
    pub fn load() -> Self {
        match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path).unwrap_or_else(|e| {
                crate::log_warn!("Ignoring config file {}: {:#}", path.display(), e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Load settings from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let settings: Settings = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(settings)
    }

    /// Find config file in standard locations
    /// Priority:
    /// 1. .kubeapp.toml in current directory
    /// 2. ~/.config/kubeapp/config.toml (XDG config directory)
    fn find_config_file() -> Option<PathBuf> {
        let local_config = PathBuf::from(".kubeapp.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("kubeapp").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Generate example config file content
    pub fn example_config() -> Result<String> {
        let header = "# kubeapp configuration file\n\
                      # Place this file at ~/.config/kubeapp/config.toml or .kubeapp.toml\n\n";
        let body = toml::to_string_pretty(&Settings::default())
            .context("Failed to serialize default settings")?;
        Ok(format!("{}{}", header, body))
    }
}
