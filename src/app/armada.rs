//! Helper container lifecycle and manifest operations run inside it

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::settings::Settings;
use crate::utils::container::{Bind, ContainerEngine, ContainerError, ExecOutput, RunSpec};

/// Exit code reported when the helper process is killed mid-operation
pub const ABNORMAL_EXIT_CODE: i32 = 137;

/// Printed by the helper once every step of an apply has finished
pub const APPLY_SUCCESS_MSG: &str = "Done applying manifest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestOp {
    Validate,
    Apply,
    Delete,
}

impl ManifestOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManifestOp::Validate => "validate",
            ManifestOp::Apply => "apply",
            ManifestOp::Delete => "delete",
        }
    }

    /// Log file name, relative to the helper's working directory
    pub fn log_file(&self, app_name: &str) -> String {
        format!("{}-{}.log", app_name, self.as_str())
    }

    /// Command line executed inside the helper
    fn command(&self, manifest: &str, overrides: &str, log_file: &str) -> Vec<String> {
        let manifest = shell_words::quote(manifest);
        let log_file = shell_words::quote(log_file);
        match self {
            ManifestOp::Validate => vec![
                "armada".to_string(),
                "validate".to_string(),
                manifest.into_owned(),
            ],
            ManifestOp::Apply => vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                format!("armada apply --debug {}{} | tee {}", manifest, overrides, log_file),
            ],
            ManifestOp::Delete => vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                format!("armada delete --debug --manifest {} | tee {}", manifest, log_file),
            ],
        }
    }
}

/// How a finished helper command is judged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    /// Exit code 0 without the apply completion marker
    FalsePositive,
    /// The helper process crashed mid-operation
    AbnormalExit,
    Failed,
}

impl Verdict {
    pub fn judge(op: ManifestOp, result: &ExecOutput) -> Self {
        match result.exit_code {
            0 if op == ManifestOp::Apply && !result.output.contains(APPLY_SUCCESS_MSG) => {
                Verdict::FalsePositive
            }
            0 => Verdict::Success,
            ABNORMAL_EXIT_CODE => Verdict::AbnormalExit,
            _ => Verdict::Failed,
        }
    }
}

/// Launch parameters for the helper container
#[derive(Debug, Clone)]
pub struct HelperConfig {
    pub container_name: String,
    pub image: String,
    pub kube_config_source: PathBuf,
    pub kube_config_uid: u32,
    pub synced_dir: PathBuf,
    pub overrides_dir: PathBuf,
}

impl From<&Settings> for HelperConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            container_name: settings.armada.container_name.clone(),
            image: settings.armada.image.clone(),
            kube_config_source: settings.paths.kubeconfig.clone(),
            kube_config_uid: settings.armada.kube_config_uid,
            synced_dir: settings.paths.synced_dir.clone(),
            overrides_dir: settings.paths.overrides_dir.clone(),
        }
    }
}

/// The long-lived helper container.
///
/// One instance is shared by everything in the process. It is started on
/// first use and checked (restarted if stopped) before every request.
pub struct ArmadaService {
    engine: Arc<dyn ContainerEngine>,
    config: HelperConfig,
    start_lock: Mutex<()>,
}

impl ArmadaService {
    pub fn new(engine: Arc<dyn ContainerEngine>, config: HelperConfig) -> Self {
        Self {
            engine,
            config,
            start_lock: Mutex::new(()),
        }
    }

    pub fn container_name(&self) -> &str {
        &self.config.container_name
    }

    /// Make sure the helper is running, starting or restarting it as needed
    pub async fn ensure_running(&self) -> Result<()> {
        let _guard = self.start_lock.lock().await;
        let name = &self.config.container_name;

        match self.engine.container_state(name).await? {
            Some(state) if state == "running" => Ok(()),
            Some(state) => {
                tracing::info!(container = %name, %state, "Restarting Armada service...");
                self.engine.restart(name).await?;
                Ok(())
            }
            None => self.start().await,
        }
    }

    async fn start(&self) -> Result<()> {
        tracing::info!("Starting Armada service...");
        let kube_config = self.stage_kube_config()?;
        tracing::info!(
            "kube_config={}, manifests_dir={}, overrides_dir={}",
            kube_config.display(),
            self.config.synced_dir.display(),
            self.config.overrides_dir.display()
        );

        let spec = RunSpec {
            name: self.config.container_name.clone(),
            image: self.config.image.clone(),
            binds: vec![
                Bind {
                    host: kube_config.clone(),
                    container: "/armada/.kube/config".to_string(),
                    read_only: true,
                },
                Bind {
                    host: self.config.synced_dir.clone(),
                    container: "/manifests".to_string(),
                    read_only: true,
                },
                Bind {
                    host: self.config.overrides_dir.clone(),
                    container: "/overrides".to_string(),
                    read_only: true,
                },
            ],
            restart_always: true,
        };

        if let Err(e) = self.engine.run_detached(&spec).await {
            let _ = fs::remove_file(&kube_config);
            return Err(e).context("Docker error while launching Armada container");
        }
        tracing::info!("Armada service started!");
        Ok(())
    }

    /// Copy the cluster credentials somewhere the helper's user can read them
    fn stage_kube_config(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.config.synced_dir)?;
        let target = self.config.synced_dir.join("admin.conf");
        fs::copy(&self.config.kube_config_source, &target).with_context(|| {
            format!(
                "Unable to make kubernetes config {} accessible to armada",
                self.config.kube_config_source.display()
            )
        })?;
        std::os::unix::fs::chown(&target, Some(self.config.kube_config_uid), None)
            .with_context(|| format!("Unable to change owner of {}", target.display()))?;
        Ok(target)
    }

    /// Run a command in the helper without checking its health first
    pub async fn exec(&self, cmd: &[String]) -> Result<ExecOutput, ContainerError> {
        self.engine.exec(&self.config.container_name, cmd).await
    }
}

/// Runs validate/apply/delete against a manifest in the helper container.
///
/// Never fails past its boundary: every problem is logged and reported as
/// `false`.
#[derive(Clone)]
pub struct ManifestRunner {
    service: Arc<ArmadaService>,
}

impl ManifestRunner {
    pub fn new(service: Arc<ArmadaService>) -> Self {
        Self { service }
    }

    pub async fn run(&self, op: ManifestOp, manifest: &str, overrides: &str, log_file: &str) -> bool {
        if let Err(e) = self.service.ensure_running().await {
            tracing::error!(
                "Armada request {} for manifest {} failed: {:#}",
                op.as_str(),
                manifest,
                e
            );
            return false;
        }

        let cmd = op.command(manifest, overrides, log_file);
        if op == ManifestOp::Apply {
            tracing::info!("Armada apply command = {}", cmd.join(" "));
        }

        let result = match self.service.exec(&cmd).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(
                    "Armada request {} for manifest {} failed: {}",
                    op.as_str(),
                    manifest,
                    e
                );
                return false;
            }
        };

        match Verdict::judge(op, &result) {
            Verdict::Success => {
                match op {
                    ManifestOp::Validate => {
                        tracing::info!("Manifest file {} was successfully validated.", manifest)
                    }
                    ManifestOp::Apply => tracing::info!(
                        "Application manifest {} was successfully applied/re-applied.",
                        manifest
                    ),
                    ManifestOp::Delete => {
                        tracing::info!("Application charts were successfully deleted.")
                    }
                }
                true
            }
            Verdict::FalsePositive => {
                tracing::error!(
                    "Received a false positive response from Docker/Armada. Failed to apply application manifest {}: {}",
                    manifest,
                    result.output
                );
                false
            }
            Verdict::AbnormalExit => {
                tracing::error!(
                    "Failed to {} application manifest {}. Armada service has exited abnormally.",
                    op.as_str(),
                    manifest
                );
                false
            }
            Verdict::Failed => {
                tracing::error!(
                    "Failed to {} application manifest {}: {}",
                    op.as_str(),
                    manifest,
                    result.output
                );
                false
            }
        }
    }
}
