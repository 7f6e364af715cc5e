//! In-memory fakes for the orchestrator's ports

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use super::armada::APPLY_SUCCESS_MSG;
use super::charts::ChartTool;
use super::operator::{AppOperator, Collaborators};
use super::overrides::OverrideGenerator;
use super::record::{AppKind, AppPaths, AppStatus, ApplicationRecord, ChartRef, progress};
use super::store::{AppStore, StoreError};
use crate::config::images::save_image_list;
use crate::config::settings::{PathSettings, Settings};
use crate::k8s::cleanup::ClusterCleanup;
use crate::k8s::nodes::{LabelPatch, NodeInfo, NodeLabeler, Personality};
use crate::utils::container::{ContainerEngine, ContainerError, ExecOutput, RunSpec};

// ---- Store ----

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, ApplicationRecord>>,
    saves: Mutex<Vec<ApplicationRecord>>,
}

impl MemoryStore {
    pub fn save_count(&self) -> usize {
        self.saves.lock().unwrap().len()
    }

    /// Every progress value persisted for `name`, in order
    pub fn saved_progress(&self, name: &str) -> Vec<String> {
        self.saves
            .lock()
            .unwrap()
            .iter()
            .filter(|app| app.name == name)
            .filter_map(|app| app.progress.clone())
            .collect()
    }
}

#[async_trait]
impl AppStore for MemoryStore {
    async fn get(&self, name: &str) -> Result<Option<ApplicationRecord>, StoreError> {
        Ok(self.records.lock().unwrap().get(name).cloned())
    }

    async fn create(&self, app: &ApplicationRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&app.name) {
            return Err(StoreError::AlreadyExists(app.name.clone()));
        }
        records.insert(app.name.clone(), app.clone());
        Ok(())
    }

    async fn save(&self, app: &ApplicationRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let Some(slot) = records.get_mut(&app.name) else {
            return Err(StoreError::NotFound(app.name.clone()));
        };
        *slot = app.clone();
        self.saves.lock().unwrap().push(app.clone());
        Ok(())
    }

    async fn destroy(&self, name: &str) -> Result<(), StoreError> {
        match self.records.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<ApplicationRecord>, StoreError> {
        Ok(self.records.lock().unwrap().values().cloned().collect())
    }
}

// ---- Container engine ----

type ExecHandler = Arc<dyn Fn(&[String]) -> Result<ExecOutput, ContainerError> + Send + Sync>;

/// Scripted container engine.
///
/// Without a handler, grep finds nothing, an apply prints the completion
/// marker and every other command succeeds silently.
pub struct FakeEngine {
    state: Mutex<Option<String>>,
    restarts: AtomicUsize,
    launched: Mutex<Vec<RunSpec>>,
    exec_calls: Mutex<Vec<Vec<String>>>,
    handler: Mutex<Option<ExecHandler>>,
    apply_delay: Mutex<Duration>,
    applying: AtomicUsize,
    max_applying: AtomicUsize,
    failing_pulls: Mutex<BTreeSet<String>>,
    pulled: Mutex<Vec<String>>,
    pull_delay: Mutex<Duration>,
    pulling: AtomicUsize,
    max_pulling: AtomicUsize,
}

impl FakeEngine {
    pub fn with_state(state: Option<&str>) -> Self {
        Self {
            state: Mutex::new(state.map(str::to_string)),
            restarts: AtomicUsize::new(0),
            launched: Mutex::new(Vec::new()),
            exec_calls: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            apply_delay: Mutex::new(Duration::ZERO),
            applying: AtomicUsize::new(0),
            max_applying: AtomicUsize::new(0),
            failing_pulls: Mutex::new(BTreeSet::new()),
            pulled: Mutex::new(Vec::new()),
            pull_delay: Mutex::new(Duration::ZERO),
            pulling: AtomicUsize::new(0),
            max_pulling: AtomicUsize::new(0),
        }
    }

    pub fn running() -> Self {
        Self::with_state(Some("running"))
    }

    pub fn on_exec<F>(&self, handler: F)
    where
        F: Fn(&[String]) -> Result<ExecOutput, ContainerError> + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Some(Arc::new(handler));
    }

    pub fn exec_calls(&self) -> Vec<Vec<String>> {
        self.exec_calls.lock().unwrap().clone()
    }

    pub fn restarts(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn launched(&self) -> Vec<RunSpec> {
        self.launched.lock().unwrap().clone()
    }

    pub fn set_apply_delay(&self, delay: Duration) {
        *self.apply_delay.lock().unwrap() = delay;
    }

    pub fn apply_calls(&self) -> usize {
        self.exec_calls().iter().filter(|cmd| is_apply(cmd)).count()
    }

    /// Shell command of the most recent apply
    pub fn apply_command(&self) -> Option<String> {
        self.exec_calls()
            .into_iter()
            .rev()
            .find(|cmd| is_apply(cmd))
            .and_then(|cmd| cmd.get(2).cloned())
    }

    pub fn max_concurrent_applies(&self) -> usize {
        self.max_applying.load(Ordering::SeqCst)
    }

    pub fn fail_pull(&self, image: &str) {
        self.failing_pulls.lock().unwrap().insert(image.to_string());
    }

    pub fn pulled(&self) -> Vec<String> {
        self.pulled.lock().unwrap().clone()
    }

    pub fn set_pull_delay(&self, delay: Duration) {
        *self.pull_delay.lock().unwrap() = delay;
    }

    pub fn max_concurrent_pulls(&self) -> usize {
        self.max_pulling.load(Ordering::SeqCst)
    }
}

fn is_apply(cmd: &[String]) -> bool {
    cmd.get(2).is_some_and(|c| c.contains("armada apply"))
}

fn default_exec(cmd: &[String]) -> ExecOutput {
    if cmd.first().is_some_and(|c| c == "grep") {
        return ExecOutput {
            exit_code: 1,
            output: String::new(),
        };
    }
    let output = if is_apply(cmd) {
        format!("{}.\n", APPLY_SUCCESS_MSG)
    } else {
        String::new()
    };
    ExecOutput {
        exit_code: 0,
        output,
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn container_state(&self, _name: &str) -> Result<Option<String>, ContainerError> {
        Ok(self.state.lock().unwrap().clone())
    }

    async fn restart(&self, _name: &str) -> Result<(), ContainerError> {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        *self.state.lock().unwrap() = Some("running".to_string());
        Ok(())
    }

    async fn run_detached(&self, spec: &RunSpec) -> Result<(), ContainerError> {
        self.launched.lock().unwrap().push(spec.clone());
        *self.state.lock().unwrap() = Some("running".to_string());
        Ok(())
    }

    async fn exec(&self, _name: &str, cmd: &[String]) -> Result<ExecOutput, ContainerError> {
        self.exec_calls.lock().unwrap().push(cmd.to_vec());

        if is_apply(cmd) {
            let now = self.applying.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_applying.fetch_max(now, Ordering::SeqCst);
            let delay = *self.apply_delay.lock().unwrap();
            tokio::time::sleep(delay).await;
            self.applying.fetch_sub(1, Ordering::SeqCst);
        }

        let handler = self.handler.lock().unwrap().clone();
        match handler {
            Some(handler) => handler(cmd),
            None => Ok(default_exec(cmd)),
        }
    }

    async fn pull(&self, image: &str) -> Result<(), ContainerError> {
        self.pulled.lock().unwrap().push(image.to_string());
        let now = self.pulling.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_pulling.fetch_max(now, Ordering::SeqCst);
        let delay = *self.pull_delay.lock().unwrap();
        tokio::time::sleep(delay).await;
        self.pulling.fetch_sub(1, Ordering::SeqCst);

        if self.failing_pulls.lock().unwrap().contains(image) {
            return Err(ContainerError::Failed {
                command: format!("pull {}", image),
                stderr: "manifest unknown".to_string(),
            });
        }
        Ok(())
    }
}

// ---- Charts and overrides ----

#[derive(Default)]
pub struct FakeCharts {
    failing: Mutex<BTreeSet<String>>,
    uploaded: Mutex<Vec<PathBuf>>,
}

impl FakeCharts {
    /// Make lint fail for the chart directory called `chart`
    pub fn fail_lint(&self, chart: &str) {
        self.failing.lock().unwrap().insert(chart.to_string());
    }

    pub fn uploaded(&self) -> Vec<PathBuf> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChartTool for FakeCharts {
    async fn lint(&self, chart_dir: &Path) -> Result<bool> {
        let name = chart_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(!self.failing.lock().unwrap().contains(&name))
    }

    async fn upload(&self, package: &Path) -> Result<()> {
        self.uploaded.lock().unwrap().push(package.to_path_buf());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeOverrides {
    generated: Mutex<Vec<String>>,
    removed: Mutex<Vec<ChartRef>>,
}

impl FakeOverrides {
    pub fn generated(&self) -> Vec<String> {
        self.generated.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<ChartRef> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl OverrideGenerator for FakeOverrides {
    async fn generate_overrides(&self, app_name: &str) -> Result<()> {
        self.generated.lock().unwrap().push(app_name.to_string());
        Ok(())
    }

    async fn remove_chart_overrides(&self, chart: &ChartRef) -> Result<()> {
        self.removed.lock().unwrap().push(chart.clone());
        Ok(())
    }
}

// ---- Cluster ----

pub struct FakeLabeler {
    nodes: Vec<NodeInfo>,
    patches: Mutex<BTreeMap<String, LabelPatch>>,
}

impl FakeLabeler {
    pub fn new(controllers: &[&str], computes: &[&str]) -> Self {
        let node = |name: &&str, personality| NodeInfo {
            name: name.to_string(),
            personality,
        };
        let nodes = controllers
            .iter()
            .map(|n| node(n, Personality::Controller))
            .chain(computes.iter().map(|n| node(n, Personality::Compute)))
            .collect();
        Self {
            nodes,
            patches: Mutex::new(BTreeMap::new()),
        }
    }

    /// All patches applied so far, merged per node
    pub fn patches(&self) -> BTreeMap<String, LabelPatch> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeLabeler for FakeLabeler {
    async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        Ok(self.nodes.clone())
    }

    async fn patch_labels(&self, node: &str, labels: &LabelPatch) -> Result<()> {
        self.patches
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .extend(labels.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCleanup {
    fail_namespace: AtomicBool,
    namespaces: Mutex<Vec<String>>,
}

impl FakeCleanup {
    pub fn fail_namespace_deletion(&self) {
        self.fail_namespace.store(true, Ordering::SeqCst);
    }

    pub fn namespace_attempts(&self) -> Vec<String> {
        self.namespaces.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterCleanup for FakeCleanup {
    async fn delete_bound_volumes(&self, _namespace: &str) -> Result<usize> {
        Ok(0)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        self.namespaces.lock().unwrap().push(namespace.to_string());
        if self.fail_namespace.load(Ordering::SeqCst) {
            return Err(anyhow!("namespace {} is stuck terminating", namespace));
        }
        Ok(())
    }
}

// ---- Fixtures ----

/// Manifest declaring `charts` as (chart, namespace) pairs
pub fn manifest_yaml(charts: &[(&str, &str)]) -> String {
    let mut yaml = String::new();
    for (name, namespace) in charts {
        yaml.push_str(&format!(
            "---\nschema: armada/Chart/v1\nmetadata:\n  schema: metadata/Document/v1\n  name: {namespace}-{name}\ndata:\n  chart_name: {name}\n  namespace: {namespace}\n"
        ));
    }
    yaml.push_str(
        "---\nschema: armada/Manifest/v1\nmetadata:\n  schema: metadata/Document/v1\n  name: armada-manifest\ndata:\n  release_prefix: app\n",
    );
    yaml
}

fn tar(args: &[&str], dir: &Path) {
    let status = Command::new("tar")
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap();
    assert!(status.success());
}

/// Application tarball with one packaged chart per (chart, image) pair.
/// An empty image leaves the chart without image tags.
pub fn build_app_tarball(root: &Path, charts: &[(&str, &str)]) -> PathBuf {
    let staging = root.join("staging");
    let src = root.join("tarball-src");
    fs::create_dir_all(src.join("charts")).unwrap();

    let manifest: Vec<(&str, &str)> = charts.iter().map(|(name, _)| (*name, "default")).collect();
    fs::write(src.join("manifest.yaml"), manifest_yaml(&manifest)).unwrap();

    for (name, image) in charts {
        let chart = staging.join(name);
        fs::create_dir_all(&chart).unwrap();
        fs::write(
            chart.join("Chart.yaml"),
            format!("apiVersion: v1\nname: {}\nversion: 0.1.0\n", name),
        )
        .unwrap();
        let values = if image.is_empty() {
            "replicas: 1\n".to_string()
        } else {
            format!("images:\n  tags:\n    {}: {}\n", name, image)
        };
        fs::write(chart.join("values.yaml"), values).unwrap();

        let package = src.join("charts").join(format!("{}-0.1.0.tgz", name));
        let package = package.to_string_lossy().into_owned();
        tar(&["-czf", package.as_str(), *name], &staging);
    }

    let tarfile = root.join("app.tgz");
    let target = tarfile.to_string_lossy().into_owned();
    tar(&["-czf", target.as_str(), "manifest.yaml", "charts"], &src);
    tarfile
}

/// A sandboxed operator environment
pub struct Fixture {
    dir: TempDir,
    pub settings: Settings,
    pub store: Arc<MemoryStore>,
    pub engine: Arc<FakeEngine>,
    pub charts: Arc<FakeCharts>,
    pub overrides: Arc<FakeOverrides>,
    pub labeler: Arc<FakeLabeler>,
    pub cleanup: Arc<FakeCleanup>,
}

impl Fixture {
    /// All-in-one cluster with a running helper
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.paths = PathSettings::rooted_at(dir.path());
        settings.monitor.start_delay_ms = 0;
        settings.monitor.poll_interval_ms = 5;
        settings.monitor.timeout_secs = 10;
        for path in [
            &settings.paths.install_dir,
            &settings.paths.synced_dir,
            &settings.paths.overrides_dir,
        ] {
            fs::create_dir_all(path).unwrap();
        }

        Self {
            dir,
            settings,
            store: Arc::new(MemoryStore::default()),
            engine: Arc::new(FakeEngine::running()),
            charts: Arc::new(FakeCharts::default()),
            overrides: Arc::new(FakeOverrides::default()),
            labeler: Arc::new(FakeLabeler::new(&["controller-0"], &[])),
            cleanup: Arc::new(FakeCleanup::default()),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn operator(&self) -> AppOperator {
        AppOperator::new(
            self.settings.clone(),
            Collaborators {
                store: self.store.clone(),
                engine: self.engine.clone(),
                charts: self.charts.clone(),
                overrides: self.overrides.clone(),
                labeler: self.labeler.clone(),
                cleanup: self.cleanup.clone(),
            },
        )
    }

    /// An already uploaded app with its manifest and image list in place
    pub async fn seed(
        &self,
        name: &str,
        status: AppStatus,
        kind: AppKind,
        charts: &[(&str, &str)],
    ) -> ApplicationRecord {
        let mut app =
            ApplicationRecord::new(name, format!("{}-manifest", name), "manifest.yaml", kind);
        app.status = status;
        if status.is_success() {
            app.progress = Some(progress::COMPLETED.to_string());
        }

        let paths = AppPaths::new(&self.settings.paths, &app);
        fs::create_dir_all(&paths.path).unwrap();
        let manifest = manifest_yaml(charts);
        fs::write(&paths.manifest, &manifest).unwrap();
        fs::write(&paths.synced_manifest, &manifest).unwrap();
        save_image_list(&paths.images_file, &["docker.io/nginx:1.25".to_string()]).unwrap();

        self.store.create(&app).await.unwrap();
        app
    }

    pub fn write_overrides(&self, files: &[&str]) {
        for file in files {
            fs::write(
                self.settings.paths.overrides_dir.join(file),
                "data:\n  values: {}\n",
            )
            .unwrap();
        }
    }

    pub fn write_metadata(&self, app: &ApplicationRecord, content: &str) {
        let paths = AppPaths::new(&self.settings.paths, app);
        fs::write(paths.metadata_file, content).unwrap();
    }
}
