//! Application lifecycle pipelines: upload, apply, remove and delete

use anyhow::{Context, Result, bail};
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use super::armada::{ArmadaService, HelperConfig, ManifestOp, ManifestRunner};
use super::charts::{ChartTool, chart_dirs, chart_packages};
use super::error::AppError;
use super::images::ImageFetcher;
use super::lock::{StateLock, StateLockGuard};
use super::monitor::{
    APPLY_SEARCH_PATTERN, DELETE_SEARCH_PATTERN, MonitorTarget, MonitorTiming, ProgressMonitor,
};
use super::overrides::{OverrideGenerator, OverridesDir, make_readable, overrides_arg};
use super::record::{
    AppKind, AppPaths, AppStatus, ApplicationRecord, ChartRef, ImageDiscovery, is_valid_app_name,
    progress,
};
use super::status::StatusTracker;
use super::store::{AppStore, StoreError};
use crate::config::images::{
    load_image_list, save_image_list, tags_for_charts, tags_from_values_files,
};
use crate::config::manifest::{ManifestInfo, charts_from_manifest, find_manifest, load_node_labels};
use crate::config::settings::Settings;
use crate::k8s::cleanup::ClusterCleanup;
use crate::k8s::nodes::{LabelOp, NodeLabeler, process_node_labels};
use crate::utils::archive::{
    extract_nested_charts, extract_tarball, is_tarball_name, verify_checksums,
};
use crate::utils::container::ContainerEngine;
use crate::utils::paths::{remove_dir_if_exists, remove_file_if_exists};

/// External services the operator drives
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn AppStore>,
    pub engine: Arc<dyn ContainerEngine>,
    pub charts: Arc<dyn ChartTool>,
    pub overrides: Arc<dyn OverrideGenerator>,
    pub labeler: Arc<dyn NodeLabeler>,
    pub cleanup: Arc<dyn ClusterCleanup>,
}

/// Result of the apply steps short of a failure
enum ApplyOutcome {
    Applied,
    /// Overrides are not all in place yet
    NotReady,
}

/// Orchestrates the application lifecycle.
///
/// Every pipeline runs under an in-process mutex plus an advisory file lock
/// in the state directory, so operations on all applications are
/// serialized across kubeapp processes. Precondition checks happen under
/// the locks too, which means a second request for the same application
/// observes the first one's final status.
pub struct AppOperator {
    settings: Settings,
    store: Arc<dyn AppStore>,
    charts: Arc<dyn ChartTool>,
    overrides: Arc<dyn OverrideGenerator>,
    labeler: Arc<dyn NodeLabeler>,
    cluster: Arc<dyn ClusterCleanup>,
    overrides_dir: OverridesDir,
    runner: ManifestRunner,
    fetcher: ImageFetcher,
    monitor: ProgressMonitor,
    lock: Mutex<()>,
    state_lock: StateLock,
}

impl AppOperator {
    pub fn new(settings: Settings, deps: Collaborators) -> Self {
        let service = Arc::new(ArmadaService::new(
            Arc::clone(&deps.engine),
            HelperConfig::from(&settings),
        ));
        Self {
            overrides_dir: OverridesDir::new(
                settings.paths.overrides_dir.clone(),
                settings.system_app.excluded_charts.clone(),
            ),
            runner: ManifestRunner::new(Arc::clone(&service)),
            fetcher: ImageFetcher::new(deps.engine, settings.images.max_parallel_downloads),
            monitor: ProgressMonitor::new(service, MonitorTiming::from(&settings.monitor)),
            store: deps.store,
            charts: deps.charts,
            overrides: deps.overrides,
            labeler: deps.labeler,
            cluster: deps.cleanup,
            state_lock: StateLock::new(&settings.paths.state_dir),
            settings,
            lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn AppStore> {
        &self.store
    }

    fn paths(&self, app: &ApplicationRecord) -> AppPaths {
        AppPaths::new(&self.settings.paths, app)
    }

    /// Take both locks. Held for a whole pipeline.
    async fn exclusive(&self) -> Result<(MutexGuard<'_, ()>, StateLockGuard), AppError> {
        let local = self.lock.lock().await;
        let shared = self.state_lock.acquire().await?;
        Ok((local, shared))
    }

    /// Fetch a record for a new operation. Must be called under the locks.
    ///
    /// No pipeline can be running while the locks are held, so an
    /// in-progress status belongs to a process that died mid-operation. It
    /// is moved to that operation's failure state first.
    async fn load(&self, name: &str) -> Result<ApplicationRecord, AppError> {
        if !is_valid_app_name(name) {
            return Err(AppError::InvalidName(name.to_string()));
        }
        let mut app = self
            .store
            .get(name)
            .await?
            .ok_or_else(|| AppError::NotFound(name.to_string()))?;

        if let Some(failed) = app.status.aborted() {
            tracing::warn!(
                app = %name,
                "Application {} was left {} by an interrupted operation, marking it {}",
                name,
                app.status,
                failed
            );
            app.status = failed;
            app.progress = Some(progress::ABORTED.to_string());
            self.store.save(&app).await?;
        }
        Ok(app)
    }

    fn require_status(
        app: &ApplicationRecord,
        operation: &'static str,
        allowed: &[AppStatus],
    ) -> Result<(), AppError> {
        if allowed.contains(&app.status) {
            return Ok(());
        }
        Err(AppError::InvalidState {
            name: app.name.clone(),
            operation,
            status: app.status,
        })
    }

    // ---- Upload ----

    /// Admit a tarball, create the record and run the upload pipeline.
    ///
    /// Admission problems are returned as errors and leave no record behind.
    /// Once the record exists the outcome is only reported through its
    /// status.
    pub async fn perform_upload(
        &self,
        name: &str,
        tarfile: &Path,
    ) -> Result<ApplicationRecord, AppError> {
        if !is_valid_app_name(name) {
            return Err(AppError::upload(
                name,
                "invalid application name, use lowercase letters, digits and '-'",
            ));
        }
        let _guard = self.exclusive().await?;

        if self.store.get(name).await?.is_some() {
            return Err(AppError::AlreadyExists(name.to_string()));
        }
        let manifest = admit_tarball(tarfile)
            .await
            .map_err(|e| AppError::upload(name, format!("{:#}", e)))?;

        let kind = AppKind::for_name(name, &self.settings.system_app);
        let mut app = ApplicationRecord::new(name, manifest.name, manifest.file, kind);
        app.tarfile_path = Some(tarfile.to_path_buf());
        match self.store.create(&app).await {
            Ok(()) => {}
            Err(StoreError::AlreadyExists(_)) => return Err(AppError::AlreadyExists(name.to_string())),
            Err(e) => return Err(e.into()),
        }

        tracing::info!("Application ({}) upload started.", name);
        let tracker = StatusTracker::new(app, Arc::clone(&self.store));
        match self.upload_steps(&tracker).await {
            Ok(()) => {
                tracker.update(Some(AppStatus::UploadSuccess), None).await?;
                tracing::info!("Application ({}) upload completed.", name);
            }
            Err(e) => {
                tracing::error!("{:#}", e);
                tracker.abort("upload").await?;
            }
        }
        Ok(tracker.snapshot().await)
    }

    async fn upload_steps(&self, tracker: &StatusTracker) -> Result<()> {
        tracker.set_progress(progress::EXTRACT_TARFILE).await?;
        let app = tracker.snapshot().await;
        let paths = self.paths(&app);
        let tarfile = app
            .tarfile_path
            .clone()
            .context("no tarfile supplied for upload")?;

        self.extract(&app, &paths, &tarfile)
            .await
            .context("failed to extract tarfile content.")?;
        fs::copy(&paths.manifest, &paths.synced_manifest).with_context(|| {
            format!("Failed to copy manifest to {}", paths.synced_manifest.display())
        })?;

        if !self
            .runner
            .run(ManifestOp::Validate, &paths.helper_manifest, "", "")
            .await
        {
            bail!("manifest {} failed validation.", app.manifest_file);
        }

        tracker.set_progress(progress::VALIDATE_UPLOAD_CHARTS).await?;
        if paths.charts_dir.is_dir() {
            self.validate_charts(&app, &paths).await?;
            // The upload helper runs as another user and needs to traverse
            // the install directory
            let _mode = ModeGuard::set(&self.settings.paths.install_dir, 0o755)?;
            self.upload_charts(&app, &paths).await?;
        }

        self.save_images_list(tracker, &paths).await
    }

    async fn extract(&self, app: &ApplicationRecord, paths: &AppPaths, tarfile: &Path) -> Result<()> {
        for dir in [
            &self.settings.paths.install_dir,
            &self.settings.paths.synced_dir,
            &paths.path,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        extract_tarball(tarfile, &paths.path).await?;
        if paths.charts_dir.is_dir() {
            let nested = extract_nested_charts(&paths.charts_dir).await?;
            tracing::debug!(app = %app.name, "Extracted {} chart package(s)", nested.len());
        }
        Ok(())
    }

    async fn validate_charts(&self, app: &ApplicationRecord, paths: &AppPaths) -> Result<()> {
        let mut failed = Vec::new();
        let excluded = &self.settings.system_app.excluded_charts;
        for dir in chart_dirs(&paths.charts_dir)? {
            // Subcharts belong to the top-level chart they sit under
            let owner = dir
                .strip_prefix(&paths.charts_dir)
                .ok()
                .and_then(|rel| rel.components().next())
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .unwrap_or_default();
            if !app.kind.counts_chart(&owner, excluded) {
                continue;
            }
            let chart = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.charts.lint(&dir).await? {
                tracing::info!("Helm chart {} validated", chart);
            } else {
                tracing::error!("Validation failed for helm chart {}", chart);
                failed.push(chart);
            }
        }
        if !failed.is_empty() {
            bail!("one or more charts failed validation: {}", failed.join(", "));
        }
        Ok(())
    }

    async fn upload_charts(&self, app: &ApplicationRecord, paths: &AppPaths) -> Result<()> {
        for package in chart_packages(&paths.charts_dir)? {
            self.charts
                .upload(&package)
                .await
                .with_context(|| format!("Failed to upload {}", package.display()))?;
            tracing::info!(app = %app.name, "Helm chart {} uploaded", package.display());
        }
        Ok(())
    }

    /// Work out the images an app needs and persist them next to the
    /// synced manifest
    async fn save_images_list(&self, tracker: &StatusTracker, paths: &AppPaths) -> Result<()> {
        let app = tracker.snapshot().await;
        let images = match app.kind.image_discovery() {
            ImageDiscovery::ChartOverrides => {
                tracing::info!("Generating application overrides...");
                self.overrides.generate_overrides(&app.name).await?;
                let charts = charts_from_manifest(&paths.synced_manifest)?;
                tracker.set_charts(charts.clone()).await?;
                tags_for_charts(&paths.charts_dir, self.overrides_dir.dir(), &charts)?
            }
            ImageDiscovery::ValuesFiles => tags_from_values_files(&paths.path)?,
        };

        if images.is_empty() {
            bail!("charts specify no docker images.");
        }
        let images: Vec<String> = images.into_iter().collect();
        save_image_list(&paths.images_file, &images)
    }

    // ---- Apply ----

    /// Apply an uploaded application. Returns whether the manifest was
    /// applied.
    ///
    /// When the overrides are not all generated yet the app is left exactly
    /// as it was and `false` is returned, so the caller can retry later.
    pub async fn perform_apply(&self, name: &str) -> Result<bool, AppError> {
        let _guard = self.exclusive().await?;
        let app = self.load(name).await?;
        Self::require_status(
            &app,
            "apply",
            &[
                AppStatus::UploadSuccess,
                AppStatus::ApplyFailure,
                AppStatus::ApplySuccess,
            ],
        )?;

        tracing::info!("Application ({}) apply started.", name);
        let prior = (app.status, app.progress.clone());
        let tracker = StatusTracker::new(app, Arc::clone(&self.store));
        tracker.begin(AppStatus::ApplyInProgress).await?;

        match self.apply_steps(&tracker).await {
            Ok(ApplyOutcome::Applied) => {
                tracker.update(Some(AppStatus::ApplySuccess), None).await?;
                tracing::info!("Application ({}) apply completed.", name);
                Ok(true)
            }
            Ok(ApplyOutcome::NotReady) => {
                tracing::warn!(
                    "Application ({}) is not ready to be applied, overrides are missing.",
                    name
                );
                tracker.restore(prior.0, prior.1).await?;
                Ok(false)
            }
            Err(e) => {
                tracing::error!("{:#}", e);
                tracker.abort("apply").await?;
                Ok(false)
            }
        }
    }

    async fn apply_steps(&self, tracker: &StatusTracker) -> Result<ApplyOutcome> {
        let app = tracker.snapshot().await;
        let paths = self.paths(&app);

        self.process_labels(&app, &paths, LabelOp::Assign).await?;

        let charts = charts_from_manifest(&paths.synced_manifest)?;
        tracker.set_charts(charts.clone()).await?;

        let mut overrides = String::new();
        if app.kind.requires_overrides() {
            tracker.set_progress(progress::GENERATE_OVERRIDES).await?;
            tracing::info!("Generating application overrides...");
            self.overrides.generate_overrides(&app.name).await?;
            let Some(files) = self.overrides_dir.files_for(&charts) else {
                return Ok(ApplyOutcome::NotReady);
            };
            tracing::info!("Application overrides generated.");
            make_readable(&files)?;
            overrides = overrides_arg(&files);
        }

        tracker.set_progress(progress::DOWNLOAD_IMAGES).await?;
        self.download_images(&app, &paths, &charts).await?;

        tracker.set_progress(progress::APPLY_MANIFEST).await?;
        if !self
            .run_with_monitor(tracker, ManifestOp::Apply, &paths, &overrides, &charts)
            .await
        {
            bail!("failed to apply application manifest.");
        }
        Ok(ApplyOutcome::Applied)
    }

    async fn download_images(
        &self,
        app: &ApplicationRecord,
        paths: &AppPaths,
        charts: &[ChartRef],
    ) -> Result<()> {
        if paths.images_dir.is_dir() {
            bail!("embedded images are not yet supported.");
        }

        let saved = load_image_list(&paths.images_file)?;
        let images = match app.kind.image_discovery() {
            // Overrides may have changed the images since the last run
            ImageDiscovery::ChartOverrides => {
                let mut combined: BTreeSet<String> = saved.iter().cloned().collect();
                combined.extend(tags_for_charts(
                    &paths.charts_dir,
                    self.overrides_dir.dir(),
                    charts,
                )?);
                let combined: Vec<String> = combined.into_iter().collect();
                if combined != saved {
                    save_image_list(&paths.images_file, &combined)?;
                }
                combined
            }
            ImageDiscovery::ValuesFiles => saved,
        };

        let failed = self.fetcher.fetch_all(images).await;
        if !failed.is_empty() {
            bail!(
                "failed to download one or more image(s): {}",
                failed.join(", ")
            );
        }
        Ok(())
    }

    /// Run a manifest operation with a progress monitor alongside it.
    ///
    /// The monitor is stopped and awaited before returning so it can never
    /// write after the caller sets the final status.
    async fn run_with_monitor(
        &self,
        tracker: &StatusTracker,
        op: ManifestOp,
        paths: &AppPaths,
        overrides: &str,
        charts: &[ChartRef],
    ) -> bool {
        let app = tracker.snapshot().await;
        let excluded = &self.settings.system_app.excluded_charts;
        let target = match op {
            ManifestOp::Apply => MonitorTarget {
                pattern: APPLY_SEARCH_PATTERN,
                log_file: op.log_file(&app.name),
                total: app.kind.progress_total(charts, excluded),
                excluded: if app.is_system_app() {
                    excluded.clone()
                } else {
                    Vec::new()
                },
            },
            _ => MonitorTarget {
                pattern: DELETE_SEARCH_PATTERN,
                log_file: op.log_file(&app.name),
                total: charts.len(),
                excluded: Vec::new(),
            },
        };

        let log_file = target.log_file.clone();
        let handle = self.monitor.start(tracker.clone(), target);
        let ok = self
            .runner
            .run(op, &paths.helper_manifest, overrides, &log_file)
            .await;
        if let Err(e) = handle.stop().await {
            tracing::warn!("{}", e);
        }
        ok
    }

    async fn process_labels(
        &self,
        app: &ApplicationRecord,
        paths: &AppPaths,
        op: LabelOp,
    ) -> Result<()> {
        let declared = load_node_labels(&paths.metadata_file)?;
        let (controller, compute) = app.kind.default_labels(&self.settings.system_app);
        if declared.is_none() && controller.is_empty() && compute.is_empty() {
            tracing::info!(
                "Application {} does not require specific node labeling.",
                app.name
            );
            return Ok(());
        }

        let mut labels = declared.unwrap_or_default();
        labels.controller.extend(controller);
        labels.compute.extend(compute);
        process_node_labels(self.labeler.as_ref(), &labels, op).await
    }

    // ---- Remove ----

    /// Delete the application's releases from the cluster. The app goes
    /// back to "uploaded" on success.
    pub async fn perform_remove(&self, name: &str) -> Result<(), AppError> {
        let _guard = self.exclusive().await?;
        let app = self.load(name).await?;
        Self::require_status(
            &app,
            "remove",
            &[
                AppStatus::ApplySuccess,
                AppStatus::ApplyFailure,
                AppStatus::RemoveFailure,
            ],
        )?;

        tracing::info!("Application ({}) remove started.", name);
        let tracker = StatusTracker::new(app, Arc::clone(&self.store));
        tracker.begin(AppStatus::RemoveInProgress).await?;

        match self.remove_steps(&tracker).await {
            Ok(()) => {
                tracker.update(Some(AppStatus::UploadSuccess), None).await?;
                tracing::info!("Application ({}) remove completed.", name);
            }
            Err(e) => {
                tracing::error!("{:#}", e);
                tracker.abort("remove").await?;
            }
        }
        Ok(())
    }

    async fn remove_steps(&self, tracker: &StatusTracker) -> Result<()> {
        let app = tracker.snapshot().await;
        let paths = self.paths(&app);

        let charts = charts_from_manifest(&paths.synced_manifest)?;
        tracker.set_charts(charts.clone()).await?;
        tracker.set_progress(progress::DELETE_MANIFEST).await?;

        if !self
            .run_with_monitor(tracker, ManifestOp::Delete, &paths, "", &charts)
            .await
        {
            bail!("failed to delete application manifest.");
        }

        if app.kind.cleans_cluster_on_remove() {
            self.clean_cluster().await;
        }
        Ok(())
    }

    /// Best effort: failures are logged and never fail the removal
    async fn clean_cluster(&self) {
        let namespace = &self.settings.system_app.namespace;
        match self.cluster.delete_bound_volumes(namespace).await {
            Ok(count) => tracing::info!("{} Persistent Volume(s) marked for deletion.", count),
            Err(e) => tracing::error!("Failed to clean up PVs after app removal: {:#}", e),
        }
        match self.cluster.delete_namespace(namespace).await {
            Ok(()) => tracing::info!("Namespace {} delete completed.", namespace),
            Err(e) => tracing::error!(
                "Failed to clean up {} namespace after app removal: {:#}",
                namespace,
                e
            ),
        }
    }

    // ---- Delete ----

    /// Destroy the record and purge the app's files.
    ///
    /// Allowed from every status. Failures past the lookup come back as an
    /// advisory message rather than an error.
    pub async fn perform_delete(&self, name: &str) -> Result<Option<String>, AppError> {
        let _guard = self.exclusive().await?;
        let app = self.load(name).await?;

        let purged: Result<()> = async {
            self.store.destroy(name).await?;
            self.cleanup(&app).await
        }
        .await;
        match purged {
            Ok(()) => {
                tracing::info!("Application ({}) has been purged from the system.", name);
                Ok(None)
            }
            Err(e) => {
                tracing::error!("{:#}", e);
                Ok(Some(format!("{:#}", e)))
            }
        }
    }

    /// Remove node labels, overrides and every file of an application.
    /// Safe to call again after a partial run.
    pub async fn cleanup(&self, app: &ApplicationRecord) -> Result<()> {
        let paths = self.paths(app);
        let upload_failed = app.status == AppStatus::UploadFailure;

        if !upload_failed && paths.metadata_file.exists() {
            self.process_labels(app, &paths, LabelOp::Remove).await?;
        }
        if app.is_system_app() && !upload_failed && paths.synced_manifest.exists() {
            for chart in charts_from_manifest(&paths.synced_manifest)? {
                self.overrides.remove_chart_overrides(&chart).await?;
            }
        }

        for file in [&paths.synced_manifest, &paths.images_file] {
            remove_file_if_exists(file)
                .with_context(|| format!("Failed to remove {}", file.display()))?;
        }
        remove_dir_if_exists(&paths.path)
            .with_context(|| format!("Failed to remove {}", paths.path.display()))?;
        Ok(())
    }
}

/// Admission checks run on a scratch copy before any record exists
async fn admit_tarball(tarfile: &Path) -> Result<ManifestInfo> {
    if !tarfile.is_file() {
        bail!("application tar file {} does not exist", tarfile.display());
    }
    if !is_tarball_name(tarfile) {
        bail!("{} is not a tar file", tarfile.display());
    }

    let scratch = tempfile::tempdir().context("Failed to create a temporary directory")?;
    extract_tarball(tarfile, scratch.path()).await?;
    if !verify_checksums(scratch.path()).await? {
        bail!("checksum validation failed");
    }
    let manifest = find_manifest(scratch.path())?;

    let charts_dir = scratch.path().join("charts");
    if charts_dir.is_dir() && chart_packages(&charts_dir)?.is_empty() {
        bail!("tar file contains no Helm charts");
    }
    Ok(manifest)
}

/// Temporarily changes a directory's mode, restoring it on drop
struct ModeGuard {
    path: PathBuf,
    original: u32,
}

impl ModeGuard {
    fn set(path: &Path, mode: u32) -> Result<Self> {
        let original = fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .permissions()
            .mode()
            & 0o7777;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("Failed to change mode of {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            original,
        })
    }
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::set_permissions(&self.path, fs::Permissions::from_mode(self.original)) {
            tracing::warn!("Failed to restore mode of {}: {}", self.path.display(), e);
        }
    }
}
