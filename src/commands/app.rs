//! Application lifecycle commands

use anyhow::{Result, bail};
use owo_colors::OwoColorize;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::app::armada::ManifestOp;
use crate::app::charts::HelmCli;
use crate::app::overrides::{OverridesDir, ProvisionedOverrides};
use crate::app::record::{AppStatus, ApplicationRecord};
use crate::app::store::{AppStore, FileAppStore};
use crate::app::{AppError, AppOperator, Collaborators};
use crate::config::settings::Settings;
use crate::k8s;
use crate::k8s::cleanup::KubeCleanup;
use crate::k8s::nodes::KubeNodeLabeler;
use crate::utils::ContainerRuntime;
use crate::utils::progress::OperationProgress;
use crate::utils::prompt::confirm_destructive;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn open_store(settings: &Settings) -> Result<Arc<dyn AppStore>> {
    Ok(Arc::new(FileAppStore::open(settings.paths.state_dir.clone())?))
}

/// Wire the operator to the real container runtime, helm and cluster
async fn operator(settings: &Settings) -> Result<AppOperator> {
    let store = open_store(settings)?;
    let runtime = ContainerRuntime::detect()?;
    let client = k8s::client(&settings.paths.kubeconfig).await?;
    let overrides = OverridesDir::new(
        settings.paths.overrides_dir.clone(),
        settings.system_app.excluded_charts.clone(),
    );

    Ok(AppOperator::new(
        settings.clone(),
        Collaborators {
            store,
            engine: Arc::new(runtime),
            charts: Arc::new(HelmCli::new(
                settings.charts.upload_command.clone(),
                settings.charts.upload_path.clone(),
            )),
            overrides: Arc::new(ProvisionedOverrides::new(overrides)),
            labeler: Arc::new(KubeNodeLabeler::new(client.clone())),
            cleanup: Arc::new(KubeCleanup::new(client)),
        },
    ))
}

/// Drive `pipeline` while a spinner follows the persisted record
async fn watch<F, T>(
    settings: &Settings,
    store: &Arc<dyn AppStore>,
    operation: &str,
    name: &str,
    pipeline: F,
) -> (T, OperationProgress)
where
    F: Future<Output = T>,
{
    let progress = if settings.behavior.show_progress {
        OperationProgress::new(operation, name)
    } else {
        OperationProgress::hidden(name)
    };

    tokio::pin!(pipeline);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        tokio::select! {
            out = &mut pipeline => return (out, progress),
            _ = ticker.tick() => {
                if let Ok(Some(app)) = store.get(name).await {
                    progress.update(&app);
                }
            }
        }
    }
}

pub async fn upload(settings: &Settings, name: &str, tarfile: &Path) -> Result<()> {
    crate::log_info!("Uploading application {} from {}", name, tarfile.display());
    let operator = operator(settings).await?;
    let store = Arc::clone(operator.store());

    let (result, progress) = watch(
        settings,
        &store,
        "Uploading",
        name,
        operator.perform_upload(name, tarfile),
    )
    .await;
    let app = match result {
        Ok(app) => app,
        Err(e) => {
            progress.finish_error("rejected");
            return Err(e.into());
        }
    };

    if app.status != AppStatus::UploadSuccess {
        progress.finish_error(app.status.as_str());
        bail!("Upload of {} failed, check logs for detail", name);
    }
    progress.finish_success(app.status.as_str());
    Ok(())
}

pub async fn apply(settings: &Settings, name: &str) -> Result<()> {
    crate::log_info!("Applying application {}", name);
    let operator = operator(settings).await?;
    let store = Arc::clone(operator.store());

    let (result, progress) =
        watch(settings, &store, "Applying", name, operator.perform_apply(name)).await;
    let applied = match result {
        Ok(applied) => applied,
        Err(e) => {
            progress.finish_error("rejected");
            return Err(e.into());
        }
    };

    if applied {
        progress.finish_success(AppStatus::ApplySuccess.as_str());
        crate::log_info!(
            "Helper log: {}",
            ManifestOp::Apply.log_file(name)
        );
        return Ok(());
    }

    match store.get(name).await?.map(|app| app.status) {
        Some(AppStatus::ApplyFailure) => {
            progress.finish_error(AppStatus::ApplyFailure.as_str());
            Err(AppError::apply(name, "operation aborted, check logs for detail").into())
        }
        _ => {
            progress.finish_error("not ready");
            crate::log_warn!(
                "Overrides for {} are not all generated yet; the application was left unchanged",
                name
            );
            Ok(())
        }
    }
}

pub async fn remove(settings: &Settings, name: &str) -> Result<()> {
    crate::log_info!("Removing application {}", name);
    let operator = operator(settings).await?;
    let store = Arc::clone(operator.store());

    let (result, progress) =
        watch(settings, &store, "Removing", name, operator.perform_remove(name)).await;
    if let Err(e) = result {
        progress.finish_error("rejected");
        return Err(e.into());
    }

    match store.get(name).await?.map(|app| app.status) {
        Some(AppStatus::UploadSuccess) => {
            progress.finish_success("removed");
            Ok(())
        }
        _ => {
            progress.finish_error(AppStatus::RemoveFailure.as_str());
            bail!("Remove of {} failed, check logs for detail", name);
        }
    }
}

pub async fn delete(settings: &Settings, name: &str, assume_yes: bool) -> Result<()> {
    let prompt = format!("Delete application {} and all of its files?", name);
    if !confirm_destructive(&prompt, assume_yes, settings.behavior.confirm_destructive)? {
        crate::log_info!("Delete cancelled");
        return Ok(());
    }

    let operator = operator(settings).await?;
    match operator.perform_delete(name).await? {
        None => println!("{} {} deleted", "✓".green(), name.bold()),
        Some(advisory) => {
            crate::log_warn!("Application {} deleted with warnings: {}", name, advisory);
            println!("{} {} deleted: {}", "!".yellow(), name.bold(), advisory);
        }
    }
    Ok(())
}

pub async fn list(settings: &Settings) -> Result<()> {
    let store = open_store(settings)?;
    let apps = store.list().await?;

    if apps.is_empty() {
        println!("No applications found");
        return Ok(());
    }
    println!(
        "{:<24} {:<16} {:<8} {}",
        "NAME".bold(),
        "STATUS".bold(),
        "KIND".bold(),
        "PROGRESS".bold()
    );
    for app in &apps {
        println!("{}", list_row(app));
    }
    Ok(())
}

pub async fn show(settings: &Settings, name: &str) -> Result<()> {
    let store = open_store(settings)?;
    let Some(app) = store.get(name).await? else {
        return Err(AppError::NotFound(name.to_string()).into());
    };
    for line in detail_lines(&app) {
        println!("{}", line);
    }
    Ok(())
}

fn colored_status(status: AppStatus) -> String {
    let text = format!("{:<16}", status.as_str());
    match status {
        AppStatus::UploadSuccess | AppStatus::ApplySuccess => text.green().to_string(),
        AppStatus::UploadFailure | AppStatus::ApplyFailure | AppStatus::RemoveFailure => {
            text.red().to_string()
        }
        _ => text.yellow().to_string(),
    }
}

fn kind_label(app: &ApplicationRecord) -> &'static str {
    if app.is_system_app() { "system" } else { "custom" }
}

fn list_row(app: &ApplicationRecord) -> String {
    format!(
        "{:<24} {} {:<8} {}",
        app.name,
        colored_status(app.status),
        kind_label(app),
        app.progress.as_deref().unwrap_or("-")
    )
}

fn detail_lines(app: &ApplicationRecord) -> Vec<String> {
    let mut lines = vec![
        format!("{:<10} {}", "Name:".bold(), app.name),
        format!("{:<10} {}", "Status:".bold(), colored_status(app.status).trim_end()),
        format!(
            "{:<10} {}",
            "Progress:".bold(),
            app.progress.as_deref().unwrap_or("-")
        ),
        format!("{:<10} {}", "Kind:".bold(), kind_label(app)),
        format!(
            "{:<10} {} ({})",
            "Manifest:".bold(),
            app.manifest_name,
            app.manifest_file
        ),
    ];
    if !app.charts.is_empty() {
        lines.push(format!("{}", "Charts:".bold()));
        lines.extend(
            app.charts
                .iter()
                .map(|c| format!("  - {} ({})", c.name, c.namespace)),
        );
    }
    lines
}
