//! Host prerequisite checks

use anyhow::{Result, bail};
use colored::Colorize;

use crate::config::settings::Settings;
use crate::utils::container::ContainerEngine;
use crate::utils::prereqs::check_container_runtime;
use crate::utils::{CommonPrereqs, ContainerRuntime, Prerequisite};

pub async fn check(settings: &Settings) -> Result<()> {
    crate::log_info!("Checking prerequisites...");

    let helm = CommonPrereqs::helm();
    let tar = CommonPrereqs::tar();
    let md5sum = CommonPrereqs::md5sum();
    let upload = CommonPrereqs::chart_upload(&settings.charts.upload_command);
    let prereqs: Vec<&dyn Prerequisite> = vec![&helm, &tar, &md5sum, &upload];

    let (found, missing) = CommonPrereqs::check_all(&prereqs);
    for tool in &found {
        println!("  {} {}", "✓".green(), tool);
    }
    for (tool, hint) in &missing {
        println!("  {} {} ({})", "✗".red(), tool, hint);
    }

    check_container_runtime()?;
    let runtime = ContainerRuntime::detect()?;
    println!("  {} container runtime: {}", "✓".green(), runtime);

    let helper = &settings.armada.container_name;
    match runtime.container_state(helper).await? {
        Some(state) => println!("  {} helper {}: {}", "✓".green(), helper, state),
        None => println!("  {} helper {} not created yet", "-".yellow(), helper),
    }

    if !settings.paths.kubeconfig.exists() {
        println!(
            "  {} kubeconfig {} not found",
            "✗".red(),
            settings.paths.kubeconfig.display()
        );
        bail!("kubeconfig {} is missing", settings.paths.kubeconfig.display());
    }

    if !missing.is_empty() {
        bail!("{} required tool(s) missing", missing.len());
    }
    crate::log_info!("All prerequisites satisfied");
    Ok(())
}
