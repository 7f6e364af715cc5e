//! Kubernetes operations

pub mod cleanup;
pub mod nodes;

use anyhow::{Context, Result};
use kube::Client;
use kube::config::{KubeConfigOptions, Kubeconfig};
use std::path::Path;

/// Build a client from a kubeconfig file (default context)
pub async fn client(kubeconfig: &Path) -> Result<Client> {
    let config = Kubeconfig::read_from(kubeconfig)
        .with_context(|| format!("Failed to read kubeconfig {}", kubeconfig.display()))?;
    let config = kube::Config::from_custom_kubeconfig(config, &KubeConfigOptions::default())
        .await
        .context("Invalid kubeconfig")?;
    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// True when a kube error is a 404 from the API server
pub(crate) fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}
