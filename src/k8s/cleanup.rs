//! Cluster resources left behind after an application is removed

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, PersistentVolume, PersistentVolumeClaim};
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams};

use super::is_not_found;

#[async_trait]
pub trait ClusterCleanup: Send + Sync {
    /// Mark the volumes bound to claims in `namespace` for deletion.
    /// Returns how many were marked.
    async fn delete_bound_volumes(&self, namespace: &str) -> Result<usize>;

    async fn delete_namespace(&self, namespace: &str) -> Result<()>;
}

pub struct KubeCleanup {
    client: Client,
}

impl KubeCleanup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterCleanup for KubeCleanup {
    async fn delete_bound_volumes(&self, namespace: &str) -> Result<usize> {
        let claims: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let volumes: Api<PersistentVolume> = Api::all(self.client.clone());

        let list = claims
            .list(&ListParams::default())
            .await
            .with_context(|| format!("Failed to list claims in {}", namespace))?;

        let mut marked = 0;
        for volume in list
            .items
            .iter()
            .filter_map(|pvc| pvc.spec.as_ref()?.volume_name.as_deref())
        {
            match volumes.delete(volume, &DeleteParams::default()).await {
                Ok(_) => marked += 1,
                Err(e) if is_not_found(&e) => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to delete volume {}", volume));
                }
            }
        }
        Ok(marked)
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.delete(namespace, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to delete namespace {}", namespace)),
        }
    }
}
