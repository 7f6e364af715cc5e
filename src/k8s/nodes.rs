//! Node inventory and label management

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::Client;
use kube::api::{Api, ListParams, Patch, PatchParams};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::manifest::NodeLabels;

const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Personality {
    Controller,
    Compute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub personality: Personality,
}

/// Label changes for one node; a `None` value removes the key
pub type LabelPatch = BTreeMap<String, Option<String>>;

#[async_trait]
pub trait NodeLabeler: Send + Sync {
    async fn nodes(&self) -> Result<Vec<NodeInfo>>;

    async fn patch_labels(&self, node: &str, labels: &LabelPatch) -> Result<()>;
}

/// Node labeling through the Kubernetes API
pub struct KubeNodeLabeler {
    client: Client,
}

impl KubeNodeLabeler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeLabeler for KubeNodeLabeler {
    async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .context("Failed to list nodes")?;

        let mut found: Vec<NodeInfo> = nodes
            .items
            .into_iter()
            .filter_map(|node| {
                let is_controller = node
                    .metadata
                    .labels
                    .as_ref()
                    .is_some_and(|labels| labels.contains_key(CONTROL_PLANE_LABEL));
                node.metadata.name.map(|name| NodeInfo {
                    name,
                    personality: if is_controller {
                        Personality::Controller
                    } else {
                        Personality::Compute
                    },
                })
            })
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn patch_labels(&self, node: &str, labels: &LabelPatch) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "labels": labels } });
        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("Failed to label node {}", node))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOp {
    Assign,
    Remove,
}

/// Turn `key=value` strings into a patch for `op`
pub fn label_patch(labels: &BTreeSet<String>, op: LabelOp) -> LabelPatch {
    labels
        .iter()
        .filter_map(|label| label.split_once('='))
        .map(|(key, value)| {
            let value = match op {
                LabelOp::Assign => Some(value.to_string()),
                LabelOp::Remove => None,
            };
            (key.to_string(), value)
        })
        .collect()
}

/// Assign or remove an application's labels on every node by personality.
///
/// With no dedicated compute nodes the cluster is all-in-one and the
/// controllers take both label sets.
pub async fn process_node_labels(
    labeler: &dyn NodeLabeler,
    labels: &NodeLabels,
    op: LabelOp,
) -> Result<()> {
    let nodes = labeler.nodes().await?;
    let (controllers, computes): (Vec<_>, Vec<_>) = nodes
        .iter()
        .partition(|n| n.personality == Personality::Controller);
    if controllers.is_empty() {
        bail!("No controller nodes found");
    }

    let mut plan: Vec<(&NodeInfo, BTreeSet<String>)> = Vec::new();
    if computes.is_empty() {
        let union: BTreeSet<String> = labels.controller.union(&labels.compute).cloned().collect();
        plan.extend(controllers.iter().map(|n| (*n, union.clone())));
    } else {
        plan.extend(controllers.iter().map(|n| (*n, labels.controller.clone())));
        plan.extend(computes.iter().map(|n| (*n, labels.compute.clone())));
    }

    for (node, set) in plan {
        let patch = label_patch(&set, op);
        if patch.is_empty() {
            continue;
        }
        crate::log_info!("{:?} labels {:?} on node {}", op, set, node.name);
        labeler.patch_labels(&node.name, &patch).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::FakeLabeler;

    fn labels() -> NodeLabels {
        NodeLabels {
            controller: BTreeSet::from(["openstack-control-plane=enabled".to_string()]),
            compute: BTreeSet::from(["openvswitch=enabled".to_string()]),
        }
    }

    #[test]
    fn test_remove_patch_nulls_keys() {
        let patch = label_patch(&labels().controller, LabelOp::Remove);
        assert_eq!(patch.get("openstack-control-plane"), Some(&None));
        let patch = label_patch(&labels().controller, LabelOp::Assign);
        assert_eq!(
            patch.get("openstack-control-plane"),
            Some(&Some("enabled".to_string()))
        );
    }

    #[tokio::test]
    async fn test_standard_cluster_splits_by_personality() {
        let labeler = FakeLabeler::new(&["controller-0"], &["compute-0", "compute-1"]);
        process_node_labels(&labeler, &labels(), LabelOp::Assign)
            .await
            .unwrap();

        let patches = labeler.patches();
        assert_eq!(patches.len(), 3);
        assert!(patches["controller-0"].contains_key("openstack-control-plane"));
        assert!(!patches["controller-0"].contains_key("openvswitch"));
        assert!(patches["compute-1"].contains_key("openvswitch"));
    }

    #[tokio::test]
    async fn test_all_in_one_gets_union() {
        let labeler = FakeLabeler::new(&["controller-0"], &[]);
        process_node_labels(&labeler, &labels(), LabelOp::Assign)
            .await
            .unwrap();

        let patches = labeler.patches();
        assert_eq!(patches["controller-0"].len(), 2);
    }

    #[tokio::test]
    async fn test_no_controllers_is_an_error() {
        let labeler = FakeLabeler::new(&[], &["compute-0"]);
        assert!(
            process_node_labels(&labeler, &labels(), LabelOp::Assign)
                .await
                .is_err()
        );
    }
}
