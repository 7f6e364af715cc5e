//! Application manifest and metadata parsing

use anyhow::{Context, Result, bail};
use regex::Regex;
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use crate::app::record::ChartRef;

const MANIFEST_SCHEMA: &str = "armada/Manifest";
const CHART_SCHEMA: &str = "armada/Chart/";

static LABEL_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid label pattern")
});

fn documents(content: &str) -> Result<Vec<Value>> {
    serde_yaml::Deserializer::from_str(content)
        .map(|doc| Value::deserialize(doc).context("Failed to parse YAML document"))
        .collect()
}

fn schema(doc: &Value) -> Option<&str> {
    doc.get("schema").and_then(Value::as_str)
}

/// Charts declared by a manifest, in document order
pub fn parse_charts(content: &str) -> Result<Vec<ChartRef>> {
    let mut charts = Vec::new();
    for doc in documents(content)? {
        if !schema(&doc).is_some_and(|s| s.contains(CHART_SCHEMA)) {
            continue;
        }
        let data = doc.get("data");
        let name = data.and_then(|d| d.get("chart_name")).and_then(Value::as_str);
        let namespace = data.and_then(|d| d.get("namespace")).and_then(Value::as_str);
        if let (Some(name), Some(namespace)) = (name, namespace) {
            charts.push(ChartRef::new(name, namespace));
        }
    }
    Ok(charts)
}

pub fn charts_from_manifest(path: &Path) -> Result<Vec<ChartRef>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    parse_charts(&content).with_context(|| format!("Invalid manifest {}", path.display()))
}

/// The manifest name if `content` is an application manifest
pub fn manifest_name(content: &str) -> Result<Option<String>> {
    for doc in documents(content)? {
        if schema(&doc).is_some_and(|s| s.contains(MANIFEST_SCHEMA)) {
            let name = doc
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .context("Manifest document has no metadata.name")?;
            return Ok(Some(name.to_string()));
        }
    }
    Ok(None)
}

/// The manifest found at the top of an extracted application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInfo {
    pub name: String,
    /// File name relative to the application directory
    pub file: String,
}

/// Look for exactly one manifest among the top-level YAML files of `dir`
pub fn find_manifest(dir: &Path) -> Result<ManifestInfo> {
    let mut found = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    let mut files: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "yaml"))
        .collect();
    files.sort();

    for path in files {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        // Non-manifest YAML (metadata, values) may not even parse as documents
        let Ok(Some(name)) = manifest_name(&content) else {
            continue;
        };
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        found.push(ManifestInfo { name, file });
    }

    match found.len() {
        0 => bail!("manifest file is missing"),
        1 => Ok(found.remove(0)),
        _ => bail!("tar file contains more than one manifest file"),
    }
}

/// A single `key=value` node label
pub fn is_valid_label(label: &str) -> bool {
    match label.split_once('=') {
        Some((key, value)) => {
            !value.contains('=') && LABEL_PART.is_match(key) && LABEL_PART.is_match(value)
        }
        None => false,
    }
}

/// Split a "k=v, k=v" list and validate every entry
pub fn parse_label_list(spec: &str) -> Option<BTreeSet<String>> {
    let labels: BTreeSet<String> = spec
        .replace(',', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect();
    labels.iter().all(|l| is_valid_label(l)).then_some(labels)
}

/// Labels an application asks for, per node role
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLabels {
    pub controller: BTreeSet<String>,
    pub compute: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    labels: Option<MetadataLabels>,
}

#[derive(Debug, Deserialize, Default)]
struct MetadataLabels {
    controller: Option<String>,
    compute: Option<String>,
}

/// Labels declared in an application's metadata file.
///
/// `None` when the file is absent or empty.
pub fn load_node_labels(metadata_file: &Path) -> Result<Option<NodeLabels>> {
    let content = match std::fs::read_to_string(metadata_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", metadata_file.display()));
        }
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    parse_node_labels(&content).map(Some)
}

pub fn parse_node_labels(content: &str) -> Result<NodeLabels> {
    let metadata: Metadata = serde_yaml::from_str(content).context("Invalid metadata file")?;
    let Some(labels) = metadata.labels else {
        bail!("labels file contains no labels.");
    };

    let mut parsed = NodeLabels::default();
    if let Some(spec) = labels.controller.as_deref() {
        parsed.controller =
            parse_label_list(spec).context("controller labels are malformed.")?;
    }
    if let Some(spec) = labels.compute.as_deref() {
        parsed.compute = parse_label_list(spec).context("compute labels are malformed.")?;
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MANIFEST: &str = r#"---
schema: armada/Chart/v1
metadata:
  schema: metadata/Document/v1
  name: helm-toolkit
data:
  chart_name: helm-toolkit
  namespace: helm-toolkit
---
schema: armada/Chart/v1
metadata:
  schema: metadata/Document/v1
  name: openstack-mariadb
data:
  chart_name: mariadb
  namespace: openstack
---
schema: armada/ChartGroup/v1
metadata:
  schema: metadata/Document/v1
  name: openstack-mariadb
data:
  chart_group:
    - openstack-mariadb
---
schema: armada/Manifest/v1
metadata:
  schema: metadata/Document/v1
  name: armada-manifest
data:
  release_prefix: osh
"#;

    #[test]
    fn test_charts_in_document_order() {
        let charts = parse_charts(MANIFEST).unwrap();
        assert_eq!(
            charts,
            vec![
                ChartRef::new("helm-toolkit", "helm-toolkit"),
                ChartRef::new("mariadb", "openstack"),
            ]
        );
    }

    #[test]
    fn test_manifest_name() {
        assert_eq!(manifest_name(MANIFEST).unwrap().as_deref(), Some("armada-manifest"));
        assert_eq!(manifest_name("labels: {}\n").unwrap(), None);
    }

    #[test]
    fn test_find_manifest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("metadata.yaml"), "labels:\n  controller: a=b\n").unwrap();
        fs::write(dir.path().join("manifest.yaml"), MANIFEST).unwrap();

        let info = find_manifest(dir.path()).unwrap();
        assert_eq!(info.name, "armada-manifest");
        assert_eq!(info.file, "manifest.yaml");

        fs::write(dir.path().join("second.yaml"), MANIFEST).unwrap();
        assert!(find_manifest(dir.path()).is_err());
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_manifest(dir.path()).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_label_validation() {
        assert!(is_valid_label("openstack-control-plane=enabled"));
        assert!(!is_valid_label("no-value"));
        assert!(!is_valid_label("a=b=c"));
        assert!(!is_valid_label("Upper=case"));
        assert!(!is_valid_label("trailing-=x"));
    }

    #[test]
    fn test_parse_node_labels() {
        let labels = parse_node_labels(
            "labels:\n  controller: 'sriov=enabled, openvswitch=enabled'\n  compute: 'sriov=enabled'\n",
        )
        .unwrap();
        assert_eq!(labels.controller.len(), 2);
        assert!(labels.compute.contains("sriov=enabled"));

        assert!(parse_node_labels("name: demo\n").is_err());
        assert!(parse_node_labels("labels:\n  controller: 'BAD'\n").is_err());
    }

    #[test]
    fn test_absent_or_empty_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("metadata.yaml");
        assert_eq!(load_node_labels(&file).unwrap(), None);
        fs::write(&file, "").unwrap();
        assert_eq!(load_node_labels(&file).unwrap(), None);
    }
}
