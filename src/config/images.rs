//! Image references: the per-app image list file and mining chart values

use anyhow::{Context, Result};
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::path::Path;

use crate::app::record::ChartRef;
use crate::utils::paths::files_matching;

/// Read a saved image list (a YAML sequence of image references)
pub fn load_image_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read image list: {}", path.display()))?;
    let images: Option<Vec<String>> = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse image list: {}", path.display()))?;
    Ok(images.unwrap_or_default())
}

pub fn save_image_list(path: &Path, images: &[String]) -> Result<()> {
    let body = serde_yaml::to_string(images).context("Failed to serialize image list")?;
    std::fs::write(path, format!("---\n{}", body))
        .with_context(|| format!("Failed to write image list: {}", path.display()))
}

/// String values of the mapping found by following `keys` from `doc`
fn tags_at(doc: &Value, keys: &[&str]) -> BTreeSet<String> {
    let mut node = doc;
    for key in keys {
        match node.get(*key) {
            Some(next) => node = next,
            None => return BTreeSet::new(),
        }
    }
    match node.as_mapping() {
        Some(map) => map
            .values()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        None => BTreeSet::new(),
    }
}

fn read_yaml(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// `images.tags.*` from every values.yaml below `dir`
pub fn tags_from_values_files(dir: &Path) -> Result<BTreeSet<String>> {
    let mut tags = BTreeSet::new();
    for file in files_matching(dir, "values.yaml")? {
        tags.extend(tags_at(&read_yaml(&file)?, &["images", "tags"]));
    }
    Ok(tags)
}

/// `data.values.images.tags.*` of one generated overrides file
pub fn tags_from_overrides(file: &Path) -> Result<BTreeSet<String>> {
    Ok(tags_at(&read_yaml(file)?, &["data", "values", "images", "tags"]))
}

/// Images for a set of charts: each chart's overrides first, then its
/// values files when the overrides name no images.
pub fn tags_for_charts(
    charts_dir: &Path,
    overrides_dir: &Path,
    charts: &[ChartRef],
) -> Result<BTreeSet<String>> {
    let mut tags = BTreeSet::new();
    for chart in charts {
        let overrides = overrides_dir.join(chart.overrides_file_name());
        if overrides.exists() {
            let found = tags_from_overrides(&overrides)?;
            if !found.is_empty() {
                tags.extend(found);
                continue;
            }
            tracing::info!("Overrides file {} has no img tags", overrides.display());
        }
        tags.extend(tags_from_values_files(&charts_dir.join(&chart.name))?);
    }
    Ok(tags)
}
