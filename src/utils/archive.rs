//! Application tarball handling

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tokio::process::Command;

use super::paths::files_matching;

/// Whether a file name looks like a gzipped tarball
pub fn is_tarball_name(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".tgz") || name.ends_with(".tar.gz")
}

/// Extract `tarfile` into `dest` without preserving owners or modes
pub async fn extract_tarball(tarfile: &Path, dest: &Path) -> Result<()> {
    let output = Command::new("tar")
        .arg("-xf")
        .arg(tarfile)
        .args(["-m", "--no-same-owner", "--no-same-permissions", "-C"])
        .arg(dest)
        .output()
        .await
        .context("Failed to execute tar")?;
    if !output.status.success() {
        bail!(
            "Error while extracting tarfile {}: {}",
            tarfile.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Extract every packaged chart under `charts_dir` next to its package
pub async fn extract_nested_charts(charts_dir: &Path) -> Result<Vec<PathBuf>> {
    let packages = files_matching(charts_dir, ".tgz")?;
    for package in &packages {
        let parent = package.parent().unwrap_or(charts_dir);
        extract_tarball(package, parent).await?;
    }
    Ok(packages)
}

/// Check every `*.md5` file at the top of `dir` with `md5sum -c`.
/// Returns false on the first mismatch.
pub async fn verify_checksums(dir: &Path) -> Result<bool> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    let mut sums: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "md5"))
        .collect();
    sums.sort();

    for sum in sums {
        let status = Command::new("md5sum")
            .arg("-c")
            .arg(&sum)
            .current_dir(dir)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await
            .context("Failed to execute md5sum")?;
        if !status.success() {
            crate::log_error!("Checksum verification failed for {}", sum.display());
            return Ok(false);
        }
    }
    Ok(true)
}
