//! Application record persistence

use async_trait::async_trait;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::record::ApplicationRecord;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Application {0} not found")]
    NotFound(String),

    #[error("Application {0} already exists")]
    AlreadyExists(String),

    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Corrupt application record {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Storage for application records.
///
/// `save` must persist status, progress and charts in one call.
#[async_trait]
pub trait AppStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<ApplicationRecord>, StoreError>;

    async fn create(&self, app: &ApplicationRecord) -> Result<(), StoreError>;

    async fn save(&self, app: &ApplicationRecord) -> Result<(), StoreError>;

    async fn destroy(&self, name: &str) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<ApplicationRecord>, StoreError>;
}

/// One JSON document per application under a state directory
pub struct FileAppStore {
    dir: PathBuf,
}

impl FileAppStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }

    fn read(path: &Path) -> Result<ApplicationRecord, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| StoreError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write through a temp file in the same directory so readers never
    /// observe a half-written record.
    fn write(&self, app: &ApplicationRecord) -> Result<(), StoreError> {
        let path = self.record_path(&app.name);
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        let body = serde_json::to_vec_pretty(app).map_err(|e| io_err(io::Error::other(e)))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err)?;
        tmp.write_all(&body).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl AppStore for FileAppStore {
    async fn get(&self, name: &str) -> Result<Option<ApplicationRecord>, StoreError> {
        let path = self.record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    async fn create(&self, app: &ApplicationRecord) -> Result<(), StoreError> {
        if self.record_path(&app.name).exists() {
            return Err(StoreError::AlreadyExists(app.name.clone()));
        }
        self.write(app)
    }

    async fn save(&self, app: &ApplicationRecord) -> Result<(), StoreError> {
        if !self.record_path(&app.name).exists() {
            return Err(StoreError::NotFound(app.name.clone()));
        }
        self.write(app)
    }

    async fn destroy(&self, name: &str) -> Result<(), StoreError> {
        let path = self.record_path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    async fn list(&self) -> Result<Vec<ApplicationRecord>, StoreError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut apps = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })?
                .path();
            if path.extension().is_some_and(|ext| ext == "json") {
                apps.push(Self::read(&path)?);
            }
        }
        apps.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(apps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::record::{AppKind, AppStatus, ChartRef};

    fn sample(name: &str) -> ApplicationRecord {
        ApplicationRecord::new(name, "manifest", "manifest.yaml", AppKind::Custom)
    }

    #[tokio::test]
    async fn test_create_get_save_destroy() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAppStore::open(dir.path()).unwrap();

        let mut app = sample("demo");
        store.create(&app).await.unwrap();
        assert!(matches!(
            store.create(&app).await,
            Err(StoreError::AlreadyExists(_))
        ));

        app.status = AppStatus::UploadSuccess;
        app.progress = Some("completed".to_string());
        app.charts = vec![ChartRef::new("nginx", "default")];
        store.save(&app).await.unwrap();

        let loaded = store.get("demo").await.unwrap().unwrap();
        assert_eq!(loaded, app);

        store.destroy("demo").await.unwrap();
        assert!(store.get("demo").await.unwrap().is_none());
        assert!(matches!(
            store.destroy("demo").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_requires_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAppStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.save(&sample("ghost")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileAppStore::open(dir.path()).unwrap();
        store.create(&sample("zeta")).await.unwrap();
        store.create(&sample("alpha")).await.unwrap();

        let names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
