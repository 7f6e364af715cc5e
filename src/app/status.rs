//! Synchronized status/progress accessor shared by a pipeline and its monitor

use std::sync::Arc;
use tokio::sync::Mutex;

use super::record::{AppStatus, ApplicationRecord, ChartRef, progress};
use super::store::{AppStore, StoreError};

/// Every write to an application's status, progress or charts goes through
/// here. The record is guarded by one mutex and persisted while the lock is
/// held, so the pipeline and the progress monitor never interleave writes.
#[derive(Clone)]
pub struct StatusTracker {
    record: Arc<Mutex<ApplicationRecord>>,
    store: Arc<dyn AppStore>,
}

impl StatusTracker {
    pub fn new(record: ApplicationRecord, store: Arc<dyn AppStore>) -> Self {
        Self {
            record: Arc::new(Mutex::new(record)),
            store,
        }
    }

    pub async fn snapshot(&self) -> ApplicationRecord {
        self.record.lock().await.clone()
    }

    pub async fn name(&self) -> String {
        self.record.lock().await.name.clone()
    }

    /// Persist a new status and/or progress.
    ///
    /// `None` keeps the current value. Success states force the progress to
    /// "completed".
    pub async fn update(
        &self,
        new_status: Option<AppStatus>,
        new_progress: Option<&str>,
    ) -> Result<(), StoreError> {
        self.commit(|record| {
            let mut new_progress = new_progress.map(str::to_string);
            if let Some(status) = new_status {
                if status.is_success() {
                    new_progress = Some(progress::COMPLETED.to_string());
                }
                record.status = status;
            }
            if new_progress.is_some() {
                record.progress = new_progress;
            }
        })
        .await
    }

    pub async fn set_progress(&self, progress: &str) -> Result<(), StoreError> {
        self.update(None, Some(progress)).await
    }

    /// Write `progress` only if it differs from the current value.
    /// Returns whether a write happened.
    pub async fn set_progress_if_changed(&self, progress: &str) -> Result<bool, StoreError> {
        let mut record = self.record.lock().await;
        if record.progress.as_deref() == Some(progress) {
            return Ok(false);
        }
        let mut next = record.clone();
        next.progress = Some(progress.to_string());
        self.store.save(&next).await?;
        *record = next;
        Ok(true)
    }

    /// Enter an in-progress state with the progress cleared
    pub async fn begin(&self, status: AppStatus) -> Result<(), StoreError> {
        self.commit(|record| {
            record.status = status;
            record.progress = None;
        })
        .await
    }

    /// Put status and progress back to earlier values
    pub async fn restore(
        &self,
        status: AppStatus,
        progress: Option<String>,
    ) -> Result<(), StoreError> {
        self.commit(|record| {
            record.status = status;
            record.progress = progress;
        })
        .await
    }

    pub async fn set_charts(&self, charts: Vec<ChartRef>) -> Result<(), StoreError> {
        self.commit(|record| record.charts = charts).await
    }

    /// Apply `change` to a copy, persist it, then adopt it. A failed save
    /// leaves the shared record untouched.
    async fn commit(&self, change: impl FnOnce(&mut ApplicationRecord)) -> Result<(), StoreError> {
        let mut record = self.record.lock().await;
        let mut next = record.clone();
        change(&mut next);
        tracing::debug!(app = %next.name, status = %next.status, progress = ?next.progress, "Persisting application status");
        self.store.save(&next).await?;
        *record = next;
        Ok(())
    }

    /// Move an in-progress operation to its failure state
    pub async fn abort(&self, operation: &str) -> Result<(), StoreError> {
        let current = self.record.lock().await.status;
        if let Some(failed) = current.aborted() {
            self.update(Some(failed), Some(progress::ABORTED)).await?;
        }
        let name = self.name().await;
        tracing::error!(app = %name, "Application {} aborted!", operation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::record::AppKind;
    use crate::app::testing::MemoryStore;

    async fn tracker() -> (StatusTracker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::default());
        let app = ApplicationRecord::new("demo", "m", "m.yaml", AppKind::Custom);
        store.create(&app).await.unwrap();
        (StatusTracker::new(app, store.clone()), store)
    }

    #[tokio::test]
    async fn test_success_forces_completed_progress() {
        let (tracker, store) = tracker().await;
        tracker.set_progress(progress::EXTRACT_TARFILE).await.unwrap();
        tracker.update(Some(AppStatus::UploadSuccess), None).await.unwrap();

        let saved = store.get("demo").await.unwrap().unwrap();
        assert_eq!(saved.status, AppStatus::UploadSuccess);
        assert_eq!(saved.progress.as_deref(), Some(progress::COMPLETED));
    }

    #[tokio::test]
    async fn test_abort_maps_in_progress_to_failure() {
        let (tracker, store) = tracker().await;
        tracker.begin(AppStatus::ApplyInProgress).await.unwrap();
        tracker.abort("apply").await.unwrap();

        let saved = store.get("demo").await.unwrap().unwrap();
        assert_eq!(saved.status, AppStatus::ApplyFailure);
        assert_eq!(saved.progress.as_deref(), Some(progress::ABORTED));
    }

    #[tokio::test]
    async fn test_progress_written_only_on_change() {
        let (tracker, store) = tracker().await;
        let before = store.save_count();
        assert!(tracker.set_progress_if_changed("a").await.unwrap());
        assert!(!tracker.set_progress_if_changed("a").await.unwrap());
        assert!(tracker.set_progress_if_changed("b").await.unwrap());
        assert_eq!(store.save_count() - before, 2);
    }

    #[tokio::test]
    async fn test_failed_save_leaves_record_unchanged() {
        let (tracker, store) = tracker().await;
        tracker.begin(AppStatus::ApplyInProgress).await.unwrap();
        store.destroy("demo").await.unwrap();

        assert!(tracker.update(Some(AppStatus::ApplySuccess), None).await.is_err());
        assert!(tracker.set_progress_if_changed("a").await.is_err());
        let snap = tracker.snapshot().await;
        assert_eq!(snap.status, AppStatus::ApplyInProgress);
        assert!(snap.progress.is_none());
    }

    #[tokio::test]
    async fn test_begin_clears_progress() {
        let (tracker, _store) = tracker().await;
        tracker.set_progress("stale").await.unwrap();
        tracker.begin(AppStatus::RemoveInProgress).await.unwrap();
        let snap = tracker.snapshot().await;
        assert_eq!(snap.status, AppStatus::RemoveInProgress);
        assert!(snap.progress.is_none());
    }
}
