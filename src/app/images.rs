//! Bounded-concurrency image prefetch

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::utils::container::ContainerEngine;

/// Pulls a batch of images with at most `max_parallel` pulls in flight.
///
/// A failed pull never cancels the others. Every image is attempted exactly
/// once and the failures are reported together.
#[derive(Clone)]
pub struct ImageFetcher {
    engine: Arc<dyn ContainerEngine>,
    max_parallel: usize,
}

impl ImageFetcher {
    pub fn new(engine: Arc<dyn ContainerEngine>, max_parallel: usize) -> Self {
        Self {
            engine,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Pull every image and return the ones that failed, sorted.
    /// An empty result means the whole batch succeeded.
    pub async fn fetch_all<I, S>(&self, images: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let images: BTreeSet<String> = images.into_iter().map(Into::into).collect();
        if images.is_empty() {
            return Vec::new();
        }

        let workers = self.max_parallel.min(images.len());
        tracing::info!("Image download started, parallel threads: {}", workers);
        let batch_start = Instant::now();

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut set = JoinSet::new();
        for image in &images {
            let engine = Arc::clone(&self.engine);
            let semaphore = Arc::clone(&semaphore);
            let image = image.clone();
            set.spawn(async move {
                // Hold onto the permit until the pull finishes
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (image, false);
                };
                let ok = pull_one(engine.as_ref(), &image).await;
                (image, ok)
            });
        }

        let mut pending = images;
        let mut failed = BTreeSet::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((image, ok)) => {
                    pending.remove(&image);
                    if !ok {
                        failed.insert(image);
                    }
                }
                Err(e) => tracing::error!("Image download task failed: {}", e),
            }
        }
        // Anything never reported back belongs to a task that died
        failed.extend(pending);

        tracing::info!(
            "All docker images for application downloaded, elapsed time: {:.2?}",
            batch_start.elapsed()
        );
        failed.into_iter().collect()
    }
}

async fn pull_one(engine: &dyn ContainerEngine, image: &str) -> bool {
    let start = Instant::now();
    tracing::info!("Image {} download started", image);
    match engine.pull(image).await {
        Ok(()) => {
            tracing::info!(
                "Image {} download succeeded in {:.2?}",
                image,
                start.elapsed()
            );
            true
        }
        Err(e) => {
            tracing::error!("Image {} download failed: {}", image, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::FakeEngine;
    use std::time::Duration;

    #[tokio::test]
    async fn test_all_failures_are_collected() {
        let engine = Arc::new(FakeEngine::running());
        engine.fail_pull("registry/b:1");
        engine.fail_pull("registry/c:1");
        let fetcher = ImageFetcher::new(engine.clone(), 20);

        let failed = fetcher
            .fetch_all(["registry/a:1", "registry/b:1", "registry/c:1"])
            .await;
        assert_eq!(failed, vec!["registry/b:1", "registry/c:1"]);
        assert_eq!(engine.pulled().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicates_are_pulled_once() {
        let engine = Arc::new(FakeEngine::running());
        let fetcher = ImageFetcher::new(engine.clone(), 4);

        let failed = fetcher
            .fetch_all(vec!["nginx:1.25", "nginx:1.25", "redis:7"])
            .await;
        assert!(failed.is_empty());
        let mut pulled = engine.pulled();
        pulled.sort();
        assert_eq!(pulled, vec!["nginx:1.25", "redis:7"]);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let engine = Arc::new(FakeEngine::running());
        engine.set_pull_delay(Duration::from_millis(20));
        let fetcher = ImageFetcher::new(engine.clone(), 3);

        let images: Vec<String> = (0..12).map(|i| format!("img/{}:latest", i)).collect();
        assert!(fetcher.fetch_all(images).await.is_empty());
        assert!(engine.max_concurrent_pulls() <= 3);
        assert!(engine.max_concurrent_pulls() >= 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_success() {
        let engine = Arc::new(FakeEngine::running());
        let fetcher = ImageFetcher::new(engine.clone(), 20);
        assert!(fetcher.fetch_all(Vec::<String>::new()).await.is_empty());
        assert!(engine.pulled().is_empty());
    }
}
