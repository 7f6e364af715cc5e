//! Progress monitoring by scraping the helper's operation log
//!
//! The helper exposes no status API, so progress is derived from marker
//! lines it writes while working through a manifest. Everything that
//! depends on the log format lives in this module.

use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::armada::ArmadaService;
use super::error::AppError;
use super::record::is_excluded_chart;
use super::status::StatusTracker;
use crate::config::settings::MonitorSettings;

/// Marker written once per chart during an apply
pub const APPLY_SEARCH_PATTERN: &str = "Processing Chart,";

/// Marker written once per release during a delete
pub const DELETE_SEARCH_PATTERN: &str = "Deleting release";

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid ANSI escape pattern"));

/// What was found in the log so far
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStats {
    pub last_chart: String,
    /// Markers that count towards completion
    pub processed: usize,
}

/// Parse grep output for marker lines.
///
/// The chart is the last token of a line; `key=value` tokens are reduced to
/// their value. Charts in `excluded` are reported but not counted. Returns
/// `None` when there are no markers yet.
pub fn parse_log_stats(output: &str, excluded: &[String]) -> Option<LogStats> {
    let cleaned = ANSI_ESCAPE.replace_all(output, "");
    let charts: Vec<&str> = cleaned
        .lines()
        .filter_map(|line| line.split_whitespace().last())
        .map(|token| match token.split_once('=') {
            Some((_, value)) => value,
            None => token,
        })
        .collect();

    let last_chart = charts.last()?.to_string();
    let processed = charts
        .iter()
        .filter(|chart| !is_excluded_chart(chart, excluded))
        .count();
    Some(LogStats {
        last_chart,
        processed,
    })
}

/// Rounded percent complete, clamped to 100
pub fn completion_percent(processed: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    let percent = (processed as f64 / total as f64 * 100.0).round() as u32;
    percent.min(100)
}

pub fn progress_message(chart: &str, percent: u32) -> String {
    format!("processing chart: {}, overall completion: {}%", chart, percent)
}

/// What one monitored operation looks like
#[derive(Debug, Clone)]
pub struct MonitorTarget {
    pub pattern: &'static str,
    pub log_file: String,
    /// Denominator for the percent calculation
    pub total: usize,
    /// Charts whose markers do not count towards completion
    pub excluded: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorTiming {
    pub timeout: Duration,
    pub start_delay: Duration,
    pub poll_interval: Duration,
}

impl From<&MonitorSettings> for MonitorTiming {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            start_delay: settings.start_delay(),
            poll_interval: settings.poll_interval(),
        }
    }
}

#[derive(Clone)]
pub struct ProgressMonitor {
    service: Arc<ArmadaService>,
    timing: MonitorTiming,
}

impl ProgressMonitor {
    pub fn new(service: Arc<ArmadaService>, timing: MonitorTiming) -> Self {
        Self { service, timing }
    }

    /// Spawn the polling task. It runs until [`MonitorHandle::stop`] is
    /// called or the timeout elapses.
    pub fn start(&self, tracker: StatusTracker, target: MonitorTarget) -> MonitorHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let service = Arc::clone(&self.service);
        let timing = self.timing;

        let task = tokio::spawn(async move {
            let name = tracker.name().await;
            tracing::info!("Starting progress monitoring thread for app {}", name);
            let polled = tokio::time::timeout(
                timing.timeout,
                poll(service, &tracker, &target, timing, stop_rx),
            )
            .await;
            tracing::info!("Exiting progress monitoring thread for app {}", name);

            polled.map_err(|_| AppError::ProgressMonitorTimeout {
                name,
                secs: timing.timeout.as_secs(),
            })
        });

        MonitorHandle {
            stop_tx: Some(stop_tx),
            task,
        }
    }
}

async fn poll(
    service: Arc<ArmadaService>,
    tracker: &StatusTracker,
    target: &MonitorTarget,
    timing: MonitorTiming,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let grep = vec![
        "grep".to_string(),
        target.pattern.to_string(),
        target.log_file.clone(),
    ];
    let mut delay = timing.start_delay;
    let mut best = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => {
                tracing::debug!("Received monitor stop signal");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
        delay = timing.poll_interval;

        let output = match service.exec(&grep).await {
            // grep exits 1 with no matches and 2 when the log is not there yet
            Ok(output) if output.exit_code == 0 => output.output,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Unable to read {}: {}", target.log_file, e);
                continue;
            }
        };
        let Some(stats) = parse_log_stats(&output, &target.excluded) else {
            continue;
        };

        best = best.max(completion_percent(stats.processed, target.total));
        let message = progress_message(&stats.last_chart, best);
        match tracker.set_progress_if_changed(&message).await {
            Ok(true) => tracing::info!("{}", message),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to persist progress: {}", e),
        }
    }
}

/// Handle to a running monitor
pub struct MonitorHandle {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), AppError>>,
}

impl MonitorHandle {
    /// Signal the monitor and wait until it has exited.
    ///
    /// Returns the timeout error if the monitor gave up on its own first.
    pub async fn stop(mut self) -> Result<(), AppError> {
        if let Some(tx) = self.stop_tx.take() {
            // The receiver is gone if the monitor already timed out
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Progress monitor task failed: {}", e);
                Ok(())
            }
        }
    }
}
