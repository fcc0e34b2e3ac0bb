/// Stop-file monitor.
///
/// Polls for the existence of a path and requests shutdown the first time it
/// shows up. The file is never modified or removed.
use crate::shutdown::{ShutdownReason, ShutdownSignal};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct StopFileWatcher {
    path: PathBuf,
    interval: Duration,
}

impl StopFileWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until the stop file appears or shutdown is requested elsewhere.
    ///
    /// If the path cannot be made absolute the watcher cannot do its job, so it
    /// requests shutdown instead of silently giving up.
    pub async fn watch(self, shutdown: ShutdownSignal) {
        let path = match std::path::absolute(&self.path) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to resolve stop file path"
                );
                shutdown.trigger(ShutdownReason::StopFileUnresolvable);
                return;
            }
        };

        tracing::info!(path = %path.display(), "monitoring stop file");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    tracing::debug!("stop file monitor exiting");
                    return;
                }
                _ = ticker.tick() => {
                    if exists(&path).await {
                        tracing::info!(path = %path.display(), "stop file detected");
                        shutdown.trigger(ShutdownReason::StopFile);
                        return;
                    }
                }
            }
        }
    }
}

/// Any successful stat counts, directories included.
async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}
