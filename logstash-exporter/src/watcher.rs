//! Polling watcher for the configuration file.

use std::future::Future;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Default interval between two reads of the watched file.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

/// Calls back whenever the contents of a file change.
pub struct FileWatcher {
    path: PathBuf,
    interval: Duration,
}

impl FileWatcher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    /// Poll the file until `on_change` returns [`ControlFlow::Break`].
    ///
    /// Unreadable files are skipped; the callback only fires once the file
    /// can be read again with different contents.
    pub async fn run<F, Fut>(self, mut on_change: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ControlFlow<()>>,
    {
        let mut last = tokio::fs::read(&self.path).await.ok();

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        debug!(path = %self.path.display(), interval = ?self.interval, "Watching config file");

        loop {
            ticker.tick().await;

            let contents = match tokio::fs::read(&self.path).await {
                Ok(contents) => contents,
                Err(e) => {
                    if last.take().is_some() {
                        warn!(path = %self.path.display(), error = %e, "Config file unreadable");
                    }
                    continue;
                }
            };

            if last.as_ref() == Some(&contents) {
                continue;
            }
            last = Some(contents);

            debug!(path = %self.path.display(), "Config file changed");
            if on_change().await.is_break() {
                break;
            }
        }
    }
}
