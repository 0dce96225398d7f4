//! File change notification for the mirror document.
//!
//! [`Watch`] turns a path into a stream of [`ChangeEvent`]s. [`NotifyWatch`]
//! uses the platform's native API; [`PollWatch`] compares modification times
//! on an interval and works anywhere.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::error::MirrorError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub at: SystemTime,
}

/// A stream of change events. Dropping it stops the underlying watcher.
pub struct WatchStream {
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    _guard: WatchGuard,
}

enum WatchGuard {
    Native(RecommendedWatcher),
    Poll(DropGuard),
}

impl WatchStream {
    /// Next change, or `None` once the watcher has stopped.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }

    /// Discard queued events, returning how many there were.
    pub fn drain(&mut self) -> usize {
        let mut n = 0;
        while self.rx.try_recv().is_ok() {
            n += 1;
        }
        n
    }
}

pub trait Watch: Send + Sync {
    fn watch(&self, path: &Path) -> Result<WatchStream, MirrorError>;
}

/// Native watcher on the document's parent directory, filtered to the
/// document's file name so atomic replace-by-rename is seen.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyWatch;

impl Watch for NotifyWatch {
    fn watch(&self, path: &Path) -> Result<WatchStream, MirrorError> {
        let failed = |message: String| MirrorError::WatchFailed {
            path: path.to_path_buf(),
            message,
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let name = path
            .file_name()
            .ok_or_else(|| failed("path has no file name".into()))?
            .to_os_string();
        fs::create_dir_all(&dir).map_err(|e| failed(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let target = path.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                if event.paths.iter().any(|p| p.file_name() == Some(name.as_os_str())) {
                    let _ = tx.send(ChangeEvent {
                        path: target.clone(),
                        at: SystemTime::now(),
                    });
                }
            }
            Err(e) => warn!("mirror watch error: {e}"),
        })
        .map_err(|e| failed(e.to_string()))?;
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| failed(e.to_string()))?;
        debug!(path = %path.display(), "native mirror watch installed");

        Ok(WatchStream {
            rx,
            _guard: WatchGuard::Native(watcher),
        })
    }
}

/// Polls the document's modification time and length.
///
/// Must be called from inside a tokio runtime.
#[derive(Debug, Clone, Copy)]
pub struct PollWatch {
    interval: Duration,
}

impl PollWatch {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(10)),
        }
    }
}

impl Default for PollWatch {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

impl Watch for PollWatch {
    fn watch(&self, path: &Path) -> Result<WatchStream, MirrorError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| MirrorError::WatchFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let stop = token.clone();
        let target = path.to_path_buf();
        let interval = self.interval;
        // Baseline now: edits made before the task first runs must still be seen.
        let mut last = fingerprint(&target);

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let now = fingerprint(&target);
                if now != last && now.is_some() {
                    last = now;
                    if tx
                        .send(ChangeEvent {
                            path: target.clone(),
                            at: SystemTime::now(),
                        })
                        .is_err()
                    {
                        break;
                    }
                } else {
                    last = now;
                }
            }
        });

        Ok(WatchStream {
            rx,
            _guard: WatchGuard::Poll(token.drop_guard()),
        })
    }
}

fn fingerprint(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn poll_watch_reports_modifications() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.md");
        fs::write(&path, "one").unwrap();

        let mut stream = PollWatch::new(Duration::from_millis(20)).watch(&path).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        fs::write(&path, "two, longer").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.path, path);
    }

    #[tokio::test]
    async fn poll_watch_reports_edit_made_right_after_watch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.md");
        fs::write(&path, "one").unwrap();

        let mut stream = PollWatch::new(Duration::from_millis(20)).watch(&path).unwrap();
        // No yield in between: the polling task has not run yet.
        fs::write(&path, "two, longer").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.path, path);
    }

    #[tokio::test]
    async fn notify_watch_sees_atomic_replace() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions.md");
        fs::write(&path, "one").unwrap();

        let mut stream = NotifyWatch.watch(&path).unwrap();
        crate::storage::write_atomic(&path, b"two").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.path, path);
    }

    #[test]
    fn poll_watch_needs_a_runtime() {
        let dir = TempDir::new().unwrap();
        let err = PollWatch::default().watch(&dir.path().join("x.md")).err().unwrap();
        assert!(matches!(err, MirrorError::WatchFailed { .. }));
    }
}
