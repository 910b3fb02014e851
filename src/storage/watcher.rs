use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{DeckError, Result};

const DEBOUNCE: Duration = Duration::from_millis(100);

/// How long after a self-induced write external events are swallowed.
const SUPPRESS_WINDOW: Duration = Duration::from_millis(500);

/// Watches `sessions.json` for external modification and emits on a
/// bounded channel. The writer calls [`StorageWatcher::suppress_next`]
/// just before its own save so self-induced events don't echo back as
/// reload prompts.
pub struct StorageWatcher {
    _watcher: RecommendedWatcher,
    suppress_until: Arc<Mutex<Option<Instant>>>,
}

impl StorageWatcher {
    /// Watch the file's parent directory (atomic renames replace the inode,
    /// so watching the file itself would go stale after one save).
    pub fn spawn(sessions_file: &Path, tx: mpsc::Sender<PathBuf>) -> Result<Self> {
        let file_name = sessions_file
            .file_name()
            .ok_or_else(|| DeckError::Storage("sessions path has no file name".into()))?
            .to_os_string();
        let parent = sessions_file
            .parent()
            .ok_or_else(|| DeckError::Storage("sessions path has no parent".into()))?
            .to_path_buf();

        let suppress_until = Arc::new(Mutex::new(None::<Instant>));
        let suppress = Arc::clone(&suppress_until);
        let last_sent = Mutex::new(None::<Instant>);
        let notify_path = sessions_file.to_path_buf();

        let mut watcher = notify::recommended_watcher(
            move |result: std::result::Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "storage watch error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                if !event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()))
                {
                    return;
                }

                let now = Instant::now();
                if let Some(until) = *suppress.lock()
                    && now < until
                {
                    debug!("suppressing self-induced storage event");
                    return;
                }
                {
                    let mut last = last_sent.lock();
                    if last.is_some_and(|t| now.duration_since(t) < DEBOUNCE) {
                        return;
                    }
                    *last = Some(now);
                }

                // Bounded channel; a dropped event is recovered by the next
                // manual refresh.
                let _ = tx.try_send(notify_path.clone());
            },
        )
        .map_err(|e| DeckError::Storage(format!("watcher init failed: {e}")))?;

        watcher
            .watch(&parent, RecursiveMode::NonRecursive)
            .map_err(|e| DeckError::Storage(format!("watch failed: {e}")))?;

        Ok(Self {
            _watcher: watcher,
            suppress_until,
        })
    }

    /// Arm the self-write suppression window. Call immediately before a
    /// save.
    pub fn suppress_next(&self) {
        *self.suppress_until.lock() = Some(Instant::now() + SUPPRESS_WINDOW);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    #[tokio::test]
    async fn external_write_emits_event() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sessions.json");
        std::fs::write(&file, b"{}").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let _watcher = StorageWatcher::spawn(&file, tx).unwrap();

        // Give the backend a moment to arm.
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(&file, b"{\"changed\":1}").unwrap();

        let got = timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(got.is_ok(), "no storage event within deadline");
    }

    #[tokio::test]
    async fn suppressed_write_does_not_echo() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sessions.json");
        std::fs::write(&file, b"{}").unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let watcher = StorageWatcher::spawn(&file, tx).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        watcher.suppress_next();
        std::fs::write(&file, b"{\"self\":1}").unwrap();

        let got = timeout(Duration::from_millis(700), rx.recv()).await;
        assert!(got.is_err(), "self-induced event leaked through");
    }
}
