use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::session::SessionRegistry;
use crate::tool::Tool;
use crate::utils::CancelFlag;

/// Capacity of the log-event channel. Overflow is dropped; the periodic
/// scheduler tick is the safety net.
pub const LOG_EVENT_CAPACITY: usize = 100;

/// Bursts for the same session inside this window collapse into one
/// update.
const COALESCE_WINDOW: Duration = Duration::from_millis(100);

/// Event-driven fast path: one filesystem watcher per tool session root,
/// mapping changed artifact files back to instance IDs and feeding them
/// to the log workers.
pub struct LogWatcher {
    _watchers: Vec<RecommendedWatcher>,
}

impl LogWatcher {
    /// Watch every tool root that exists. Missing roots are skipped; the
    /// tool just lacks the fast path until its directory appears.
    pub fn spawn(registry: Arc<SessionRegistry>, tx: mpsc::Sender<String>) -> Self {
        let last_enqueued: Arc<Mutex<HashMap<String, Instant>>> = Arc::new(Mutex::new(HashMap::new()));
        let mut watchers = Vec::new();

        for root in tool_roots() {
            if !root.is_dir() {
                continue;
            }

            let registry = Arc::clone(&registry);
            let tx = tx.clone();
            let last_enqueued = Arc::clone(&last_enqueued);

            let watcher = notify::recommended_watcher(
                move |result: std::result::Result<Event, notify::Error>| {
                    let event = match result {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "log watch error");
                            return;
                        }
                    };
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }

                    for path in &event.paths {
                        let Some(session_id) = resolve_session(&registry, path) else {
                            continue;
                        };

                        {
                            let mut last = last_enqueued.lock();
                            let now = Instant::now();
                            if last
                                .get(&session_id)
                                .is_some_and(|t| now.duration_since(*t) < COALESCE_WINDOW)
                            {
                                continue;
                            }
                            last.insert(session_id.clone(), now);
                        }

                        // Full channel: drop, the scheduler tick covers it.
                        if tx.try_send(session_id.clone()).is_err() {
                            debug!(session = %session_id, "log event dropped, channel full");
                        }
                    }
                },
            );

            match watcher {
                Ok(mut watcher) => {
                    if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
                        warn!(root = %root.display(), error = %e, "log watch failed");
                        continue;
                    }
                    debug!(root = %root.display(), "log watcher armed");
                    watchers.push(watcher);
                }
                Err(e) => warn!(error = %e, "log watcher init failed"),
            }
        }

        Self { _watchers: watchers }
    }
}

/// Map a changed artifact path to the session whose canonical tool
/// directory contains it.
fn resolve_session(registry: &SessionRegistry, changed: &Path) -> Option<String> {
    for inst in registry.snapshot() {
        let Ok(dir) = inst.tool.canonical_dir_for(&inst.project_path) else {
            continue;
        };
        if changed.starts_with(&dir) {
            return Some(inst.id.clone());
        }
    }
    None
}

fn tool_roots() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    Tool::ALL
        .iter()
        .map(|tool| match tool {
            Tool::Claude => home.join(".claude").join("projects"),
            Tool::Gemini => home.join(".gemini").join("tmp"),
            Tool::OpenCode => home.join(".opencode").join("sessions"),
            Tool::Codex => home.join(".codex").join("sessions"),
        })
        .collect()
}

/// Fixed pool draining the log-event channel; each worker updates one
/// instance at a time with panic recovery.
pub fn spawn_log_workers(
    pool_size: usize,
    registry: Arc<SessionRegistry>,
    rx: mpsc::Receiver<String>,
    cancel: CancelFlag,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    (0..pool_size)
        .map(|worker_idx| {
            let registry = Arc::clone(&registry);
            let rx = Arc::clone(&rx);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let session_id = {
                        let mut rx = rx.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            msg = rx.recv() => msg,
                        }
                    };
                    let Some(session_id) = session_id else { return };
                    let Some(inst) = registry.get(&session_id) else {
                        continue;
                    };

                    let update = inst.update_status();
                    match std::panic::AssertUnwindSafe(update).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            debug!(worker = worker_idx, session = %session_id, error = %e,
                                "log-triggered update failed");
                        }
                        Err(_) => {
                            error!(worker = worker_idx, session = %session_id,
                                "log worker panic recovered");
                        }
                    }
                }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::MuxBackend;
    use crate::mux::testing::MockMux;
    use crate::session::{Instance, NewInstance, Status};

    #[tokio::test]
    async fn log_workers_drain_channel_and_update() {
        let mux = Arc::new(MockMux::new());
        let registry = Arc::new(SessionRegistry::new());
        let inst = registry
            .add(
                Instance::create(
                    NewInstance {
                        title: "w".into(),
                        tool: Tool::Claude,
                        project_path: std::env::temp_dir(),
                        group_path: String::new(),
                        tool_options: serde_json::json!({}),
                    },
                    Arc::clone(&mux) as Arc<dyn MuxBackend>,
                )
                .unwrap(),
            )
            .unwrap();
        mux.add_session(&inst.session_name());
        mux.set_pane(&inst.session_name(), "✻ Thinking… (esc to interrupt)");
        inst.force_status(Status::Idle);

        let (tx, rx) = mpsc::channel(LOG_EVENT_CAPACITY);
        let cancel = CancelFlag::new();
        let workers = spawn_log_workers(2, Arc::clone(&registry), rx, cancel.clone());

        tx.send(inst.id.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(inst.status(), Status::Running);

        cancel.cancel();
        for worker in workers {
            let _ = worker.await;
        }
    }

    #[tokio::test]
    async fn unknown_session_events_are_ignored() {
        let registry = Arc::new(SessionRegistry::new());
        let (tx, rx) = mpsc::channel(LOG_EVENT_CAPACITY);
        let cancel = CancelFlag::new();
        let workers = spawn_log_workers(1, registry, rx, cancel.clone());

        tx.send("ghost".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        cancel.cancel();
        for worker in workers {
            let _ = worker.await;
        }
    }
}
