use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::instance::Instance;
use super::registry::SessionRegistry;
use crate::mux::{MuxBackend, SESSION_PREFIX};

/// A session needing attention, mapped to a digit hot key and a status-bar
/// segment. Derived state, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEntry {
    pub session_id: String,
    pub assigned_key: String,
    pub tmux_name: String,
    pub label: String,
    pub timestamp: DateTime<Utc>,
}

/// Derives the visible-notification set and keeps the multiplexer's
/// status bar and key bindings in sync with it.
///
/// Both the foreground UI and the background scheduler call in here; the
/// bar text and the binding mirror each have their own mutex, and the
/// reconcile step is the mirror's only writer.
pub struct NotificationManager {
    max_shown: usize,
    entries: Mutex<Vec<NotificationEntry>>,
    last_bar: Mutex<String>,
    /// key -> "sessionID:tmuxName", mirroring what tmux has bound. Held
    /// across the bind/unbind calls so reconciliation is single-writer.
    bound_keys: tokio::sync::Mutex<HashMap<String, String>>,
}

impl NotificationManager {
    pub fn new(max_shown: usize) -> Self {
        Self {
            max_shown,
            entries: Mutex::new(Vec::new()),
            last_bar: Mutex::new(String::new()),
            bound_keys: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn entries(&self) -> Vec<NotificationEntry> {
        self.entries.lock().clone()
    }

    /// Rebuild the entry set: every `waiting` session earns an entry except
    /// the one currently attached; most-recent-waiting-first, truncated to
    /// `max_shown`. Digit keys are reused across ticks for sessions that
    /// stay in the set, so a stable set causes no binding churn.
    pub fn sync_from_instances(
        &self,
        instances: &[Arc<Instance>],
        current_session_id: Option<&str>,
    ) {
        let mut waiting: Vec<&Arc<Instance>> = instances
            .iter()
            .filter(|inst| inst.status().needs_attention())
            .filter(|inst| Some(inst.id.as_str()) != current_session_id)
            .collect();
        waiting.sort_by(|a, b| b.waiting_since().cmp(&a.waiting_since()));
        waiting.truncate(self.max_shown);

        let mut entries = self.entries.lock();
        let previous_keys: HashMap<String, String> = entries
            .iter()
            .map(|e| (e.session_id.clone(), e.assigned_key.clone()))
            .collect();
        let keep_ids: HashSet<&str> = waiting.iter().map(|i| i.id.as_str()).collect();

        let mut used_keys: HashSet<String> = previous_keys
            .iter()
            .filter(|(id, _)| keep_ids.contains(id.as_str()))
            .map(|(_, key)| key.clone())
            .collect();

        let mut next: Vec<NotificationEntry> = Vec::with_capacity(waiting.len());
        for inst in waiting {
            let assigned_key = match previous_keys.get(&inst.id) {
                Some(key) => key.clone(),
                None => {
                    let Some(free) = (1..=self.max_shown)
                        .map(|d| d.to_string())
                        .find(|k| !used_keys.contains(k))
                    else {
                        continue;
                    };
                    used_keys.insert(free.clone());
                    free
                }
            };
            next.push(NotificationEntry {
                session_id: inst.id.clone(),
                assigned_key,
                tmux_name: inst.session_name(),
                label: inst.title(),
                timestamp: Utc::now(),
            });
        }
        *entries = next;
    }

    pub fn remove_session(&self, session_id: &str) {
        self.entries.lock().retain(|e| e.session_id != session_id);
    }

    pub fn format_bar(&self) -> String {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return String::new();
        }
        let segments: Vec<String> = entries
            .iter()
            .map(|e| format!("{}:{}", e.assigned_key, e.label))
            .collect();
        format!("⏳ {} ", segments.join("  "))
    }

    /// Push the bar to tmux only when the text changed since the last
    /// write.
    pub async fn sync_bar(&self, mux: &dyn MuxBackend) {
        let bar = self.format_bar();
        {
            let mut last = self.last_bar.lock();
            if *last == bar {
                return;
            }
            *last = bar.clone();
        }

        let result = if bar.is_empty() {
            mux.clear_status_left().await
        } else {
            mux.set_status_left(&bar).await
        };
        if let Err(e) = result {
            warn!(error = %e, "status bar update failed");
            return;
        }
        // Bypass the multiplexer's own status interval.
        let _ = mux.refresh_status_bar().await;
        debug!(bar = %bar, "notification bar updated");
    }

    /// Reconcile tmux key bindings with the entry set. The local mirror is
    /// the single source of what is bound; this is its only writer.
    pub async fn reconcile_bindings(&self, mux: &dyn MuxBackend) {
        let entries = self.entries();
        let wanted: HashMap<String, String> = entries
            .iter()
            .map(|e| {
                (
                    e.assigned_key.clone(),
                    format!("{}:{}", e.session_id, e.tmux_name),
                )
            })
            .collect();

        let mut mirror = self.bound_keys.lock().await;

        for entry in &entries {
            let binding = format!("{}:{}", entry.session_id, entry.tmux_name);
            if mirror.get(&entry.assigned_key) != Some(&binding) {
                if let Err(e) = mux
                    .bind_switch_key_with_ack(
                        &entry.assigned_key,
                        &entry.tmux_name,
                        &entry.session_id,
                    )
                    .await
                {
                    warn!(key = %entry.assigned_key, error = %e, "key bind failed");
                    continue;
                }
                mirror.insert(entry.assigned_key.clone(), binding);
            }
        }

        let stale: Vec<String> = mirror
            .keys()
            .filter(|key| !wanted.contains_key(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Err(e) = mux.unbind_key(&key).await {
                warn!(key = %key, error = %e, "key unbind failed");
            }
            mirror.remove(&key);
        }
    }

    #[cfg(test)]
    pub async fn bound_keys_mirror(&self) -> HashMap<String, String> {
        self.bound_keys.lock().await.clone()
    }
}

/// Per-tick reconciliation entry point, shared by the scheduler's
/// background loop and the foreground refresh. Consumes the cross-process
/// ack signal first so hot-key acknowledgments land even while the UI is
/// suspended behind an attach.
pub struct NotificationCoordinator {
    manager: Arc<NotificationManager>,
    registry: Arc<SessionRegistry>,
    mux: Arc<dyn MuxBackend>,
}

impl NotificationCoordinator {
    pub fn new(
        manager: Arc<NotificationManager>,
        registry: Arc<SessionRegistry>,
        mux: Arc<dyn MuxBackend>,
    ) -> Self {
        Self {
            manager,
            registry,
            mux,
        }
    }

    pub fn manager(&self) -> &Arc<NotificationManager> {
        &self.manager
    }

    pub async fn tick(&self) {
        let acked = self.mux.read_and_clear_ack_signal();
        if let Some(session_id) = &acked {
            if let Some(inst) = self.registry.get(session_id) {
                if inst.acknowledge() {
                    debug!(session = %session_id, "hot-key acknowledgment consumed");
                }
            }
        }

        // The signal names the session the user just switched to; it takes
        // priority over whatever tmux reports as attached.
        let current = match &acked {
            Some(id) => Some(id.clone()),
            None => self
                .mux
                .attached_session()
                .await
                .and_then(|name| name.strip_prefix(SESSION_PREFIX).map(str::to_string)),
        };

        let instances = self.registry.snapshot();
        self.manager
            .sync_from_instances(&instances, current.as_deref());
        self.manager.sync_bar(self.mux.as_ref()).await;
        self.manager.reconcile_bindings(self.mux.as_ref()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::testing::MockMux;
    use crate::session::instance::NewInstance;
    use crate::session::{Status, registry::SessionRegistry};
    use crate::tool::Tool;

    fn setup() -> (Arc<MockMux>, Arc<SessionRegistry>, Arc<NotificationManager>) {
        (
            Arc::new(MockMux::new()),
            Arc::new(SessionRegistry::new()),
            Arc::new(NotificationManager::new(6)),
        )
    }

    fn add_waiting(registry: &SessionRegistry, mux: &Arc<MockMux>, title: &str) -> Arc<Instance> {
        let inst = registry
            .add(
                Instance::create(
                    NewInstance {
                        title: title.into(),
                        tool: Tool::Claude,
                        project_path: std::env::temp_dir(),
                        group_path: String::new(),
                        tool_options: serde_json::json!({}),
                    },
                    Arc::clone(mux) as Arc<dyn MuxBackend>,
                )
                .unwrap(),
            )
            .unwrap();
        inst.force_status(Status::Waiting);
        inst
    }

    #[test]
    fn waiting_sessions_earn_entries_idle_do_not() {
        let (mux, registry, manager) = setup();
        let waiting = add_waiting(&registry, &mux, "w");
        let idle = add_waiting(&registry, &mux, "i");
        idle.force_status(Status::Idle);

        manager.sync_from_instances(&registry.snapshot(), None);
        let entries = manager.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].session_id, waiting.id);
        assert_eq!(entries[0].assigned_key, "1");
    }

    #[test]
    fn keys_stay_stable_across_ticks() {
        let (mux, registry, manager) = setup();
        let a = add_waiting(&registry, &mux, "a");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = add_waiting(&registry, &mux, "b");

        manager.sync_from_instances(&registry.snapshot(), None);
        let key_of = |entries: &[NotificationEntry], id: &str| {
            entries
                .iter()
                .find(|e| e.session_id == id)
                .map(|e| e.assigned_key.clone())
        };
        let first = manager.entries();
        let a_key = key_of(&first, &a.id).unwrap();
        let b_key = key_of(&first, &b.id).unwrap();

        // Another tick with the same set: identical assignment.
        manager.sync_from_instances(&registry.snapshot(), None);
        let second = manager.entries();
        assert_eq!(key_of(&second, &a.id).unwrap(), a_key);
        assert_eq!(key_of(&second, &b.id).unwrap(), b_key);
    }

    #[test]
    fn set_truncates_to_max_shown_most_recent_first() {
        let (mux, registry, _) = setup();
        let manager = NotificationManager::new(2);
        let mut ids = Vec::new();
        for i in 0..4 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            ids.push(add_waiting(&registry, &mux, &format!("s{i}")).id.clone());
        }

        manager.sync_from_instances(&registry.snapshot(), None);
        let entries = manager.entries();
        assert_eq!(entries.len(), 2);
        // Newest waiters shown.
        assert_eq!(entries[0].session_id, ids[3]);
        assert_eq!(entries[1].session_id, ids[2]);
    }

    #[tokio::test]
    async fn bar_written_only_on_change() {
        let (mux, registry, manager) = setup();
        add_waiting(&registry, &mux, "w");
        manager.sync_from_instances(&registry.snapshot(), None);

        manager.sync_bar(mux.as_ref()).await;
        manager.sync_bar(mux.as_ref()).await;
        assert_eq!(
            mux.status_writes.load(std::sync::atomic::Ordering::SeqCst),
            1
        );
        assert!(mux.status_left().unwrap().contains("1:w"));
    }

    #[tokio::test]
    async fn bindings_reconciled_and_stale_keys_unbound() {
        let (mux, registry, manager) = setup();
        let inst = add_waiting(&registry, &mux, "w");
        manager.sync_from_instances(&registry.snapshot(), None);
        manager.reconcile_bindings(mux.as_ref()).await;

        let bound = mux.bound_keys();
        assert_eq!(bound.len(), 1);
        assert_eq!(bound["1"].0, inst.id);

        // Session acknowledged: entry disappears, binding is removed.
        inst.acknowledge();
        manager.sync_from_instances(&registry.snapshot(), None);
        manager.reconcile_bindings(mux.as_ref()).await;
        assert!(mux.bound_keys().is_empty());
        assert!(manager.bound_keys_mirror().await.is_empty());
    }

    #[tokio::test]
    async fn coordinator_consumes_ack_signal() {
        let (mux, registry, manager) = setup();
        let inst = add_waiting(&registry, &mux, "w");
        mux.set_ack_signal(&inst.id);

        let coordinator = NotificationCoordinator::new(
            Arc::clone(&manager),
            Arc::clone(&registry),
            Arc::clone(&mux) as Arc<dyn MuxBackend>,
        );
        coordinator.tick().await;

        assert_eq!(inst.status(), Status::Idle);
        assert!(manager.entries().is_empty());
    }
}
