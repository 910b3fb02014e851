//! Startup wiring and background-worker lifecycle.
//!
//! `App` owns the core: registry, group tree, storage, observer, watch
//! engine, scheduler and the notification coordinator. One root cancel
//! flag scopes every worker; shutdown joins them under a single deadline.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{DeckConfig, ProfilePaths, effective_profile};
use crate::error::{DeckError, Result};
use crate::events::{CoreEvent, EventBus};
use crate::mux::{MuxBackend, TmuxBackend};
use crate::observer::SessionObserver;
use crate::provider::new_provider;
use crate::scheduler::{
    LOG_EVENT_CAPACITY, LogWatcher, StatusScheduler, ViewportHint, spawn_log_workers,
};
use crate::session::{
    ForkOptions, GroupTree, Instance, InstanceRecord, McpHook, NewInstance, NoopMcp,
    NotificationCoordinator, NotificationManager, SessionRegistry,
};
use crate::storage::{Storage, StorageWatcher};
use crate::watch::{DesktopNotifier, WatchManager};
use crate::utils::CancelFlag;

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

pub struct App {
    pub config: DeckConfig,
    pub registry: Arc<SessionRegistry>,
    pub group_tree: Arc<RwLock<GroupTree>>,
    pub storage: Arc<Storage>,
    pub observer: Arc<SessionObserver>,
    pub watch: Option<Arc<WatchManager>>,
    pub scheduler: Arc<StatusScheduler>,
    pub events: EventBus,
    pub mux: Arc<dyn MuxBackend>,
    notifications: Arc<NotificationManager>,
    mcp: Arc<dyn McpHook>,
    storage_watcher: Option<StorageWatcher>,
    _log_watcher: LogWatcher,
    cancel: CancelFlag,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl App {
    /// Wire the whole core for the given profile and start every
    /// background worker.
    pub async fn bootstrap(profile: Option<&str>) -> Result<App> {
        let profile = effective_profile(profile);
        let paths = ProfilePaths::resolve(&profile)?;
        Self::bootstrap_with(paths).await
    }

    /// Bootstrap against an explicit layout; tests point this at a
    /// tempdir.
    pub async fn bootstrap_with(paths: ProfilePaths) -> Result<App> {
        let config = DeckConfig::load(&paths.profile_dir).await?;
        let mux: Arc<dyn MuxBackend> = Arc::new(TmuxBackend::new(paths.ack_signal_file()));
        Self::assemble(paths, config, mux).await
    }

    pub async fn assemble(
        paths: ProfilePaths,
        config: DeckConfig,
        mux: Arc<dyn MuxBackend>,
    ) -> Result<App> {
        let storage = Arc::new(Storage::new(paths.clone(), config.storage.backup_count));
        storage.init().await?;

        let events = EventBus::default();
        let registry = Arc::new(SessionRegistry::new());
        let observer = Arc::new(SessionObserver::new(
            paths.clone(),
            config.observation.clone(),
        ));

        // Load the persisted graph.
        let snapshot = storage.load().await?;
        let mut tree = GroupTree::new(snapshot.groups);
        let mut loaded = Vec::new();
        for record in snapshot.instances {
            tree.ensure_group(&record.group_path);
            let inst = Arc::new(Instance::from_record(record, Arc::clone(&mux)));
            if let Err(e) = observer.load_session(&inst.id).await {
                warn!(session = %inst.id, error = %e, "observation load failed");
            }
            loaded.push(inst);
        }
        registry.replace_all(loaded);
        let group_tree = Arc::new(RwLock::new(tree));

        let cancel = CancelFlag::new();
        let mut workers = Vec::new();

        // Watch engine, when a provider is configured.
        let watch = match provider_api_key(&config) {
            Some(api_key) => {
                let provider = new_provider(&config.provider, &api_key)?;
                let notifier = config
                    .notifications
                    .desktop
                    .then(DesktopNotifier::new);
                let manager = Arc::new(WatchManager::new(
                    Arc::clone(&observer),
                    provider,
                    config.watch.clone(),
                    paths.clone(),
                    events.clone(),
                    notifier,
                    Duration::from_secs(config.provider.watch_timeout_secs),
                ));
                manager.load_goals().await?;
                manager.start();
                Some(manager)
            }
            None => {
                info!("no provider API key; watch goals disabled");
                None
            }
        };

        // Notification coordination, driven from the scheduler tick.
        let notifications = Arc::new(NotificationManager::new(config.notifications.max_shown));
        let coordinator = Arc::new(NotificationCoordinator::new(
            Arc::clone(&notifications),
            Arc::clone(&registry),
            Arc::clone(&mux),
        ));

        let (scheduler, scheduler_handle) = StatusScheduler::spawn(
            Arc::clone(&registry),
            Arc::clone(&mux),
            Arc::clone(&observer),
            coordinator,
            events.clone(),
            config.scheduler.clone(),
            cancel.clone(),
        );
        workers.push(scheduler_handle);

        // Event-driven fast path.
        let (log_tx, log_rx) = mpsc::channel(LOG_EVENT_CAPACITY);
        let log_watcher = LogWatcher::spawn(Arc::clone(&registry), log_tx);
        workers.extend(spawn_log_workers(
            config.scheduler.log_workers,
            Arc::clone(&registry),
            log_rx,
            cancel.clone(),
        ));

        // External-change detection on sessions.json.
        let (storage_tx, mut storage_rx) = mpsc::channel(8);
        let storage_watcher = match StorageWatcher::spawn(&paths.sessions_file(), storage_tx) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(error = %e, "storage watcher unavailable");
                None
            }
        };
        {
            let events = events.clone();
            let cancel = cancel.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        changed = storage_rx.recv() => {
                            if changed.is_none() {
                                return;
                            }
                            events.publish(CoreEvent::StorageChanged);
                        }
                    }
                }
            }));
        }

        Ok(App {
            config,
            registry,
            group_tree,
            storage,
            observer,
            watch,
            scheduler,
            events,
            mux,
            notifications,
            mcp: Arc::new(NoopMcp),
            storage_watcher,
            _log_watcher: log_watcher,
            cancel,
            workers: Mutex::new(workers),
        })
    }

    /// Cancel every background worker and wait for them, bounded by the
    /// shutdown deadline.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(watch) = &self.watch {
            watch.stop().await;
        }

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let joined = tokio::time::timeout(SHUTDOWN_DEADLINE, futures::future::join_all(workers));
        if joined.await.is_err() {
            warn!("shutdown deadline exceeded, abandoning workers");
        }
    }

    /// Create a session, persist it, then start its backend. The instance
    /// is durable before any backend work happens.
    pub async fn create_session(&self, params: NewInstance) -> Result<Arc<Instance>> {
        self.group_tree.write().ensure_group(&params.group_path);
        let inst = self.registry.add(Instance::create(params, Arc::clone(&self.mux))?)?;
        self.save().await?;

        inst.start().await?;
        self.events.publish(CoreEvent::SessionStarted {
            session_id: inst.id.clone(),
        });
        Ok(inst)
    }

    pub async fn restart_session(&self, id: &str, skip_mcp_regenerate: bool) -> Result<()> {
        let inst = self
            .registry
            .get(id)
            .ok_or_else(|| DeckError::SessionNotFound(id.to_string()))?;
        inst.restart(self.mcp.as_ref(), skip_mcp_regenerate).await?;
        self.events.publish(CoreEvent::SessionStarted {
            session_id: inst.id.clone(),
        });
        Ok(())
    }

    pub async fn fork_session(
        &self,
        id: &str,
        new_title: &str,
        new_group_path: &str,
        opts: ForkOptions,
    ) -> Result<Arc<Instance>> {
        let parent = self
            .registry
            .get(id)
            .ok_or_else(|| DeckError::SessionNotFound(id.to_string()))?;
        let forked = parent.fork(new_title, new_group_path, opts)?;

        self.group_tree.write().ensure_group(new_group_path);
        let forked = self.registry.add(forked)?;
        self.save().await?;

        forked.start().await?;
        self.events.publish(CoreEvent::SessionStarted {
            session_id: forked.id.clone(),
        });
        Ok(forked)
    }

    /// Delete a session: backend killed, observations and key bindings
    /// revoked synchronously, instance pushed onto the undo stack.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let inst = self.registry.remove(id)?;
        if let Err(e) = inst.kill().await {
            warn!(session = %id, error = %e, "backend kill failed during delete");
        }
        self.observer.remove_session(id).await;
        self.notifications.remove_session(id);
        self.notifications.reconcile_bindings(self.mux.as_ref()).await;
        self.save().await?;

        self.events.publish(CoreEvent::SessionRemoved {
            session_id: id.to_string(),
        });
        Ok(())
    }

    pub async fn undo_delete(&self) -> Result<Option<Arc<Instance>>> {
        let Some(inst) = self.registry.restore_last_deleted() else {
            return Ok(None);
        };
        self.group_tree.write().ensure_group(&inst.group_path());
        self.save().await?;
        Ok(Some(inst))
    }

    /// Persist the current graph. Self-induced watcher events are
    /// suppressed for the write window.
    pub async fn save(&self) -> Result<()> {
        let records: Vec<InstanceRecord> = self
            .registry
            .snapshot()
            .iter()
            .map(|inst| inst.to_record())
            .collect();
        let groups = self.group_tree.read().groups().to_vec();

        if let Some(watcher) = &self.storage_watcher {
            watcher.suppress_next();
        }
        self.storage.save_with_groups(&records, &groups).await
    }

    /// Reload from disk after an external change, preserving instances
    /// that are unchanged is not attempted: records are authoritative.
    pub async fn reload(&self) -> Result<()> {
        let snapshot = self.storage.load().await?;
        let mut tree = GroupTree::new(snapshot.groups);
        let mut loaded = Vec::new();
        for record in snapshot.instances {
            tree.ensure_group(&record.group_path);
            loaded.push(Arc::new(Instance::from_record(record, Arc::clone(&self.mux))));
        }
        self.registry.replace_all(loaded);
        *self.group_tree.write() = tree;
        Ok(())
    }

    /// Keystroke-driven refresh from the UI: non-blocking.
    pub fn request_refresh(&self, hint: ViewportHint) {
        self.scheduler.trigger(hint);
    }

    pub fn notifications(&self) -> &Arc<NotificationManager> {
        &self.notifications
    }
}

fn provider_api_key(config: &DeckConfig) -> Option<String> {
    let var = match config.provider.kind.as_str() {
        "anthropic" => "ANTHROPIC_API_KEY",
        "openai" | "openrouter" => "OPENAI_API_KEY",
        _ => return None,
    };
    env::var(var).ok().filter(|key| !key.is_empty())
}
