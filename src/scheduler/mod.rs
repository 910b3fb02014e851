//! Adaptive status polling.
//!
//! One long-lived worker keeps every session's status approximately fresh
//! without starving any of them: visible sessions first, then a bounded
//! round-robin batch, with idle sessions left to the log-watcher fast
//! path. The worker owns its own ticker, so updates continue while the UI
//! is suspended behind an attach.

mod log_watcher;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::SchedulerSettings;
use crate::events::{CoreEvent, EventBus};
use crate::mux::MuxBackend;
use crate::observer::SessionObserver;
use crate::session::{Instance, NotificationCoordinator, SessionRegistry};
use crate::utils::CancelFlag;

pub use log_watcher::{LOG_EVENT_CAPACITY, LogWatcher, spawn_log_workers};

/// What the UI currently shows; drives the visible-first update policy.
#[derive(Debug, Clone, Default)]
pub struct ViewportHint {
    pub view_offset: usize,
    pub visible_height: usize,
    /// Session IDs in current display order.
    pub flat_session_ids: Vec<String>,
}

impl ViewportHint {
    fn visible_ids(&self) -> HashSet<&str> {
        self.flat_session_ids
            .iter()
            .skip(self.view_offset)
            .take(self.visible_height)
            .map(String::as_str)
            .collect()
    }
}

pub struct StatusScheduler {
    registry: Arc<SessionRegistry>,
    mux: Arc<dyn MuxBackend>,
    observer: Arc<SessionObserver>,
    coordinator: Arc<NotificationCoordinator>,
    events: EventBus,
    settings: SchedulerSettings,
    trigger_tx: mpsc::Sender<ViewportHint>,
    cursor: AtomicUsize,
    /// Derived status-counts cache validity; cleared on any change.
    counts_valid: Arc<AtomicBool>,
}

impl StatusScheduler {
    /// Build the scheduler and spawn its worker. The returned handle
    /// completes after cancellation.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        registry: Arc<SessionRegistry>,
        mux: Arc<dyn MuxBackend>,
        observer: Arc<SessionObserver>,
        coordinator: Arc<NotificationCoordinator>,
        events: EventBus,
        settings: SchedulerSettings,
        cancel: CancelFlag,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (scheduler, trigger_rx) =
            Self::new(registry, mux, observer, coordinator, events, settings);
        let worker = Arc::clone(&scheduler);
        let handle = tokio::spawn(async move {
            worker.run(trigger_rx, cancel).await;
        });
        (scheduler, handle)
    }

    fn new(
        registry: Arc<SessionRegistry>,
        mux: Arc<dyn MuxBackend>,
        observer: Arc<SessionObserver>,
        coordinator: Arc<NotificationCoordinator>,
        events: EventBus,
        settings: SchedulerSettings,
    ) -> (Arc<Self>, mpsc::Receiver<ViewportHint>) {
        // Capacity 1: a dropped trigger is retried by the next tick, and
        // the UI must never block on a busy worker.
        let (trigger_tx, trigger_rx) = mpsc::channel(1);

        let scheduler = Arc::new(Self {
            registry,
            mux,
            observer,
            coordinator,
            events,
            settings,
            trigger_tx,
            cursor: AtomicUsize::new(0),
            counts_valid: Arc::new(AtomicBool::new(false)),
        });
        (scheduler, trigger_rx)
    }

    /// Non-blocking refresh request from the UI. Dropped when the worker
    /// is busy; the periodic tick is the safety net.
    pub fn trigger(&self, hint: ViewportHint) {
        if self.trigger_tx.try_send(hint).is_err() {
            debug!("status trigger dropped, worker busy");
        }
    }

    pub fn counts_cache_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.counts_valid)
    }

    #[cfg(test)]
    pub fn round_robin_cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    async fn run(&self, mut trigger_rx: mpsc::Receiver<ViewportHint>, cancel: CancelFlag) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.settings.tick_interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // Sessions newly added to the scheduler still get configured
        // lazily, one per tick.
        let mut configured_attempted: HashSet<String> = HashSet::new();
        let mut last_hint = ViewportHint::default();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("status scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {}
                Some(hint) = trigger_rx.recv() => {
                    last_hint = hint;
                }
            }

            // One panic inside a tick must not kill the worker.
            let tick = self.process_tick(&last_hint, &mut configured_attempted);
            if std::panic::AssertUnwindSafe(tick).catch_unwind().await.is_err() {
                error!("scheduler tick panic recovered");
            }
        }
    }

    async fn process_tick(&self, hint: &ViewportHint, configured_attempted: &mut HashSet<String>) {
        // One batched query refreshes the existence cache for every
        // exists() call this tick.
        if let Err(e) = self.mux.list_sessions().await {
            warn!(error = %e, "session list refresh failed");
        }

        let instances = self.registry.snapshot();
        if !instances.is_empty() {
            self.configure_one(&instances, configured_attempted).await;

            let visible = hint.visible_ids();
            let mut updated: HashSet<String> = HashSet::new();
            let mut changed = false;

            // Visible sessions first: UI responsiveness beats fairness.
            for inst in &instances {
                if visible.contains(inst.id.as_str()) && !inst.status().skip_in_round_robin() {
                    changed |= self.update_one(inst).await;
                    updated.insert(inst.id.clone());
                }
            }

            // Round-robin the rest, skipping idle sessions; they need user
            // input to change and the log watcher covers them.
            let mut remaining = self.settings.batch_size;
            let count = instances.len();
            let start = self.cursor.load(Ordering::SeqCst);
            for i in 0..count {
                if remaining == 0 {
                    break;
                }
                let idx = (start + i) % count;
                let inst = &instances[idx];
                if updated.contains(&inst.id) || inst.status().skip_in_round_robin() {
                    continue;
                }
                changed |= self.update_one(inst).await;
                remaining -= 1;
                self.cursor.store((idx + 1) % count, Ordering::SeqCst);
            }

            if changed {
                self.counts_valid.store(false, Ordering::SeqCst);
            }
        }

        // Always: the coordinator checks the ack-signal file even when no
        // status moved.
        self.coordinator.tick().await;
    }

    /// Update one session with panic isolation. Returns whether the
    /// status changed.
    async fn update_one(&self, inst: &Arc<Instance>) -> bool {
        let old = inst.status();

        let update = inst.update_status();
        match std::panic::AssertUnwindSafe(update).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = %inst.id, error = %e, "status update failed"),
            Err(_) => error!(session = %inst.id, "status update panic recovered"),
        }

        let observe = self.observer.observe(inst);
        match std::panic::AssertUnwindSafe(observe).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = %inst.id, error = %e, "observation failed"),
            Err(_) => error!(session = %inst.id, "observer panic recovered"),
        }

        let new = inst.status();
        if new != old {
            self.events.publish(CoreEvent::StatusChanged {
                session_id: inst.id.clone(),
                status: new,
            });
            true
        } else {
            false
        }
    }

    /// Lazily apply one-time tmux options, at most one session per tick.
    async fn configure_one(&self, instances: &[Arc<Instance>], attempted: &mut HashSet<String>) {
        for inst in instances {
            let name = inst.session_name();
            if attempted.contains(&name) || !self.mux.exists(&name) {
                continue;
            }
            attempted.insert(name.clone());
            if let Err(e) = self.mux.ensure_configured(&name).await {
                debug!(session = %name, error = %e, "session configure failed");
            }
            break;
        }
    }
}
