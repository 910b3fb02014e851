//! Natural-language watch goals evaluated against session observations.
//!
//! A `WatchManager` owns up to ten goals; each active goal gets one worker
//! that periodically gathers the latest observation per watched session,
//! asks the LLM provider whether action is needed, and raises a
//! notification unless the reply contains `<NoComment>`.

mod notifier;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ProfilePaths, WatchSettings};
use crate::error::{DeckError, Result};
use crate::events::{CoreEvent, EventBus};
use crate::observer::SessionObserver;
use crate::provider::{LlmProvider, Message};
use crate::utils::{CancelFlag, generate_session_id};

pub use notifier::DesktopNotifier;

/// The provider reply that means "nothing to do".
pub const NO_COMMENT: &str = "<NoComment>";

/// Session-list marker equivalent to "all sessions with observations".
pub const ALL_SESSIONS: &str = "*";

const MIN_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchAction {
    #[default]
    Notify,
    Suggest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchGoal {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub description: String,
    /// Watched session IDs; empty means every session with observations.
    #[serde(default)]
    pub sessions: Vec<String>,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Wall-clock budget from creation; expiry pauses the goal.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default)]
    pub action: WatchAction,
    #[serde(default)]
    pub paused: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trigger_count: u64,
}

pub struct WatchManager {
    goals: Arc<RwLock<HashMap<String, WatchGoal>>>,
    observer: Arc<SessionObserver>,
    provider: Arc<dyn LlmProvider>,
    settings: WatchSettings,
    paths: ProfilePaths,
    events: EventBus,
    notifier: Option<DesktopNotifier>,
    eval_timeout: Duration,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stop: Mutex<Option<CancelFlag>>,
}

impl WatchManager {
    pub fn new(
        observer: Arc<SessionObserver>,
        provider: Arc<dyn LlmProvider>,
        settings: WatchSettings,
        paths: ProfilePaths,
        events: EventBus,
        notifier: Option<DesktopNotifier>,
        eval_timeout: Duration,
    ) -> Self {
        Self {
            goals: Arc::new(RwLock::new(HashMap::new())),
            observer,
            provider,
            settings,
            paths,
            events,
            notifier,
            eval_timeout,
            workers: Mutex::new(Vec::new()),
            stop: Mutex::new(None),
        }
    }

    /// Validate and add a goal, filling defaults. Fails once the cap is
    /// reached.
    pub fn add_goal(&self, goal: WatchGoal) -> Result<WatchGoal> {
        let mut goal = goal;
        goal.description = goal.description.trim().to_string();
        if goal.description.is_empty() {
            return Err(DeckError::InvalidInput("goal description is empty".into()));
        }

        // "*" anywhere collapses the list to the all-sessions form.
        goal.sessions.retain(|s| !s.trim().is_empty());
        if goal.sessions.iter().any(|s| s == ALL_SESSIONS) {
            goal.sessions.clear();
        }

        if goal.id.is_empty() {
            goal.id = generate_session_id();
        }
        if goal.interval < MIN_INTERVAL {
            if goal.interval.is_zero() {
                goal.interval = Duration::from_secs(self.settings.default_interval_secs);
            } else {
                return Err(DeckError::InvalidInput(
                    "goal interval must be at least 1s".into(),
                ));
            }
        }
        if goal.timeout.is_zero() {
            goal.timeout = Duration::from_secs(self.settings.default_timeout_secs);
        }

        let mut goals = self.goals.write();
        if goals.contains_key(&goal.id) {
            return Err(DeckError::InvalidInput(format!(
                "goal {} already exists",
                goal.id
            )));
        }
        if goals.len() >= self.settings.max_concurrent_goals {
            return Err(DeckError::MaxGoalsReached(self.settings.max_concurrent_goals));
        }
        goals.insert(goal.id.clone(), goal.clone());
        drop(goals);

        // A manager that is already running picks the goal up immediately.
        if let Some(cancel) = self.stop.lock().clone() {
            self.spawn_worker(goal.clone(), cancel);
        }
        Ok(goal)
    }

    pub fn remove_goal(&self, id: &str) -> Result<()> {
        let mut goals = self.goals.write();
        goals
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DeckError::Watch(format!("goal {id} not found")))
    }

    pub fn pause_goal(&self, id: &str) -> Result<()> {
        self.set_paused(id, true)
    }

    pub fn resume_goal(&self, id: &str) -> Result<()> {
        self.set_paused(id, false)
    }

    fn set_paused(&self, id: &str, paused: bool) -> Result<()> {
        let mut goals = self.goals.write();
        let goal = goals
            .get_mut(id)
            .ok_or_else(|| DeckError::Watch(format!("goal {id} not found")))?;
        goal.paused = paused;
        Ok(())
    }

    pub fn get_goals(&self) -> Vec<WatchGoal> {
        let mut goals: Vec<WatchGoal> = self.goals.read().values().cloned().collect();
        goals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        goals
    }

    pub fn get_goal(&self, id: &str) -> Option<WatchGoal> {
        self.goals.read().get(id).cloned()
    }

    /// Launch one worker per goal. No-op when already started.
    pub fn start(&self) {
        let mut stop = self.stop.lock();
        if stop.is_some() {
            return;
        }
        let cancel = CancelFlag::new();
        *stop = Some(cancel.clone());
        drop(stop);

        for goal in self.get_goals() {
            self.spawn_worker(goal, cancel.clone());
        }
    }

    /// Cancel and join every worker.
    pub async fn stop(&self) {
        let Some(cancel) = self.stop.lock().take() else {
            return;
        };
        cancel.cancel();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            let _ = handle.await;
        }
    }

    fn spawn_worker(&self, goal: WatchGoal, cancel: CancelFlag) {
        let ctx = WorkerContext {
            goals: Arc::clone(&self.goals),
            observer: Arc::clone(&self.observer),
            provider: Arc::clone(&self.provider),
            events: self.events.clone(),
            notifier: self.notifier.clone(),
            eval_timeout: self.eval_timeout,
        };
        let goal_id = goal.id.clone();
        let interval = goal.interval.max(MIN_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // interval fires immediately; consume the first tick so the
            // cadence starts one period after launch.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(goal = %goal_id, "watch worker stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }

                let Some(goal) = ctx.goals.read().get(&goal_id).cloned() else {
                    return;
                };
                if goal.paused {
                    continue;
                }
                if !goal.timeout.is_zero()
                    && (Utc::now() - goal.created_at).to_std().unwrap_or_default() > goal.timeout
                {
                    info!(goal = %goal_id, "watch goal expired, pausing");
                    if let Some(current) = ctx.goals.write().get_mut(&goal_id) {
                        current.paused = true;
                    }
                    continue;
                }

                // One bad evaluation must not kill the worker.
                let evaluation =
                    std::panic::AssertUnwindSafe(ctx.evaluate(&goal)).catch_unwind().await;
                match evaluation {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(goal = %goal_id, error = %e, "watch evaluation failed"),
                    Err(_) => error!(goal = %goal_id, "watch worker panic recovered"),
                }
            }
        });
        self.workers.lock().push(handle);
    }

    /// Persist goals with the atomic-write protocol.
    pub async fn save_goals(&self) -> Result<()> {
        let goals = self.get_goals();
        let payload = serde_json::to_vec_pretty(&goals)?;
        crate::storage::write_atomic(&self.paths.watch_goals_file(), &payload).await
    }

    /// Load goals from disk, re-validating each through `add_goal`.
    pub async fn load_goals(&self) -> Result<()> {
        let path = self.paths.watch_goals_file();
        if !path.exists() {
            return Ok(());
        }
        let data = tokio::fs::read(&path).await?;
        let goals: Vec<WatchGoal> = serde_json::from_slice(&data)?;

        self.goals.write().clear();
        for goal in goals {
            if let Err(e) = self.add_goal(goal.clone()) {
                warn!(goal = %goal.id, error = %e, "skipping persisted watch goal");
            }
        }
        Ok(())
    }
}

struct WorkerContext {
    goals: Arc<RwLock<HashMap<String, WatchGoal>>>,
    observer: Arc<SessionObserver>,
    provider: Arc<dyn LlmProvider>,
    events: EventBus,
    notifier: Option<DesktopNotifier>,
    eval_timeout: Duration,
}

impl WorkerContext {
    async fn evaluate(&self, goal: &WatchGoal) -> Result<()> {
        let session_ids = if goal.sessions.is_empty() {
            self.observer.observed_session_ids()
        } else {
            goal.sessions.clone()
        };

        let mut blocks = Vec::new();
        for session_id in &session_ids {
            let Some(latest) = self.observer.get_latest_observation(session_id) else {
                continue;
            };
            let content = latest.content.trim();
            if content.is_empty() {
                continue;
            }
            blocks.push(format!(
                "Session {session_id} ({}):\n{content}",
                latest.timestamp.to_rfc3339()
            ));
        }
        if blocks.is_empty() {
            return Ok(());
        }

        let prompt = format!(
            "Goal: {}\nSession content: {}\nShould I take action? Reply {NO_COMMENT} if no, otherwise explain.",
            goal.description,
            blocks.join("\n\n"),
        );

        let messages = [Message::user(prompt)];
        let chat = self.provider.chat(&messages);
        let response = tokio::time::timeout(self.eval_timeout, chat)
            .await
            .map_err(|_| DeckError::Timeout("watch evaluation".into()))??;

        if response.contains(NO_COMMENT) {
            return Ok(());
        }
        let response = response.trim().to_string();

        let action = {
            let mut goals = self.goals.write();
            match goals.get_mut(&goal.id) {
                Some(current) => {
                    current.last_triggered = Some(Utc::now());
                    current.trigger_count += 1;
                    current.action
                }
                None => goal.action,
            }
        };

        match action {
            WatchAction::Suggest => {
                info!(goal = %goal.id, response = %response, "watch goal triggered (suggest)");
            }
            WatchAction::Notify => {
                info!(goal = %goal.id, response = %response, "watch goal triggered (notify)");
                if let Some(notifier) = &self.notifier {
                    notifier.notify(&goal.name, &response).await;
                }
            }
        }
        self.events.publish(CoreEvent::WatchTriggered {
            goal_id: goal.id.clone(),
            action,
            message: response,
        });
        Ok(())
    }
}

/// Interval/timeout wire format: integer seconds on write, integer seconds
/// or an ISO-8601 duration string on read.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Seconds(u64),
            Iso(String),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Wire::Iso(text) => parse_iso8601(&text)
                .ok_or_else(|| D::Error::custom(format!("invalid duration: {text}"))),
        }
    }

    /// Minimal ISO-8601 duration subset: `PT#H#M#S` with integer fields.
    pub(super) fn parse_iso8601(text: &str) -> Option<Duration> {
        let rest = text.strip_prefix("PT").or_else(|| text.strip_prefix("pt"))?;
        if rest.is_empty() {
            return None;
        }

        let mut total = 0u64;
        let mut digits = String::new();
        for c in rest.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
                continue;
            }
            let value: u64 = digits.parse().ok()?;
            digits.clear();
            total += match c.to_ascii_uppercase() {
                'H' => value.checked_mul(3600)?,
                'M' => value.checked_mul(60)?,
                'S' => value,
                _ => return None,
            };
        }
        if !digits.is_empty() {
            return None;
        }
        Some(Duration::from_secs(total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TEST_PROFILE;

    struct StubProvider {
        reply: String,
    }

    #[async_trait::async_trait]
    impl LlmProvider for StubProvider {
        fn name(&self) -> &'static str {
            "Stub"
        }

        async fn chat(&self, _messages: &[Message]) -> Result<String> {
            Ok(self.reply.clone())
        }

        async fn chat_stream(
            &self,
            _messages: &[Message],
            _cancel: CancelFlag,
        ) -> Result<tokio::sync::mpsc::Receiver<String>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    fn manager_with(reply: &str, root: &std::path::Path) -> WatchManager {
        let paths = ProfilePaths::under_root(root, TEST_PROFILE);
        std::fs::create_dir_all(&paths.profile_dir).unwrap();
        let observer = Arc::new(SessionObserver::new(
            paths.clone(),
            crate::config::ObservationSettings::default(),
        ));
        WatchManager::new(
            observer,
            Arc::new(StubProvider {
                reply: reply.into(),
            }),
            WatchSettings::default(),
            paths,
            EventBus::default(),
            None,
            Duration::from_secs(30),
        )
    }

    fn goal(description: &str) -> WatchGoal {
        WatchGoal {
            id: String::new(),
            name: "g".into(),
            description: description.into(),
            sessions: vec!["s1".into()],
            interval: Duration::from_secs(1),
            timeout: Duration::ZERO,
            action: WatchAction::Notify,
            paused: false,
            created_at: Utc::now(),
            last_triggered: None,
            trigger_count: 0,
        }
    }

    #[tokio::test]
    async fn add_goal_fills_defaults_and_generates_id() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(NO_COMMENT, dir.path());

        let mut g = goal("alert on errors");
        g.interval = Duration::ZERO;
        let added = manager.add_goal(g).unwrap();

        assert_eq!(added.id.len(), 16);
        assert_eq!(added.interval, Duration::from_secs(5));
        assert_eq!(added.timeout, Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn add_goal_enforces_cap() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(NO_COMMENT, dir.path());

        for i in 0..10 {
            manager.add_goal(goal(&format!("goal {i}"))).unwrap();
        }
        let err = manager.add_goal(goal("one too many")).unwrap_err();
        assert!(matches!(err, DeckError::MaxGoalsReached(10)));
    }

    #[tokio::test]
    async fn add_goal_rejects_empty_description_and_subsecond_interval() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(NO_COMMENT, dir.path());

        let mut g = goal("  ");
        g.description = "  ".into();
        assert!(manager.add_goal(g).is_err());

        let mut g = goal("ok");
        g.interval = Duration::from_millis(200);
        assert!(manager.add_goal(g).is_err());
    }

    #[tokio::test]
    async fn all_marker_collapses_to_every_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(NO_COMMENT, dir.path());

        let mut g = goal("watch everything");
        g.sessions = vec![ALL_SESSIONS.into(), "s1".into()];
        let added = manager.add_goal(g).unwrap();
        assert!(added.sessions.is_empty());
    }

    #[tokio::test]
    async fn pause_resume_round_trip_preserves_trigger_count() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(NO_COMMENT, dir.path());
        let added = manager.add_goal(goal("g")).unwrap();

        manager.pause_goal(&added.id).unwrap();
        assert!(manager.get_goal(&added.id).unwrap().paused);
        manager.resume_goal(&added.id).unwrap();

        let after = manager.get_goal(&added.id).unwrap();
        assert!(!after.paused);
        assert_eq!(after.trigger_count, added.trigger_count);
    }

    #[tokio::test]
    async fn goals_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(NO_COMMENT, dir.path());
        let added = manager.add_goal(goal("persist me")).unwrap();
        manager.save_goals().await.unwrap();

        let reloaded = manager_with(NO_COMMENT, dir.path());
        reloaded.load_goals().await.unwrap();
        let goals = reloaded.get_goals();
        assert_eq!(goals.len(), 1);
        assert_eq!(goals[0].id, added.id);
        assert_eq!(goals[0].description, "persist me");
    }

    #[test]
    fn duration_wire_accepts_both_formats() {
        let v1: WatchGoal = serde_json::from_value(serde_json::json!({
            "id": "g1", "description": "d", "interval": 5, "timeout": 3600,
            "created_at": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(v1.interval, Duration::from_secs(5));

        let v2: WatchGoal = serde_json::from_value(serde_json::json!({
            "id": "g2", "description": "d", "interval": "PT90S", "timeout": "PT1H",
            "created_at": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(v2.interval, Duration::from_secs(90));
        assert_eq!(v2.timeout, Duration::from_secs(3600));

        // Write path stays v1.
        let out = serde_json::to_value(&v2).unwrap();
        assert_eq!(out["interval"], 90);
    }

    #[test]
    fn iso8601_parser_subset() {
        use super::duration_secs::parse_iso8601;
        assert_eq!(parse_iso8601("PT5S"), Some(Duration::from_secs(5)));
        assert_eq!(parse_iso8601("PT2M30S"), Some(Duration::from_secs(150)));
        assert_eq!(parse_iso8601("PT1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_iso8601("5S"), None);
        assert_eq!(parse_iso8601("PT"), None);
        assert_eq!(parse_iso8601("PT5X"), None);
    }
}
