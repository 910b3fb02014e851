//! Bounded FIFO of content snapshots per session.
//!
//! Observations feed previews, AI summaries and watch evaluations. Content
//! is hashed before truncation so unchanged panes cost nothing; storage is
//! one JSON file per session under the profile's `observations/` dir.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use crate::config::{ObservationSettings, ProfilePaths};
use crate::error::{DeckError, Result};
use crate::session::{Instance, Status};
use crate::utils::truncate_str;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    /// Truncated to the configured max size.
    pub content: String,
    /// SHA-256 of the full content, computed before truncation.
    pub content_hash: String,
    pub status: Status,
}

#[derive(Debug, Default)]
struct ObservedSession {
    observations: Vec<Observation>,
    last_observed: Option<DateTime<Utc>>,
    /// Hash of the most recent capture, for change detection.
    content_hash: String,
}

pub struct SessionObserver {
    sessions: RwLock<HashMap<String, ObservedSession>>,
    settings: ObservationSettings,
    paths: ProfilePaths,
}

impl SessionObserver {
    pub fn new(paths: ProfilePaths, settings: ObservationSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
            paths,
        }
    }

    /// Capture the session's pane and record it if the content changed.
    ///
    /// The lock covers only the buffer surgery; persistence happens after
    /// release, on a copy.
    pub async fn observe(&self, instance: &Arc<Instance>) -> Result<()> {
        let content = instance.preview_full().await.map_err(|e| {
            DeckError::Storage(format!("capture failed for {}: {e}", instance.id))
        })?;

        let hash = sha256_hex(content.as_bytes());
        let status = instance.status();
        let now = Utc::now();

        let to_persist = {
            let mut sessions = self.sessions.write();
            let observed = sessions.entry(instance.id.clone()).or_default();
            observed.last_observed = Some(now);

            if observed.content_hash == hash {
                // Unchanged pane: idempotent, the timestamp advance is the
                // only effect.
                None
            } else {
                observed.content_hash = hash.clone();
                let truncated = truncate_str(&content, self.settings.max_size_bytes).to_string();

                if observed.observations.len() >= self.settings.retention_count {
                    let overflow = observed.observations.len() - self.settings.retention_count + 1;
                    observed.observations.drain(..overflow);
                }
                observed.observations.push(Observation {
                    timestamp: now,
                    content: truncated,
                    content_hash: hash,
                    status,
                });
                Some(observed.observations.clone())
            }
        };

        if let Some(observations) = to_persist {
            if let Err(e) = self.persist(&instance.id, &observations).await {
                warn!(session = %instance.id, error = %e, "failed to save observations");
            }
        }
        Ok(())
    }

    /// All observations for a session, copied.
    pub fn get_observations(&self, session_id: &str) -> Vec<Observation> {
        self.sessions
            .read()
            .get(session_id)
            .map(|o| o.observations.clone())
            .unwrap_or_default()
    }

    /// Most recent observation, copied.
    pub fn get_latest_observation(&self, session_id: &str) -> Option<Observation> {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|o| o.observations.last().cloned())
    }

    pub fn last_observed(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.sessions
            .read()
            .get(session_id)
            .and_then(|o| o.last_observed)
    }

    /// IDs with at least one observation, for all-sessions watch goals.
    pub fn observed_session_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .iter()
            .filter(|(_, o)| !o.observations.is_empty())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Drop a session's observations from memory and disk. Called on
    /// session delete.
    pub async fn remove_session(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
        let path = self.paths.observations_file(session_id);
        if path.exists()
            && let Err(e) = fs::remove_file(&path).await
        {
            warn!(session = %session_id, error = %e, "failed to remove observations file");
        }
    }

    /// Load a session's observations from disk. Files older than the
    /// retention window are purged instead. Missing files are fine.
    pub async fn load_session(&self, session_id: &str) -> Result<()> {
        let path = self.paths.observations_file(session_id);
        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let max_age = Duration::from_secs(self.settings.retention_days * 24 * 3600);
        let expired = metadata
            .modified()
            .ok()
            .and_then(|mtime| mtime.elapsed().ok())
            .is_some_and(|age| age > max_age);
        if expired {
            debug!(session = %session_id, "purging expired observations file");
            let _ = fs::remove_file(&path).await;
            return Ok(());
        }

        let data = fs::read(&path).await?;
        let observations: Vec<Observation> = serde_json::from_slice(&data)?;

        let mut sessions = self.sessions.write();
        let observed = sessions.entry(session_id.to_string()).or_default();
        observed.content_hash = observations
            .last()
            .map(|o| o.content_hash.clone())
            .unwrap_or_default();
        observed.observations = observations;
        Ok(())
    }

    async fn persist(&self, session_id: &str, observations: &[Observation]) -> Result<()> {
        let payload = serde_json::to_vec_pretty(observations)?;
        crate::storage::write_atomic(&self.paths.observations_file(session_id), &payload).await
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TEST_PROFILE;
    use crate::mux::MuxBackend;
    use crate::mux::testing::MockMux;
    use crate::session::NewInstance;
    use crate::tool::Tool;

    fn settings() -> ObservationSettings {
        ObservationSettings {
            max_size_bytes: 64,
            retention_count: 3,
            retention_days: 30,
        }
    }

    fn instance(mux: &Arc<MockMux>) -> Arc<Instance> {
        let inst = Instance::create(
            NewInstance {
                title: "obs".into(),
                tool: Tool::Claude,
                project_path: std::env::temp_dir(),
                group_path: String::new(),
                tool_options: serde_json::json!({}),
            },
            Arc::clone(mux) as Arc<dyn MuxBackend>,
        )
        .unwrap();
        let inst = Arc::new(inst);
        mux.add_session(&inst.session_name());
        inst
    }

    fn observer(root: &std::path::Path) -> SessionObserver {
        let paths = ProfilePaths::under_root(root, TEST_PROFILE);
        std::fs::create_dir_all(&paths.observations_dir).unwrap();
        SessionObserver::new(paths, settings())
    }

    #[tokio::test]
    async fn unchanged_content_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mux = Arc::new(MockMux::new());
        let inst = instance(&mux);
        let obs = observer(dir.path());

        mux.set_pane(&inst.session_name(), "same output");
        obs.observe(&inst).await.unwrap();
        let first_seen = obs.last_observed(&inst.id).unwrap();
        obs.observe(&inst).await.unwrap();

        assert_eq!(obs.get_observations(&inst.id).len(), 1);
        assert!(obs.last_observed(&inst.id).unwrap() >= first_seen);
    }

    #[tokio::test]
    async fn oversized_content_truncated_hash_of_full() {
        let dir = tempfile::tempdir().unwrap();
        let mux = Arc::new(MockMux::new());
        let inst = instance(&mux);
        let obs = observer(dir.path());

        let content = "x".repeat(65);
        mux.set_pane(&inst.session_name(), &content);
        obs.observe(&inst).await.unwrap();

        let stored = obs.get_latest_observation(&inst.id).unwrap();
        assert_eq!(stored.content.len(), 64);
        assert_eq!(stored.content_hash, sha256_hex(content.as_bytes()));
    }

    #[tokio::test]
    async fn fifo_evicts_oldest_at_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mux = Arc::new(MockMux::new());
        let inst = instance(&mux);
        let obs = observer(dir.path());

        for i in 0..4 {
            mux.set_pane(&inst.session_name(), &format!("output {i}"));
            obs.observe(&inst).await.unwrap();
        }

        let stored = obs.get_observations(&inst.id);
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].content, "output 1");
        assert_eq!(stored[2].content, "output 3");
    }

    #[tokio::test]
    async fn observations_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mux = Arc::new(MockMux::new());
        let inst = instance(&mux);

        {
            let obs = observer(dir.path());
            mux.set_pane(&inst.session_name(), "persisted output");
            obs.observe(&inst).await.unwrap();
        }

        let obs = observer(dir.path());
        obs.load_session(&inst.id).await.unwrap();
        let stored = obs.get_observations(&inst.id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "persisted output");

        // Reloaded hash short-circuits a repeat observation.
        mux.set_pane(&inst.session_name(), "persisted output");
        obs.observe(&inst).await.unwrap();
        assert_eq!(obs.get_observations(&inst.id).len(), 1);
    }

    #[tokio::test]
    async fn remove_session_drops_memory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let mux = Arc::new(MockMux::new());
        let inst = instance(&mux);
        let obs = observer(dir.path());

        mux.set_pane(&inst.session_name(), "bye");
        obs.observe(&inst).await.unwrap();
        let file = obs.paths.observations_file(&inst.id);
        assert!(file.exists());

        obs.remove_session(&inst.id).await;
        assert!(obs.get_observations(&inst.id).is_empty());
        assert!(!file.exists());
    }
}
