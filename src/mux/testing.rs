//! In-memory mux backend for tests. Sessions are plain entries in a map;
//! pane content is scripted by the test.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MuxBackend, SESSION_PREFIX, SessionDescriptor};
use crate::error::{DeckError, Result};

#[derive(Default)]
pub struct MockMux {
    sessions: Mutex<HashSet<String>>,
    panes: Mutex<HashMap<String, String>>,
    bound_keys: Mutex<HashMap<String, (String, String)>>,
    status_left: Mutex<Option<String>>,
    ack_signal: Mutex<Option<String>>,
    attached: Mutex<Option<String>>,
    pub capture_calls: AtomicUsize,
    pub status_writes: AtomicUsize,
}

impl MockMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pane(&self, name: &str, content: &str) {
        self.panes.lock().insert(name.to_string(), content.to_string());
    }

    pub fn add_session(&self, name: &str) {
        self.sessions.lock().insert(name.to_string());
    }

    pub fn remove_session(&self, name: &str) {
        self.sessions.lock().remove(name);
    }

    pub fn set_ack_signal(&self, session_id: &str) {
        *self.ack_signal.lock() = Some(session_id.to_string());
    }

    pub fn set_attached(&self, name: Option<&str>) {
        *self.attached.lock() = name.map(str::to_string);
    }

    pub fn bound_keys(&self) -> HashMap<String, (String, String)> {
        self.bound_keys.lock().clone()
    }

    pub fn status_left(&self) -> Option<String> {
        self.status_left.lock().clone()
    }

    pub fn has_session(&self, name: &str) -> bool {
        self.sessions.lock().contains(name)
    }
}

#[async_trait]
impl MuxBackend for MockMux {
    async fn create_session(
        &self,
        name: &str,
        _cwd: &Path,
        _cmd: &str,
        _env: &HashMap<String, String>,
    ) -> Result<()> {
        self.sessions.lock().insert(name.to_string());
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        if !name.starts_with(SESSION_PREFIX) {
            return Err(DeckError::ForeignSession(name.to_string()));
        }
        self.sessions.lock().remove(name);
        self.panes.lock().remove(name);
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.sessions.lock().contains(name)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionDescriptor>> {
        let attached = self.attached.lock().clone();
        Ok(self
            .sessions
            .lock()
            .iter()
            .map(|name| SessionDescriptor {
                name: name.clone(),
                attached: attached.as_deref() == Some(name),
            })
            .collect())
    }

    async fn capture_pane(&self, name: &str) -> Result<String> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        self.panes
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| DeckError::BackendUnavailable(format!("no pane for {name}")))
    }

    async fn send_keys(&self, _name: &str, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn set_status_left(&self, text: &str) -> Result<()> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        *self.status_left.lock() = Some(text.to_string());
        Ok(())
    }

    async fn clear_status_left(&self) -> Result<()> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        *self.status_left.lock() = None;
        Ok(())
    }

    async fn refresh_status_bar(&self) -> Result<()> {
        Ok(())
    }

    async fn bind_switch_key_with_ack(
        &self,
        key: &str,
        tmux_name: &str,
        session_id: &str,
    ) -> Result<()> {
        self.bound_keys
            .lock()
            .insert(key.to_string(), (session_id.to_string(), tmux_name.to_string()));
        Ok(())
    }

    async fn unbind_key(&self, key: &str) -> Result<()> {
        self.bound_keys.lock().remove(key);
        Ok(())
    }

    fn read_and_clear_ack_signal(&self) -> Option<String> {
        self.ack_signal.lock().take()
    }

    async fn attached_session(&self) -> Option<String> {
        self.attached.lock().clone()
    }

    async fn ensure_configured(&self, _name: &str) -> Result<()> {
        Ok(())
    }
}
