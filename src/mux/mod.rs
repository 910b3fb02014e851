//! Terminal-multiplexer capability.
//!
//! The core drives a tmux-like backend through `MuxBackend` only:
//! - `TmuxBackend`: the real adapter, shelling out to `tmux`
//! - `testing::MockMux`: scripted in-memory backend for tests
//!
//! Every session the core owns is named with the `agentdeck_` prefix; the
//! adapter refuses destructive operations outside that namespace and never
//! issues server-wide commands.

mod tmux;

pub mod testing;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

pub use tmux::TmuxBackend;

/// Prefix for every backend session the core owns.
pub const SESSION_PREFIX: &str = "agentdeck_";

/// Capture cache TTL shared by previews and observations.
pub const CAPTURE_TTL_MS: u64 = 500;

pub fn session_name(session_id: &str) -> String {
    format!("{SESSION_PREFIX}{session_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub name: String,
    pub attached: bool,
}

#[async_trait]
pub trait MuxBackend: Send + Sync {
    /// Spawn a detached session running `cmd` in `cwd` with `env` injected.
    async fn create_session(
        &self,
        name: &str,
        cwd: &Path,
        cmd: &str,
        env: &HashMap<String, String>,
    ) -> Result<()>;

    /// Kill one session. Must refuse names outside the agentdeck namespace.
    async fn kill_session(&self, name: &str) -> Result<()>;

    /// Cheap existence check against the cached session list.
    fn exists(&self, name: &str) -> bool;

    /// One batched `list-sessions` call; refreshes the existence cache.
    async fn list_sessions(&self) -> Result<Vec<SessionDescriptor>>;

    /// Capture the visible pane buffer. Results are cached for
    /// [`CAPTURE_TTL_MS`]; concurrent misses for the same name are
    /// single-flighted.
    async fn capture_pane(&self, name: &str) -> Result<String>;

    async fn send_keys(&self, name: &str, text: &str) -> Result<()>;

    async fn set_status_left(&self, text: &str) -> Result<()>;

    async fn clear_status_left(&self) -> Result<()>;

    /// Force an immediate status-bar redraw, bypassing the status interval.
    async fn refresh_status_bar(&self) -> Result<()>;

    /// Bind a digit hot key that switches to `tmux_name` and records
    /// `session_id` in the ack-signal file.
    async fn bind_switch_key_with_ack(
        &self,
        key: &str,
        tmux_name: &str,
        session_id: &str,
    ) -> Result<()>;

    async fn unbind_key(&self, key: &str) -> Result<()>;

    /// Consume the cross-process ack handshake, if present. Returns the
    /// acknowledged session ID.
    fn read_and_clear_ack_signal(&self) -> Option<String>;

    /// Best-effort name of the currently attached session.
    async fn attached_session(&self) -> Option<String>;

    /// One-time per-session tmux option setup. Applied lazily by the
    /// scheduler, at most one session per tick.
    async fn ensure_configured(&self, name: &str) -> Result<()>;
}
