use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CAPTURE_TTL_MS, MuxBackend, SESSION_PREFIX, SessionDescriptor};
use crate::error::{DeckError, Result};

#[derive(Clone)]
struct CachedCapture {
    taken_at: Instant,
    content: String,
}

/// tmux adapter. All subprocess work happens on the tokio runtime; the
/// session-name cache makes `exists()` a lock-read, refreshed by the
/// scheduler's batched `list_sessions` call.
pub struct TmuxBackend {
    /// Known session names, refreshed by `list_sessions`.
    sessions: RwLock<HashSet<String>>,
    /// Sessions that already received one-time option setup.
    configured: RwLock<HashSet<String>>,
    capture_cache: DashMap<String, CachedCapture>,
    /// Per-name guard so a cache miss spawns at most one capture.
    capture_inflight: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    ack_signal_path: PathBuf,
}

impl TmuxBackend {
    pub fn new(ack_signal_path: PathBuf) -> Self {
        Self {
            sessions: RwLock::new(HashSet::new()),
            configured: RwLock::new(HashSet::new()),
            capture_cache: DashMap::new(),
            capture_inflight: DashMap::new(),
            ack_signal_path,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("tmux")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    DeckError::BackendUnavailable("tmux binary not found".into())
                } else {
                    DeckError::BackendUnavailable(e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DeckError::BackendUnavailable(format!(
                "tmux {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn guard_namespace(name: &str) -> Result<()> {
        if name.starts_with(SESSION_PREFIX) {
            Ok(())
        } else {
            Err(DeckError::ForeignSession(name.to_string()))
        }
    }

    async fn capture_uncached(&self, name: &str) -> Result<String> {
        self.run(&["capture-pane", "-p", "-t", name]).await
    }
}

#[async_trait]
impl MuxBackend for TmuxBackend {
    async fn create_session(
        &self,
        name: &str,
        cwd: &Path,
        cmd: &str,
        env: &HashMap<String, String>,
    ) -> Result<()> {
        Self::guard_namespace(name)?;

        let cwd_str = cwd.to_string_lossy().into_owned();
        let mut args: Vec<String> = vec![
            "new-session".into(),
            "-d".into(),
            "-s".into(),
            name.into(),
            "-c".into(),
            cwd_str,
        ];
        for (key, value) in env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.push(cmd.into());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run(&arg_refs).await?;

        self.sessions.write().insert(name.to_string());
        debug!(session = name, "tmux session created");
        Ok(())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        Self::guard_namespace(name)?;
        self.run(&["kill-session", "-t", name]).await?;
        self.sessions.write().remove(name);
        self.configured.write().remove(name);
        self.capture_cache.remove(name);
        debug!(session = name, "tmux session killed");
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        self.sessions.read().contains(name)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionDescriptor>> {
        let out = self
            .run(&[
                "list-sessions",
                "-F",
                "#{session_name}\t#{session_attached}",
            ])
            .await;

        // "no server running" means zero sessions, not a broken backend.
        let out = match out {
            Ok(out) => out,
            Err(DeckError::BackendUnavailable(msg)) if msg.contains("no server") => String::new(),
            Err(e) => return Err(e),
        };

        let mut descriptors = Vec::new();
        for line in out.lines() {
            let mut parts = line.splitn(2, '\t');
            let name = match parts.next() {
                Some(n) if !n.is_empty() => n.to_string(),
                _ => continue,
            };
            let attached = parts.next().is_some_and(|a| a != "0");
            descriptors.push(SessionDescriptor { name, attached });
        }

        let mut cache = self.sessions.write();
        cache.clear();
        cache.extend(descriptors.iter().map(|d| d.name.clone()));
        drop(cache);

        Ok(descriptors)
    }

    async fn capture_pane(&self, name: &str) -> Result<String> {
        if let Some(cached) = self.capture_cache.get(name)
            && cached.taken_at.elapsed() < Duration::from_millis(CAPTURE_TTL_MS)
        {
            return Ok(cached.content.clone());
        }

        let guard = self
            .capture_inflight
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _held = guard.lock().await;

        // Another caller may have filled the cache while we waited.
        if let Some(cached) = self.capture_cache.get(name)
            && cached.taken_at.elapsed() < Duration::from_millis(CAPTURE_TTL_MS)
        {
            return Ok(cached.content.clone());
        }

        let content = self.capture_uncached(name).await?;
        self.capture_cache.insert(
            name.to_string(),
            CachedCapture {
                taken_at: Instant::now(),
                content: content.clone(),
            },
        );
        Ok(content)
    }

    async fn send_keys(&self, name: &str, text: &str) -> Result<()> {
        self.run(&["send-keys", "-t", name, text, "Enter"]).await?;
        Ok(())
    }

    async fn set_status_left(&self, text: &str) -> Result<()> {
        self.run(&["set-option", "-g", "status-left", text]).await?;
        Ok(())
    }

    async fn clear_status_left(&self) -> Result<()> {
        self.run(&["set-option", "-g", "status-left", ""]).await?;
        Ok(())
    }

    async fn refresh_status_bar(&self) -> Result<()> {
        self.run(&["refresh-client", "-S"]).await?;
        Ok(())
    }

    async fn bind_switch_key_with_ack(
        &self,
        key: &str,
        tmux_name: &str,
        session_id: &str,
    ) -> Result<()> {
        // The bound shell writes the ack file atomically (tmp + mv) before
        // switching, so acknowledgments survive even when the UI is
        // suspended behind an attach.
        let ack = self.ack_signal_path.to_string_lossy();
        let shell = format!(
            "printf %s '{session_id}' > '{ack}.tmp' && mv '{ack}.tmp' '{ack}'; tmux switch-client -t '{tmux_name}'"
        );
        self.run(&["bind-key", key, "run-shell", &shell]).await?;
        Ok(())
    }

    async fn unbind_key(&self, key: &str) -> Result<()> {
        self.run(&["unbind-key", key]).await?;
        Ok(())
    }

    fn read_and_clear_ack_signal(&self) -> Option<String> {
        let content = std::fs::read_to_string(&self.ack_signal_path).ok()?;
        if let Err(e) = std::fs::remove_file(&self.ack_signal_path) {
            warn!(error = %e, "failed to clear ack signal file");
        }
        let id = content.trim().to_string();
        if id.is_empty() { None } else { Some(id) }
    }

    async fn attached_session(&self) -> Option<String> {
        let out = self
            .run(&["display-message", "-p", "#{session_name}"])
            .await
            .ok()?;
        let name = out.trim().to_string();
        if name.is_empty() { None } else { Some(name) }
    }

    async fn ensure_configured(&self, name: &str) -> Result<()> {
        if self.configured.read().contains(name) {
            return Ok(());
        }
        self.run(&["set-option", "-t", name, "history-limit", "10000"])
            .await?;
        self.run(&["set-option", "-t", name, "status", "off"]).await?;
        self.configured.write().insert(name.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_guard_rejects_foreign_sessions() {
        assert!(TmuxBackend::guard_namespace("agentdeck_a1b2").is_ok());
        assert!(matches!(
            TmuxBackend::guard_namespace("someone-elses-session"),
            Err(DeckError::ForeignSession(_))
        ));
    }
}
