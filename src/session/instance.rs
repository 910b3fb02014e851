use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::status::{ARTIFACT_ACTIVE_WINDOW, Status, StatusClock, StatusInputs, infer};
use crate::error::{DeckError, Result};
use crate::mux::{MuxBackend, session_name};
use crate::tool::Tool;
use crate::utils::generate_session_id;

/// How long an AI-generated summary stays fresh.
const AI_SUMMARY_TTL_SECS: i64 = 300;

/// Hook for the MCP config regeneration side effect. The proxy itself is an
/// external collaborator; session restart only invokes (or skips) it.
pub trait McpHook: Send + Sync {
    fn regenerate(&self, tool: Tool) -> Result<()>;
}

pub struct NoopMcp;

impl McpHook for NoopMcp {
    fn regenerate(&self, _tool: Tool) -> Result<()> {
        Ok(())
    }
}

/// Persisted shape of a session. Unknown fields and the per-tool options
/// blob round-trip untouched across upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub title: String,
    pub tool: Tool,
    pub project_path: PathBuf,
    #[serde(default)]
    pub group_path: String,
    #[serde(default)]
    pub tool_session_id: String,
    #[serde(default)]
    pub tool_options: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_project_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_branch: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary_generated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
struct InstanceData {
    title: String,
    group_path: String,
    tool_session_id: String,
    tool_options: serde_json::Value,
    parent_session_id: Option<String>,
    parent_project_path: Option<PathBuf>,
    worktree_path: Option<PathBuf>,
    worktree_branch: Option<String>,
    last_prompt: Option<String>,
    last_response_summary: Option<String>,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    ai_summary: Option<String>,
    ai_summary_generated_at: Option<DateTime<Utc>>,
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Inference-only state. Never persisted.
#[derive(Debug, Default)]
struct RuntimeState {
    status: Status,
    clock: StatusClock,
    waiting_since: Option<Instant>,
    /// Session ID advertised to the tool via environment at start; used as
    /// the discovery hint.
    advertised_id: Option<String>,
}

pub struct NewInstance {
    pub title: String,
    pub tool: Tool,
    pub project_path: PathBuf,
    pub group_path: String,
    pub tool_options: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ForkOptions {
    pub worktree: bool,
}

/// A tool-backed session. Identity fields are fixed at construction;
/// everything mutable sits behind its own lock so the scheduler, observer
/// and UI can share one `Arc<Instance>`.
pub struct Instance {
    pub id: String,
    pub tool: Tool,
    pub project_path: PathBuf,
    mux: Arc<dyn MuxBackend>,
    data: RwLock<InstanceData>,
    runtime: RwLock<RuntimeState>,
}

impl Instance {
    pub fn create(params: NewInstance, mux: Arc<dyn MuxBackend>) -> Result<Self> {
        if params.title.trim().is_empty() {
            return Err(DeckError::InvalidInput("session title is empty".into()));
        }
        if !params.project_path.is_absolute() {
            return Err(DeckError::InvalidInput(format!(
                "project path must be absolute: {}",
                params.project_path.display()
            )));
        }

        let now = Utc::now();
        Ok(Self {
            id: generate_session_id(),
            tool: params.tool,
            project_path: params.project_path,
            mux,
            data: RwLock::new(InstanceData {
                title: params.title.trim().to_string(),
                group_path: params.group_path,
                tool_session_id: String::new(),
                tool_options: params.tool_options,
                parent_session_id: None,
                parent_project_path: None,
                worktree_path: None,
                worktree_branch: None,
                last_prompt: None,
                last_response_summary: None,
                created_at: now,
                last_accessed_at: now,
                ai_summary: None,
                ai_summary_generated_at: None,
                extra: serde_json::Map::new(),
            }),
            runtime: RwLock::new(RuntimeState::default()),
        })
    }

    pub fn from_record(record: InstanceRecord, mux: Arc<dyn MuxBackend>) -> Self {
        // Live statuses cannot survive a process restart; re-infer from
        // scratch. Terminal ones carry over.
        let status = match record.status {
            Status::Stopped | Status::Idle => record.status,
            _ => Status::Starting,
        };
        Self {
            id: record.id,
            tool: record.tool,
            project_path: record.project_path,
            mux,
            data: RwLock::new(InstanceData {
                title: record.title,
                group_path: record.group_path,
                tool_session_id: record.tool_session_id,
                tool_options: record.tool_options,
                parent_session_id: record.parent_session_id,
                parent_project_path: record.parent_project_path,
                worktree_path: record.worktree_path,
                worktree_branch: record.worktree_branch,
                last_prompt: record.last_prompt,
                last_response_summary: record.last_response_summary,
                created_at: record.created_at,
                last_accessed_at: record.last_accessed_at,
                ai_summary: record.ai_summary,
                ai_summary_generated_at: record.ai_summary_generated_at,
                extra: record.extra,
            }),
            runtime: RwLock::new(RuntimeState {
                status,
                ..Default::default()
            }),
        }
    }

    pub fn to_record(&self) -> InstanceRecord {
        let data = self.data.read();
        InstanceRecord {
            id: self.id.clone(),
            title: data.title.clone(),
            tool: self.tool,
            project_path: self.project_path.clone(),
            group_path: data.group_path.clone(),
            tool_session_id: data.tool_session_id.clone(),
            tool_options: data.tool_options.clone(),
            parent_session_id: data.parent_session_id.clone(),
            parent_project_path: data.parent_project_path.clone(),
            worktree_path: data.worktree_path.clone(),
            worktree_branch: data.worktree_branch.clone(),
            status: self.status(),
            last_prompt: data.last_prompt.clone(),
            last_response_summary: data.last_response_summary.clone(),
            created_at: data.created_at,
            last_accessed_at: data.last_accessed_at,
            ai_summary: data.ai_summary.clone(),
            ai_summary_generated_at: data.ai_summary_generated_at,
            extra: data.extra.clone(),
        }
    }

    pub fn session_name(&self) -> String {
        session_name(&self.id)
    }

    pub fn status(&self) -> Status {
        self.runtime.read().status
    }

    pub fn title(&self) -> String {
        self.data.read().title.clone()
    }

    pub fn group_path(&self) -> String {
        self.data.read().group_path.clone()
    }

    pub fn set_group_path(&self, path: &str) {
        self.data.write().group_path = path.to_string();
    }

    pub fn set_title(&self, title: &str) {
        self.data.write().title = title.to_string();
    }

    pub fn tool_session_id(&self) -> String {
        self.data.read().tool_session_id.clone()
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.data.read().last_prompt.clone()
    }

    pub fn set_last_prompt(&self, prompt: impl Into<String>) {
        self.data.write().last_prompt = Some(prompt.into());
    }

    pub fn touch_accessed(&self) {
        self.data.write().last_accessed_at = Utc::now();
    }

    /// Instant the session entered `waiting`, for most-recent-first
    /// notification ordering.
    pub fn waiting_since(&self) -> Option<Instant> {
        self.runtime.read().waiting_since
    }

    pub fn ai_summary(&self) -> Option<String> {
        let data = self.data.read();
        let generated = data.ai_summary_generated_at?;
        if (Utc::now() - generated).num_seconds() <= AI_SUMMARY_TTL_SECS {
            data.ai_summary.clone()
        } else {
            None
        }
    }

    pub fn set_ai_summary(&self, summary: impl Into<String>) {
        let mut data = self.data.write();
        data.ai_summary = Some(summary.into());
        data.ai_summary_generated_at = Some(Utc::now());
    }

    pub fn can_fork(&self) -> bool {
        self.tool.supports_resume() && !self.data.read().tool_session_id.is_empty()
    }

    pub fn can_restart(&self) -> bool {
        self.status() != Status::Starting
    }

    /// Acquire the backend session and launch the tool. Idempotent while
    /// the session is live; repeat calls only refresh the access stamp.
    pub async fn start(&self) -> Result<()> {
        if self.status().is_live() {
            self.touch_accessed();
            return Ok(());
        }

        if !self.project_path.is_dir() {
            return Err(DeckError::WorkdirMissing(self.project_path.clone()));
        }
        if !binary_on_path(self.tool.binary()) {
            return Err(DeckError::ToolNotFound(self.tool.binary().to_string()));
        }

        let advertised = Uuid::new_v4().to_string();
        let (cmd, env) = {
            let data = self.data.read();
            let resume_id = if self.tool.supports_resume() && !data.tool_session_id.is_empty() {
                Some(data.tool_session_id.as_str())
            } else {
                None
            };
            (
                self.tool.command(&data.tool_options, resume_id),
                self.tool.start_env(&advertised),
            )
        };

        self.mux
            .create_session(&self.session_name(), &self.project_path, &cmd, &env)
            .await?;

        let mut runtime = self.runtime.write();
        runtime.status = Status::Starting;
        runtime.clock.mark_started();
        runtime.advertised_id = Some(advertised);
        drop(runtime);

        self.touch_accessed();
        debug!(session = %self.id, tool = %self.tool, "session started");
        Ok(())
    }

    /// Kill and recreate the backend session, preserving the tool session
    /// ID so resumable tools continue the same conversation.
    pub async fn restart(&self, mcp: &dyn McpHook, skip_mcp_regenerate: bool) -> Result<()> {
        let name = self.session_name();
        if self.mux.exists(&name) {
            self.mux.kill_session(&name).await?;
        }
        self.runtime.write().status = Status::Stopped;

        if !skip_mcp_regenerate {
            mcp.regenerate(self.tool)?;
        }

        self.start().await
    }

    /// Terminate the backend session. Only this session's window is
    /// touched.
    pub async fn kill(&self) -> Result<()> {
        let name = self.session_name();
        if self.mux.exists(&name) {
            self.mux.kill_session(&name).await?;
        }
        let mut runtime = self.runtime.write();
        runtime.status = Status::Stopped;
        runtime.waiting_since = None;
        Ok(())
    }

    /// User acknowledgment: the only edge out of `waiting` into `idle`.
    /// Returns whether a transition happened.
    pub fn acknowledge(&self) -> bool {
        let mut runtime = self.runtime.write();
        if runtime.status == Status::Waiting {
            runtime.status = Status::Idle;
            runtime.waiting_since = None;
            true
        } else {
            false
        }
    }

    /// Fork a new session resuming this one's conversation.
    pub fn fork(&self, new_title: &str, new_group_path: &str, opts: ForkOptions) -> Result<Instance> {
        if !self.can_fork() {
            return Err(DeckError::ForkUnsupported(format!(
                "{} has no resumable conversation",
                self.title()
            )));
        }

        let data = self.data.read();
        let forked = Instance::create(
            NewInstance {
                title: new_title.to_string(),
                tool: self.tool,
                project_path: self.project_path.clone(),
                group_path: new_group_path.to_string(),
                tool_options: data.tool_options.clone(),
            },
            Arc::clone(&self.mux),
        )?;

        {
            let mut forked_data = forked.data.write();
            forked_data.tool_session_id = data.tool_session_id.clone();
            forked_data.parent_session_id = Some(self.id.clone());
            forked_data.parent_project_path = Some(self.project_path.clone());
            if opts.worktree {
                forked_data.worktree_path = data.worktree_path.clone();
                forked_data.worktree_branch = data.worktree_branch.clone();
            }
        }

        Ok(forked)
    }

    /// Recompute status from backend existence, pane heuristics and
    /// artifact staleness. Transient capture failures keep the previous
    /// status; only a broken environment surfaces as an error.
    pub async fn update_status(&self) -> Result<()> {
        // The artifact file set changes mid-run; re-discover every tick.
        self.rediscover_tool_session_id()?;

        let name = self.session_name();
        let backend_exists = self.mux.exists(&name);

        let pane_text = if backend_exists {
            match self.mux.capture_pane(&name).await {
                Ok(text) => Some(text),
                Err(e) => {
                    debug!(session = %self.id, error = %e, "pane capture failed, keeping status");
                    None
                }
            }
        } else {
            None
        };

        let artifact_stale = self.artifact_stale()?;
        let hints = pane_text
            .as_deref()
            .map(|text| self.tool.status_hints(text))
            .unwrap_or_default();

        let mut runtime = self.runtime.write();
        let previous = runtime.status;
        let next = infer(
            previous,
            hints,
            StatusInputs {
                backend_exists,
                pane_text: pane_text.as_deref(),
                artifact_stale,
            },
            &mut runtime.clock,
            Instant::now(),
        );
        if next != previous {
            if next == Status::Waiting {
                runtime.waiting_since = Some(Instant::now());
            } else if previous == Status::Waiting {
                runtime.waiting_since = None;
            }
            runtime.status = next;
            debug!(session = %self.id, %previous, status = %next, "status changed");
        }
        Ok(())
    }

    /// Pane snapshot for the UI. The mux adapter holds the 500 ms TTL
    /// cache and single-flights concurrent misses per session, so this is
    /// safe to call from render-adjacent paths.
    pub async fn preview_full(&self) -> Result<String> {
        self.mux.capture_pane(&self.session_name()).await
    }

    /// Best-effort path to the tool's conversation log.
    pub fn get_jsonl_path(&self) -> Result<Option<PathBuf>> {
        self.tool
            .jsonl_path(&self.project_path, &self.tool_session_id())
    }

    fn rediscover_tool_session_id(&self) -> Result<()> {
        let dir = self.tool.canonical_dir_for(&self.project_path)?;
        let hint = self.runtime.read().advertised_id.clone();
        if let Some(found) = self.tool.discover_session_id(&dir, hint.as_deref()) {
            let mut data = self.data.write();
            if data.tool_session_id != found {
                debug!(session = %self.id, tool_session_id = %found, "tool session discovered");
                data.tool_session_id = found;
            }
        }
        Ok(())
    }

    fn artifact_stale(&self) -> Result<bool> {
        let dir = self.tool.canonical_dir_for(&self.project_path)?;
        let fresh = self
            .tool
            .latest_artifact_mtime(&dir)
            .and_then(|mtime| mtime.elapsed().ok())
            .is_some_and(|age| age < ARTIFACT_ACTIVE_WINDOW);
        Ok(!fresh)
    }

    /// Direct status override for recovery paths (load, backend vanished).
    pub(crate) fn force_status(&self, status: Status) {
        let mut runtime = self.runtime.write();
        if status == Status::Waiting && runtime.status != Status::Waiting {
            runtime.waiting_since = Some(Instant::now());
        }
        if status != Status::Waiting {
            runtime.waiting_since = None;
        }
        runtime.status = status;
    }
}

fn binary_on_path(binary: &str) -> bool {
    let Some(paths) = env::var_os("PATH") else {
        return false;
    };
    env::split_paths(&paths).any(|dir| dir.join(binary).is_file())
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("tool", &self.tool)
            .field("status", &self.status())
            .finish()
    }
}
