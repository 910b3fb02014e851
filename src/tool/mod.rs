//! Supported agent tools and their on-disk/terminal idioms.
//!
//! The set of tools is closed; extending it is a code change. Per-tool
//! behavior (session directory rule, session-ID discovery, pane status
//! heuristics, invocation line) is dispatched by matching on [`Tool`], not
//! by subtype polymorphism.

mod claude;
mod codex;
mod gemini;
mod opencode;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DeckError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Claude,
    Gemini,
    #[serde(rename = "opencode")]
    OpenCode,
    Codex,
}

/// What the pane buffer says about the session, per the tool's own idiom.
/// Fields are checked in error > waiting > running order by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusHints {
    pub error: bool,
    pub waiting: bool,
    pub running: bool,
}

impl Tool {
    pub const ALL: [Tool; 4] = [Tool::Claude, Tool::Gemini, Tool::OpenCode, Tool::Codex];

    pub fn label(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Gemini => "Gemini",
            Self::OpenCode => "OpenCode",
            Self::Codex => "Codex",
        }
    }

    pub fn binary(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::OpenCode => "opencode",
            Self::Codex => "codex",
        }
    }

    /// Whether the tool can continue an existing conversation from its
    /// persistent session ID. Gates forking.
    pub fn supports_resume(self) -> bool {
        match self {
            Self::Claude | Self::OpenCode | Self::Codex => true,
            Self::Gemini => false,
        }
    }

    /// Directory holding the tool's session artifacts for `project_path`,
    /// using the tool's own normalization rule.
    pub fn canonical_dir_for(self, project_path: &Path) -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| DeckError::Config("cannot determine home directory".into()))?;
        Ok(match self {
            Self::Claude => claude::canonical_dir(&home, project_path),
            Self::Gemini => gemini::canonical_dir(&home, project_path),
            Self::OpenCode => opencode::canonical_dir(&home),
            Self::Codex => codex::canonical_dir(&home),
        })
    }

    /// Pane-buffer heuristics for this tool.
    pub fn status_hints(self, pane_text: &str) -> StatusHints {
        match self {
            Self::Claude => claude::status_hints(pane_text),
            Self::Gemini => gemini::status_hints(pane_text),
            Self::OpenCode => opencode::status_hints(pane_text),
            Self::Codex => codex::status_hints(pane_text),
        }
    }

    /// Shell invocation for a new (or resumed) session. `options` is the
    /// opaque per-tool blob; only the `flags` key is interpreted, the rest
    /// round-trips untouched.
    pub fn command(self, options: &serde_json::Value, resume_id: Option<&str>) -> String {
        let mut parts = vec![self.binary().to_string()];

        if let Some(id) = resume_id
            && self.supports_resume()
        {
            match self {
                Self::Claude => {
                    parts.push("--resume".into());
                    parts.push(id.into());
                }
                Self::OpenCode => {
                    parts.push("--session".into());
                    parts.push(id.into());
                }
                Self::Codex => {
                    parts.push("resume".into());
                    parts.push(id.into());
                }
                Self::Gemini => {}
            }
        }

        if let Some(flags) = options.get("flags").and_then(|f| f.as_array()) {
            parts.extend(flags.iter().filter_map(|f| f.as_str()).map(str::to_string));
        }

        parts.join(" ")
    }

    /// Environment injected at session start. Discovery prefers an
    /// env-advertised ID when it shows up among on-disk candidates.
    pub fn start_env(self, advertised_id: &str) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if self == Self::Claude {
            env.insert("CLAUDE_SESSION_ID".to_string(), advertised_id.to_string());
        }
        env
    }

    /// Best-effort path to the conversation log for analytics. `None` when
    /// the session ID has not been discovered yet.
    pub fn jsonl_path(self, project_path: &Path, tool_session_id: &str) -> Result<Option<PathBuf>> {
        if tool_session_id.is_empty() {
            return Ok(None);
        }
        let dir = self.canonical_dir_for(project_path)?;
        Ok(Some(match self {
            Self::Claude => dir.join(format!("{tool_session_id}.jsonl")),
            Self::Gemini => dir.join(format!("{tool_session_id}.json")),
            Self::OpenCode | Self::Codex => dir.join(format!("{tool_session_id}.json")),
        }))
    }

    /// Discover the tool's persistent session ID from its artifact files.
    ///
    /// Candidates are file stems in the canonical directory, newest first.
    /// Re-run on every status update: the file set changes mid-run. Missing
    /// directories are not errors, the session just lacks analytics until
    /// artifacts appear.
    pub fn discover_session_id(self, dir: &Path, env_hint: Option<&str>) -> Option<String> {
        let mut candidates: Vec<(std::time::SystemTime, String)> = std::fs::read_dir(dir)
            .ok()?
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if !path.is_file() {
                    return None;
                }
                let stem = path.file_stem()?.to_str()?.to_string();
                if stem.is_empty() || stem.starts_with('.') {
                    return None;
                }
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((modified, stem))
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        if let Some(hint) = env_hint
            && candidates.iter().any(|(_, stem)| stem == hint)
        {
            return Some(hint.to_string());
        }

        Some(candidates[0].1.clone())
    }

    /// Newest artifact mtime, used for the staleness input to status
    /// inference. `None` when no artifacts exist.
    pub fn latest_artifact_mtime(self, dir: &Path) -> Option<std::time::SystemTime> {
        std::fs::read_dir(dir)
            .ok()?
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| entry.metadata().ok()?.modified().ok())
            .max()
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Tool {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "gemini" => Ok(Self::Gemini),
            "opencode" => Ok(Self::OpenCode),
            "codex" => Ok(Self::Codex),
            other => Err(DeckError::InvalidInput(format!("unknown tool: {other}"))),
        }
    }
}
