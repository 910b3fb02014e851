use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeckError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session title already exists in group: {0}")]
    DuplicateTitle(String),

    #[error("tmux backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Tool binary not found: {0}")]
    ToolNotFound(String),

    #[error("Working directory does not exist: {0}")]
    WorkdirMissing(PathBuf),

    #[error("Session cannot be forked: {0}")]
    ForkUnsupported(String),

    #[error("Refusing to touch session outside the agentdeck namespace: {0}")]
    ForeignSession(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Storage file corrupted: {path}")]
    Corrupted { path: PathBuf },

    #[error("Watch goal error: {0}")]
    Watch(String),

    #[error("Max concurrent watch goals reached ({0})")]
    MaxGoalsReached(usize),

    #[error("Unsupported message role: {0}")]
    UnsupportedRole(String),

    #[error("{provider} provider error: {message}")]
    Provider { provider: String, message: String },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl DeckError {
    /// True for failures that background workers should log and absorb
    /// rather than surface: transient capture glitches, provider hiccups.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Provider { .. } | Self::Timeout(_) | Self::BackendUnavailable(_)
        )
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeckError>;
