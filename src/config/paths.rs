use std::env;
use std::path::PathBuf;

use tokio::fs;

use crate::error::{DeckError, Result};

pub const DEFAULT_PROFILE: &str = "default";

/// Reserved profile for test isolation. Anything written under it is
/// disposable.
pub const TEST_PROFILE: &str = "_test";

/// Resolve the profile name: explicit argument wins, then the PROFILE
/// environment variable, then the default.
pub fn effective_profile(explicit: Option<&str>) -> String {
    if let Some(name) = explicit
        && !name.trim().is_empty()
    {
        return name.trim().to_string();
    }
    match env::var("PROFILE") {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => DEFAULT_PROFILE.to_string(),
    }
}

/// Profile-isolated on-disk layout. All persisted state lives under
/// `<root>/profiles/<profile>/`.
#[derive(Debug, Clone)]
pub struct ProfilePaths {
    pub root: PathBuf,
    pub profile: String,
    pub profile_dir: PathBuf,
    pub observations_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub mcp_dir: PathBuf,
}

impl ProfilePaths {
    /// Layout under an explicit root. Tests pass a tempdir here.
    pub fn under_root(root: impl Into<PathBuf>, profile: &str) -> Self {
        let root = root.into();
        let profile_dir = root.join("profiles").join(profile);
        Self {
            observations_dir: profile_dir.join("observations"),
            backups_dir: profile_dir.join("backups"),
            mcp_dir: profile_dir.join("mcp"),
            profile: profile.to_string(),
            profile_dir,
            root,
        }
    }

    /// Layout under the user's agentdeck root. `AGENTDECK_HOME` overrides
    /// the default `~/.agentdeck`.
    pub fn resolve(profile: &str) -> Result<Self> {
        let root = match env::var("AGENTDECK_HOME") {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
            _ => dirs::home_dir()
                .ok_or_else(|| DeckError::Config("cannot determine home directory".into()))?
                .join(".agentdeck"),
        };
        Ok(Self::under_root(root, profile))
    }

    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.profile_dir,
            &self.observations_dir,
            &self.backups_dir,
            &self.mcp_dir,
        ] {
            fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    pub fn sessions_file(&self) -> PathBuf {
        self.profile_dir.join("sessions.json")
    }

    pub fn watch_goals_file(&self) -> PathBuf {
        self.profile_dir.join("watch_goals.json")
    }

    pub fn observations_file(&self, session_id: &str) -> PathBuf {
        self.observations_dir.join(format!("{session_id}.json"))
    }

    pub fn backup_file(&self, file_name: &str, generation: usize) -> PathBuf {
        self.backups_dir.join(format!("{file_name}.{generation}"))
    }

    /// Cross-process handshake file for hot-key acknowledgments.
    pub fn ack_signal_file(&self) -> PathBuf {
        self.profile_dir.join("notify_ack")
    }
}

/// True when verbose logging was requested via the environment.
pub fn debug_enabled() -> bool {
    env::var("DEBUG").is_ok_and(|v| !v.is_empty() && v != "0")
}
