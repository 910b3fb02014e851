use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{DeckError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    pub scheduler: SchedulerSettings,
    pub storage: StorageSettings,
    pub observation: ObservationSettings,
    pub watch: WatchSettings,
    pub provider: ProviderSettings,
    pub notifications: NotificationSettings,
}

impl DeckConfig {
    pub async fn load(profile_dir: &Path) -> Result<Self> {
        let config_path = profile_dir.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, profile_dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = profile_dir.join("config.toml");
        let content = toml::to_string_pretty(self).map_err(|e| DeckError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.scheduler.tick_interval_secs == 0 {
            errors.push("scheduler.tick_interval_secs must be greater than 0");
        }
        if self.scheduler.batch_size == 0 {
            errors.push("scheduler.batch_size must be greater than 0");
        }
        if self.scheduler.log_workers == 0 {
            errors.push("scheduler.log_workers must be greater than 0");
        }

        if self.storage.backup_count == 0 {
            errors.push("storage.backup_count must be greater than 0");
        }

        if self.observation.max_size_bytes == 0 {
            errors.push("observation.max_size_bytes must be greater than 0");
        }
        if self.observation.retention_count == 0 {
            errors.push("observation.retention_count must be greater than 0");
        }
        if self.observation.retention_days == 0 {
            errors.push("observation.retention_days must be greater than 0");
        }

        if self.watch.default_interval_secs == 0 {
            errors.push("watch.default_interval_secs must be greater than 0");
        }
        if self.watch.max_concurrent_goals == 0 {
            errors.push("watch.max_concurrent_goals must be greater than 0");
        }

        if self.provider.summary_timeout_secs == 0 {
            errors.push("provider.summary_timeout_secs must be greater than 0");
        }
        if self.provider.watch_timeout_secs == 0 {
            errors.push("provider.watch_timeout_secs must be greater than 0");
        }

        if self.notifications.max_shown == 0 || self.notifications.max_shown > 9 {
            errors.push("notifications.max_shown must be between 1 and 9");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DeckError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Worker tick interval. The fairness bound scales with this and
    /// batch_size; 2s keeps staleness under ~200s at 200 sessions.
    pub tick_interval_secs: u64,
    /// Non-visible sessions updated per tick, round-robin.
    pub batch_size: usize,
    /// Workers draining the log-watcher channel.
    pub log_workers: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 2,
            batch_size: 2,
            log_workers: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Rolling backup generations kept for sessions.json.
    pub backup_count: usize,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { backup_count: 3 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservationSettings {
    /// Maximum stored size of a single observation. Content is hashed
    /// before truncation.
    pub max_size_bytes: usize,
    /// FIFO retention per session.
    pub retention_count: usize,
    /// Observation files older than this are purged on load.
    pub retention_days: u64,
}

impl Default for ObservationSettings {
    fn default() -> Self {
        Self {
            max_size_bytes: 51_200,
            retention_count: 100,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSettings {
    pub default_interval_secs: u64,
    pub default_timeout_secs: u64,
    pub max_concurrent_goals: usize,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            default_interval_secs: 5,
            default_timeout_secs: 3600,
            max_concurrent_goals: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Provider kind: "anthropic", "openai" or "openrouter".
    pub kind: String,
    pub model: String,
    /// Base URL override for OpenAI-compatible routers.
    pub base_url: Option<String>,
    pub summary_timeout_secs: u64,
    pub watch_timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            kind: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: None,
            summary_timeout_secs: 15,
            watch_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    /// Maximum entries shown in the status bar, each bound to a digit key.
    pub max_shown: usize,
    /// Desktop notification on watch-goal triggers.
    pub desktop: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_shown: 6,
            desktop: false,
        }
    }
}
