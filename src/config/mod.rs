//! Configuration types and profile path resolution.
//!
//! - `DeckConfig`: top-level configuration with validation
//! - `ProfilePaths`: profile-isolated on-disk layout under the agentdeck root

mod paths;
mod settings;

pub use paths::{DEFAULT_PROFILE, ProfilePaths, TEST_PROFILE, debug_enabled, effective_profile};
pub use settings::{
    DeckConfig, NotificationSettings, ObservationSettings, ProviderSettings, SchedulerSettings,
    StorageSettings, WatchSettings,
};
