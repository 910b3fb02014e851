//! Per-session entities and the structures the UI renders from.
//!
//! - `Instance`: one tool-backed session with lifecycle and status inference
//! - `GroupTree`: hierarchical organization, flattened for display order
//! - `SessionRegistry`: the owning collection, with a bounded undo stack
//! - `NotificationManager`/`NotificationCoordinator`: the derived
//!   attention set and its tmux key-binding/status-bar reconciliation
//! - `ReloadState`: cursor/expansion preservation across external reloads

mod group;
mod instance;
mod notifications;
mod registry;
mod reload;
mod status;

pub use group::{DEFAULT_GROUP, FlatItem, FlatItemKind, Group, GroupTree};
pub use instance::{ForkOptions, Instance, InstanceRecord, McpHook, NewInstance, NoopMcp};
pub use notifications::{NotificationCoordinator, NotificationEntry, NotificationManager};
pub use registry::SessionRegistry;
pub use reload::ReloadState;
pub use status::{
    ARTIFACT_ACTIVE_WINDOW, GRACE_AFTER_ERROR, GRACE_AFTER_START, Status, StatusClock,
    StatusInputs, infer,
};
