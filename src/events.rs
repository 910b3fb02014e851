//! Event channel between the core and whatever renders it.
//!
//! Every asynchronous command produces exactly one event; background
//! workers publish state-change events on the same bus. The channel is
//! bounded and lossy for slow subscribers, which is fine: events announce
//! that state changed, the state itself lives in the core.

use tokio::sync::broadcast;
use tracing::debug;

use crate::session::Status;
use crate::watch::WatchAction;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// sessions.json changed under us; the UI should reload with state
    /// preservation.
    StorageChanged,
    StatusChanged {
        session_id: String,
        status: Status,
    },
    SessionStarted {
        session_id: String,
    },
    SessionStopped {
        session_id: String,
    },
    SessionRemoved {
        session_id: String,
    },
    PreviewFetched {
        session_id: String,
        content: String,
    },
    WatchTriggered {
        goal_id: String,
        action: WatchAction,
        message: String,
    },
    CommandFailed {
        context: String,
        error: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Best-effort publish; an event with no subscribers is not an error.
    pub fn publish(&self, event: CoreEvent) {
        if self.sender.send(event).is_err() {
            debug!("core event dropped: no subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
