use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::tool::StatusHints;

/// Grace period after `start()` during which every input reads as running.
/// Covers the window where the pane still shows the previous shell.
pub const GRACE_AFTER_START: Duration = Duration::from_secs(2);

/// Grace period after an error sighting during which backend-existence
/// checks are skipped. Error banners often outlive the process briefly.
pub const GRACE_AFTER_ERROR: Duration = Duration::from_secs(5);

/// An artifact touched within this window counts as evidence of activity.
pub const ARTIFACT_ACTIVE_WINDOW: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Starting,
    Running,
    Waiting,
    Idle,
    Error,
    Stopped,
}

impl Status {
    /// Idle sessions need user interaction to change state; the scheduler
    /// skips them in round-robin and relies on the log-watcher fast path.
    pub fn skip_in_round_robin(self) -> bool {
        self == Self::Idle
    }

    pub fn needs_attention(self) -> bool {
        self == Self::Waiting
    }

    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Waiting)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Idle => "idle",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Monotonic stamps driving the grace periods. Never persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusClock {
    pub last_start: Option<Instant>,
    pub last_error_check: Option<Instant>,
}

impl StatusClock {
    pub fn mark_started(&mut self) {
        self.last_start = Some(Instant::now());
    }

    fn within(stamp: Option<Instant>, window: Duration, now: Instant) -> bool {
        stamp.is_some_and(|t| now.saturating_duration_since(t) < window)
    }

    pub fn in_start_grace(&self, now: Instant) -> bool {
        Self::within(self.last_start, GRACE_AFTER_START, now)
    }

    pub fn in_error_grace(&self, now: Instant) -> bool {
        Self::within(self.last_error_check, GRACE_AFTER_ERROR, now)
    }
}

/// Per-tick inputs to status inference.
#[derive(Debug, Clone, Copy)]
pub struct StatusInputs<'a> {
    pub backend_exists: bool,
    /// `None` on a transient capture failure; the previous status holds.
    pub pane_text: Option<&'a str>,
    pub artifact_stale: bool,
}

/// Recompute status from the inputs, first match wins. Mutates the clock
/// when an error is sighted. `waiting` only leaves via an acknowledgment,
/// so an `idle` verdict never demotes a waiting session.
pub fn infer(
    current: Status,
    hints: StatusHints,
    inputs: StatusInputs<'_>,
    clock: &mut StatusClock,
    now: Instant,
) -> Status {
    if clock.in_start_grace(now) {
        return Status::Running;
    }

    if !inputs.backend_exists && !clock.in_error_grace(now) {
        return Status::Stopped;
    }

    // Capture glitch: no pane text to judge, keep what we had.
    if inputs.pane_text.is_none() {
        return current;
    }

    if hints.error {
        clock.last_error_check = Some(now);
        return Status::Error;
    }
    if hints.waiting {
        return Status::Waiting;
    }
    if hints.running || !inputs.artifact_stale {
        return Status::Running;
    }

    if current == Status::Waiting {
        return Status::Waiting;
    }
    Status::Idle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(backend: bool, pane: Option<&str>, stale: bool) -> StatusInputs<'_> {
        StatusInputs {
            backend_exists: backend,
            pane_text: pane,
            artifact_stale: stale,
        }
    }

    const QUIET: StatusHints = StatusHints {
        error: false,
        waiting: false,
        running: false,
    };

    #[test]
    fn start_grace_reports_running_regardless_of_inputs() {
        let mut clock = StatusClock::default();
        clock.mark_started();
        let status = infer(
            Status::Starting,
            QUIET,
            inputs(false, None, true),
            &mut clock,
            Instant::now(),
        );
        assert_eq!(status, Status::Running);
    }

    #[test]
    fn vanished_backend_is_stopped_outside_grace() {
        let mut clock = StatusClock::default();
        let status = infer(
            Status::Running,
            QUIET,
            inputs(false, Some(""), true),
            &mut clock,
            Instant::now(),
        );
        assert_eq!(status, Status::Stopped);
    }

    #[test]
    fn error_grace_skips_backend_check() {
        let mut clock = StatusClock {
            last_error_check: Some(Instant::now()),
            ..Default::default()
        };
        let status = infer(
            Status::Error,
            QUIET,
            inputs(false, None, true),
            &mut clock,
            Instant::now(),
        );
        // Backend gone but inside error grace and no pane: previous holds.
        assert_eq!(status, Status::Error);
    }

    #[test]
    fn error_pattern_wins_and_stamps_clock() {
        let mut clock = StatusClock::default();
        let hints = StatusHints {
            error: true,
            waiting: true,
            running: true,
        };
        let status = infer(
            Status::Running,
            hints,
            inputs(true, Some("boom"), true),
            &mut clock,
            Instant::now(),
        );
        assert_eq!(status, Status::Error);
        assert!(clock.last_error_check.is_some());
    }

    #[test]
    fn fresh_artifact_means_running() {
        let mut clock = StatusClock::default();
        let status = infer(
            Status::Idle,
            QUIET,
            inputs(true, Some("$ "), false),
            &mut clock,
            Instant::now(),
        );
        assert_eq!(status, Status::Running);
    }

    #[test]
    fn quiet_pane_is_idle() {
        let mut clock = StatusClock::default();
        let status = infer(
            Status::Running,
            QUIET,
            inputs(true, Some("$ "), true),
            &mut clock,
            Instant::now(),
        );
        assert_eq!(status, Status::Idle);
    }

    #[test]
    fn waiting_never_demotes_to_idle_without_ack() {
        let mut clock = StatusClock::default();
        let status = infer(
            Status::Waiting,
            QUIET,
            inputs(true, Some("$ "), true),
            &mut clock,
            Instant::now(),
        );
        assert_eq!(status, Status::Waiting);
    }

    #[test]
    fn capture_glitch_preserves_previous() {
        let mut clock = StatusClock::default();
        let status = infer(
            Status::Waiting,
            QUIET,
            inputs(true, None, true),
            &mut clock,
            Instant::now(),
        );
        assert_eq!(status, Status::Waiting);
    }
}
