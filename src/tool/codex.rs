use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::StatusHints;

static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(stream error|ERROR|unexpected status)").unwrap());
static WAITING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Allow command\?|Approve\?|\[a\]pprove)").unwrap());
static RUNNING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(thinking|running command|▌)").unwrap());

/// Codex mirrors OpenCode's flat layout.
pub(super) fn canonical_dir(home: &Path) -> PathBuf {
    home.join(".codex").join("sessions")
}

pub(super) fn status_hints(pane_text: &str) -> StatusHints {
    StatusHints {
        error: ERROR_RE.is_match(pane_text),
        waiting: WAITING_RE.is_match(pane_text),
        running: RUNNING_RE.is_match(pane_text),
    }
}
