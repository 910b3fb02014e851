use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::StatusHints;

static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(ERROR|panic:|connection refused)").unwrap());
static WAITING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Continue\? \[y/n\]|Approve this|press enter to continue)").unwrap());
static RUNNING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(Working|▊|tokens/s|generating)").unwrap());

/// OpenCode keeps a flat session store, not keyed by project.
pub(super) fn canonical_dir(home: &Path) -> PathBuf {
    home.join(".opencode").join("sessions")
}

pub(super) fn status_hints(pane_text: &str) -> StatusHints {
    StatusHints {
        error: ERROR_RE.is_match(pane_text),
        waiting: WAITING_RE.is_match(pane_text),
        running: RUNNING_RE.is_match(pane_text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_session_dir() {
        assert_eq!(
            canonical_dir(Path::new("/home/u")),
            PathBuf::from("/home/u/.opencode/sessions")
        );
    }

    #[test]
    fn error_banner_detected() {
        assert!(status_hints("ERROR: provider unavailable").error);
    }
}
