use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use super::StatusHints;

// Patterns mirror the CLI's observable pane idiom; tuned from captures, not
// from documentation.
static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(✗ Error|API Error|Request failed|rate limit)").unwrap());
static WAITING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(Do you want to|❯ 1\.|Allow this|Waiting for your input|\(y/n\))").unwrap()
});
static RUNNING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(esc to interrupt|✻ Thinking|✽ |Compacting)").unwrap());

/// `~/.claude/projects/<sanitized>/sessions/` where sanitization collapses
/// every run of non-alphanumeric characters into a single hyphen.
pub(super) fn canonical_dir(home: &Path, project_path: &Path) -> PathBuf {
    home.join(".claude")
        .join("projects")
        .join(sanitize(&project_path.to_string_lossy()))
        .join("sessions")
}

fn sanitize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut in_run = false;
    for c in path.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }
    out
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
    fn sanitize_collapses_runs_to_single_hyphen() {
        assert_eq!(sanitize("/home/user/my project"), "-home-user-my-project");
        assert_eq!(sanitize("/a//b"), "-a-b");
        assert_eq!(sanitize("abc123"), "abc123");
    }

    #[test]
    fn waiting_prompt_detected() {
        let pane = "Do you want to make this edit?\n❯ 1. Yes\n  2. No";
        let hints = status_hints(pane);
        assert!(hints.waiting);
        assert!(!hints.error);
    }

    #[test]
    fn running_spinner_detected() {
        let hints = status_hints("✻ Thinking… (esc to interrupt)");
        assert!(hints.running);
    }
}
