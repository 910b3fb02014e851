use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use super::StatusHints;

static ERROR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(✖|Error:|quota exceeded|GaxiosError)").unwrap());
static WAITING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(Apply this change\?|Allow execution\?|Yes, allow|waiting for confirmation)")
        .unwrap()
});
static RUNNING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(⠋|⠙|⠹|⠸|Generating|Thinking\.\.\.)").unwrap());

/// `~/.gemini/tmp/<sha256(resolved absolute path)>/chats/`. The hash input
/// is the symlink-resolved path; unresolvable paths fall back to the raw
/// form so discovery still has a stable location.
pub(super) fn canonical_dir(home: &Path, project_path: &Path) -> PathBuf {
    let resolved = std::fs::canonicalize(project_path).unwrap_or_else(|_| project_path.to_path_buf());
    let digest = Sha256::digest(resolved.to_string_lossy().as_bytes());
    home.join(".gemini")
        .join("tmp")
        .join(hex(&digest))
        .join("chats")
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub(super) fn status_hints(pane_text: &str) -> StatusHints {
    StatusHints {
        error: ERROR_RE.is_match(pane_text),
        waiting: WAITING_RE.is_match(pane_text),
        running: RUNNING_RE.is_match(pane_text),
    }
}
