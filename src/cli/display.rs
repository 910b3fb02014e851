use crate::session::Status;

/// Plain-text output helpers for the CLI surface. The interactive UI is a
/// separate consumer of core state; nothing here is load-bearing for it.
#[derive(Default)]
pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_error(&self, message: &str) {
        eprintln!("error: {message}");
    }

    pub fn status_icon(&self, status: Status) -> &'static str {
        match status {
            Status::Starting => "…",
            Status::Running => "●",
            Status::Waiting => "◐",
            Status::Idle => "○",
            Status::Error => "✗",
            Status::Stopped => "■",
        }
    }

    pub fn session_line(&self, status: Status, title: &str, tool: &str, group: &str) -> String {
        let group = if group.is_empty() { "-" } else { group };
        format!(
            "{} {:<24} {:<10} {:<16} {}",
            self.status_icon(status),
            title,
            tool,
            group,
            status
        )
    }
}
