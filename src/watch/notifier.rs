use tokio::process::Command;
use tracing::debug;

/// Desktop notification sink for `notify`-action watch goals. Failures are
/// logged and swallowed; a missing notifier binary never breaks a worker.
#[derive(Clone, Default)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    pub fn new() -> Self {
        Self
    }

    pub async fn notify(&self, title: &str, body: &str) {
        let title = if title.is_empty() { "agentdeck" } else { title };

        #[cfg(target_os = "macos")]
        {
            let script = format!(
                r#"display notification "{}" with title "{}""#,
                body.replace('"', r#"\""#).replace('\n', " "),
                title.replace('"', r#"\""#)
            );
            let result = Command::new("osascript").args(["-e", &script]).output().await;
            if let Err(e) = result {
                debug!(error = %e, "failed to send desktop notification");
            }
        }

        #[cfg(target_os = "linux")]
        {
            let result = Command::new("notify-send").args([title, body]).output().await;
            if let Err(e) = result {
                debug!(error = %e, "failed to send desktop notification");
            }
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            debug!(title, body, "desktop notifications unsupported on this platform");
        }
    }
}
