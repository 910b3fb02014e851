//! Unified chat contract over the supported LLM backends.
//!
//! Providers expose `chat` (single response) and `chat_stream` (chunk
//! channel). Panics never cross the provider boundary: every call is
//! wrapped and converted into a provider-tagged error. Retries are the
//! caller's job via [`llm_retry`].

mod anthropic;
mod openai;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::ProviderSettings;
use crate::error::{DeckError, Result};
use crate::utils::CancelFlag;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

pub const ROLE_USER: &str = "user";
pub const ROLE_ASSISTANT: &str = "assistant";

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// One conversation turn. The role set is closed; anything beyond
/// user/assistant is rejected by the providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_USER.to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ROLE_ASSISTANT.to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Single-response chat. Callers bound the call with a timeout and
    /// wrap it in [`llm_retry`] when retries are wanted.
    async fn chat(&self, messages: &[Message]) -> Result<String>;

    /// Streaming chat. The channel closes on completion; cancelling the
    /// flag closes it promptly mid-stream.
    async fn chat_stream(
        &self,
        messages: &[Message],
        cancel: CancelFlag,
    ) -> Result<mpsc::Receiver<String>>;
}

/// Construct a provider from config. The API key comes from the caller
/// (environment or keychain), never from persisted state.
pub fn new_provider(settings: &ProviderSettings, api_key: &str) -> Result<Arc<dyn LlmProvider>> {
    match settings.kind.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(api_key, &settings.model)?)),
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            api_key,
            &settings.model,
            settings.base_url.as_deref(),
        )?)),
        "openrouter" => Ok(Arc::new(OpenAiProvider::new(
            api_key,
            &settings.model,
            Some(settings.base_url.as_deref().unwrap_or(OPENROUTER_BASE_URL)),
        )?)),
        other => Err(DeckError::InvalidInput(format!(
            "unsupported provider kind: {other}"
        ))),
    }
}

fn validate_roles(messages: &[Message]) -> Result<()> {
    for message in messages {
        if message.role != ROLE_USER && message.role != ROLE_ASSISTANT {
            return Err(DeckError::UnsupportedRole(message.role.clone()));
        }
    }
    Ok(())
}

/// Render a caught panic payload for the provider-tagged error.
fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Wrap a provider future so a panic becomes a `"panic in <Provider>
/// provider: <x>"` error instead of unwinding into the caller.
async fn isolate_panics<T>(
    provider: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    use futures::FutureExt;
    match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(DeckError::provider(
            provider,
            format!("panic in {provider} provider: {}", panic_message(payload)),
        )),
    }
}

const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Retry an operation with 1 s / 2 s / 4 s backoff: four attempts total.
/// Cancellation bypasses the remaining sleeps and surfaces `Cancelled`
/// rather than silently dropping attempts.
pub async fn llm_retry<T, F, Fut>(cancel: &CancelFlag, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for attempt in 0..=RETRY_DELAYS.len() {
        if attempt > 0 {
            let delay = RETRY_DELAYS[attempt - 1];
            debug!(attempt, total = RETRY_DELAYS.len(), ?delay, "retrying");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(DeckError::Cancelled),
            }
        }
        if cancel.is_cancelled() {
            return Err(DeckError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(DeckError::Cancelled) => return Err(DeckError::Cancelled),
            Err(e) => {
                warn!(attempt = attempt + 1, error = %e, "llm attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(DeckError::Other(format!(
        "failed after {} attempts: {}",
        RETRY_DELAYS.len() + 1,
        last_err.expect("at least one attempt ran")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_failures_with_expected_backoff() {
        let cancel = CancelFlag::new();
        let calls = AtomicUsize::new(0);
        let started = Instant::now();

        let result = llm_retry(&cancel, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err(DeckError::provider("Test", "boom"))
                } else {
                    Ok("done".to_string())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1 + 2 + 4 seconds of virtual sleep.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
        assert!(elapsed <= Duration::from_secs(8), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhausts_after_four_attempts() {
        let cancel = CancelFlag::new();
        let calls = AtomicUsize::new(0);

        let result: Result<String> = llm_retry(&cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DeckError::provider("Test", "always down")) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("failed after 4 attempts"), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_bypasses_remaining_sleeps() {
        let cancel = CancelFlag::new();
        cancel.cancel();

        let calls = AtomicUsize::new(0);
        let result: Result<String> = llm_retry(&cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DeckError::provider("Test", "down")) }
        })
        .await;

        assert!(matches!(result, Err(DeckError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panics_convert_to_provider_errors() {
        let result: Result<String> = isolate_panics("Anthropic", async {
            panic!("exploded mid-request");
        })
        .await;

        let err = result.unwrap_err().to_string();
        assert!(err.contains("panic in Anthropic provider: exploded mid-request"), "{err}");
    }

    #[test]
    fn role_validation_rejects_system() {
        let messages = vec![Message {
            role: "system".into(),
            content: "be brief".into(),
        }];
        assert!(matches!(
            validate_roles(&messages),
            Err(DeckError::UnsupportedRole(_))
        ));
        assert!(validate_roles(&[Message::user("hi"), Message::assistant("yo")]).is_ok());
    }
}
