use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use super::{LlmProvider, Message, isolate_panics, validate_roles};
use crate::error::{DeckError, Result};
use crate::utils::CancelFlag;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const PROVIDER: &str = "OpenAI";

/// OpenAI chat-completions backend. A base-URL override makes it speak to
/// any OpenAI-compatible router.
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(DeckError::InvalidInput("openai API key is required".into()));
        }
        if model.is_empty() {
            return Err(DeckError::InvalidInput("model name is required".into()));
        }
        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        })
    }

    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        validate_roles(messages)?;
        let body = json!({
            "model": self.model,
            "stream": stream,
            "messages": messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content}))
                .collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeckError::provider(PROVIDER, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DeckError::provider(
                PROVIDER,
                format!("API returned {status}: {body}"),
            ));
        }
        Ok(response)
    }

    async fn chat_inner(&self, messages: &[Message]) -> Result<String> {
        let response = self.send(messages, false).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| DeckError::provider(PROVIDER, format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty())
            .ok_or_else(|| DeckError::provider(PROVIDER, "empty response"))
    }

    async fn chat_stream_inner(
        &self,
        messages: &[Message],
        cancel: CancelFlag,
    ) -> Result<mpsc::Receiver<String>> {
        let response = self.send(messages, true).await?;
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();

            loop {
                let chunk = tokio::select! {
                    chunk = stream.next() => chunk,
                    _ = cancel.cancelled() => {
                        debug!("openai stream cancelled");
                        break;
                    }
                };
                let Some(chunk) = chunk else { break };
                let Ok(bytes) = chunk else { break };
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    if data == "[DONE]" {
                        return;
                    }
                    let Ok(event) = serde_json::from_str::<StreamChunk>(data) else {
                        continue;
                    };
                    let text = event
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta)
                        .and_then(|d| d.content);
                    if let Some(text) = text
                        && tx.send(text).await.is_err()
                    {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn chat(&self, messages: &[Message]) -> Result<String> {
        isolate_panics(PROVIDER, self.chat_inner(messages)).await
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        cancel: CancelFlag,
    ) -> Result<mpsc::Receiver<String>> {
        isolate_panics(PROVIDER, self.chat_stream_inner(messages, cancel)).await
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_override_trims_trailing_slash() {
        let provider =
            OpenAiProvider::new("sk-test", "gpt-4o", Some("https://openrouter.ai/api/v1/")).unwrap();
        assert_eq!(provider.base_url, "https://openrouter.ai/api/v1");
    }

    #[tokio::test]
    async fn unsupported_role_rejected_before_any_request() {
        let provider = OpenAiProvider::new("sk-test", "gpt-4o", None).unwrap();
        let err = provider
            .chat(&[Message {
                role: "tool".into(),
                content: "x".into(),
            }])
            .await
            .unwrap_err();
        assert!(matches!(err, DeckError::UnsupportedRole(_)));
    }
}
