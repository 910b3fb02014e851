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

const BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const PROVIDER: &str = "Anthropic";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(DeckError::InvalidInput("anthropic API key is required".into()));
        }
        if model.is_empty() {
            return Err(DeckError::InvalidInput("model name is required".into()));
        }
        Ok(Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn request_body(&self, messages: &[Message], stream: bool) -> serde_json::Value {
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "stream": stream,
            "messages": messages
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content}))
                .collect::<Vec<_>>(),
        })
    }

    async fn send(&self, messages: &[Message], stream: bool) -> Result<reqwest::Response> {
        validate_roles(messages)?;
        let response = self
            .client
            .post(BASE_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(messages, stream))
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

        let text = parsed
            .content
            .iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text.clone())
            .ok_or_else(|| DeckError::provider(PROVIDER, "empty response"))?;
        Ok(text)
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
                        debug!("anthropic stream cancelled");
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
                    let Ok(event) = serde_json::from_str::<StreamEvent>(data) else {
                        continue;
                    };
                    if event.kind == "message_stop" {
                        return;
                    }
                    if let Some(delta) = event.delta
                        && let Some(text) = delta.text
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
impl LlmProvider for AnthropicProvider {
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
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<StreamDelta>,
}

#[derive(Deserialize)]
struct StreamDelta {
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructor_requires_key_and_model() {
        assert!(AnthropicProvider::new("", "model").is_err());
        assert!(AnthropicProvider::new("sk-test", "").is_err());
        assert!(AnthropicProvider::new("sk-test", "claude-sonnet-4-20250514").is_ok());
    }

    #[tokio::test]
    async fn unsupported_role_rejected_before_any_request() {
        let provider = AnthropicProvider::new("sk-test", "m").unwrap();
        let messages = vec![Message {
            role: "system".into(),
            content: "x".into(),
        }];
        let err = provider.chat(&messages).await.unwrap_err();
        assert!(matches!(err, DeckError::UnsupportedRole(_)));
    }

    #[test]
    fn request_body_shape() {
        let provider = AnthropicProvider::new("sk-test", "m").unwrap();
        let body = provider.request_body(&[Message::user("hello")], false);
        assert_eq!(body["model"], "m");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hello");
        assert_eq!(body["stream"], false);
    }
}
