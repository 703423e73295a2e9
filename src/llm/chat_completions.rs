//! OpenAI Chat Completions API driver.
//!
//! This module implements [`ChatModel`] for OpenAI-compatible providers
//! (`/v1/chat/completions`). Model turns are sent with the `assistant` role.

use anyhow::Context;
use futures::StreamExt;
use serde_json::{Value, json};

use crate::normalized::NormalizedEvent;

use super::sse::DataLines;
use super::{ChatModel, EventStream, LlmSettings, Role, Turn, ensure_success};

/// Driver for the OpenAI Chat Completions API.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver sharing the given HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client, settings: LlmSettings) -> Self {
        Self { http, settings }
    }

    fn post(&self, history: &[Turn], stream: bool) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let body = request_body(&self.settings.model, history, stream);

        let mut rb = self.http.post(&url).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }
        rb
    }
}

#[async_trait::async_trait]
impl ChatModel for ChatCompletionsDriver {
    async fn complete(&self, history: &[Turn]) -> anyhow::Result<String> {
        let resp = self
            .post(history, false)
            .send()
            .await
            .context("chat completions request failed")?;
        let body: Value = ensure_success(resp)
            .await?
            .json()
            .await
            .context("chat completions returned malformed JSON")?;

        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .context("model returned no content")
    }

    async fn stream(&self, history: &[Turn]) -> anyhow::Result<EventStream> {
        let resp = self
            .post(history, true)
            .send()
            .await
            .context("chat completions request failed")?;
        let byte_stream = ensure_success(resp).await?.bytes_stream();

        let out = async_stream::try_stream! {
            let mut lines = DataLines::default();

            futures::pin_mut!(byte_stream);
            'read: while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.context("chat completions stream interrupted")?;

                for data in lines.push(&chunk) {
                    if data == "[DONE]" {
                        break 'read;
                    }

                    let v: Value = serde_json::from_str(&data)
                        .context("chat completions sent a malformed chunk")?;
                    if let Some(message) = v.pointer("/error/message").and_then(Value::as_str) {
                        Err::<(), _>(anyhow::anyhow!("chat completions stream error: {message}"))?;
                    }

                    // Assistant text delta
                    if let Some(s) = v.pointer("/choices/0/delta/content").and_then(Value::as_str) {
                        if !s.is_empty() {
                            yield NormalizedEvent::MessageDelta { text: s.to_string() };
                        }
                    }
                }
            }

            yield NormalizedEvent::Done;
        };

        Ok(Box::pin(out))
    }
}

/// Build the request body, mapping model turns to the `assistant` role.
fn request_body(model: &str, history: &[Turn], stream: bool) -> Value {
    let messages: Vec<Value> = history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Model => "assistant",
            };
            json!({ "role": role, "content": turn.text })
        })
        .collect();

    json!({
        "model": model,
        "stream": stream,
        "messages": messages,
    })
}
