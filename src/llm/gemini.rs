//! Google Generative Language API driver.
//!
//! Implements [`ChatModel`] on top of `models/{model}:generateContent` and its
//! SSE variant `:streamGenerateContent?alt=sse`. Turns map one-to-one onto
//! `contents` entries with `user` / `model` roles, so the persona prompt is
//! sent as an ordinary user turn.

use anyhow::Context;
use futures::StreamExt;
use serde_json::{Value, json};

use crate::normalized::NormalizedEvent;

use super::sse::DataLines;
use super::{ChatModel, EventStream, LlmSettings, Turn, ensure_success};

/// Driver for the Gemini `generateContent` API.
#[derive(Clone)]
pub struct GeminiDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for GeminiDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiDriver")
            .field("base_url", &self.settings.base_url)
            .field("model", &self.settings.model)
            .finish_non_exhaustive()
    }
}

impl GeminiDriver {
    /// Create a driver sharing the given HTTP client.
    #[must_use]
    pub fn new(http: reqwest::Client, settings: LlmSettings) -> Self {
        Self { http, settings }
    }

    fn url(&self, method: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{method}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.model
        )
    }

    fn post(&self, url: &str, history: &[Turn]) -> reqwest::RequestBuilder {
        let mut rb = self.http.post(url).json(&request_body(history));
        if let Some(key) = &self.settings.api_key {
            rb = rb.header("x-goog-api-key", key);
        }
        rb
    }
}

#[async_trait::async_trait]
impl ChatModel for GeminiDriver {
    async fn complete(&self, history: &[Turn]) -> anyhow::Result<String> {
        let url = self.url("generateContent");
        tracing::debug!(url = %url, turns = history.len(), "Sending Gemini request");

        let resp = self
            .post(&url, history)
            .send()
            .await
            .context("gemini request failed")?;
        let body: Value = ensure_success(resp)
            .await?
            .json()
            .await
            .context("gemini returned malformed JSON")?;

        reply_text(&body)
    }

    async fn stream(&self, history: &[Turn]) -> anyhow::Result<EventStream> {
        let url = format!("{}?alt=sse", self.url("streamGenerateContent"));
        tracing::debug!(url = %url, turns = history.len(), "Opening Gemini stream");

        let resp = self
            .post(&url, history)
            .send()
            .await
            .context("gemini request failed")?;
        let byte_stream = ensure_success(resp).await?.bytes_stream();

        let out = async_stream::try_stream! {
            let mut lines = DataLines::default();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk.context("gemini stream interrupted")?;
                for data in lines.push(&chunk) {
                    if let Some(text) = chunk_text(&data)? {
                        yield NormalizedEvent::MessageDelta { text };
                    }
                }
            }
            if let Some(data) = lines.finish() {
                if let Some(text) = chunk_text(&data)? {
                    yield NormalizedEvent::MessageDelta { text };
                }
            }

            yield NormalizedEvent::Done;
        };

        Ok(Box::pin(out))
    }
}

/// Build the `generateContent` request body.
fn request_body(history: &[Turn]) -> Value {
    let contents: Vec<Value> = history
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role.as_str(),
                "parts": [{ "text": turn.text }],
            })
        })
        .collect();

    json!({ "contents": contents })
}

/// Concatenate the text parts of the first candidate.
///
/// Returns `None` when the candidate carries no text (e.g. the final chunk of
/// a stream, which only holds `finishReason` and usage metadata).
fn candidate_text(body: &Value) -> Option<String> {
    let parts = body.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.is_empty()).then_some(text)
}

/// Finish reasons that end a reply normally. Anything else (`SAFETY`,
/// `RECITATION`, ...) means the text was cut off or withheld.
const NORMAL_FINISH: &[&str] = &["STOP", "MAX_TOKENS", "FINISH_REASON_UNSPECIFIED"];

fn check_prompt(body: &Value) -> anyhow::Result<()> {
    if let Some(reason) = body
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        anyhow::bail!("prompt was blocked: {reason}");
    }
    Ok(())
}

fn check_finish(body: &Value) -> anyhow::Result<()> {
    match body
        .pointer("/candidates/0/finishReason")
        .and_then(Value::as_str)
    {
        Some(reason) if !NORMAL_FINISH.contains(&reason) => {
            anyhow::bail!("model stopped early (finish reason: {reason})")
        }
        _ => Ok(()),
    }
}

/// Extract the reply from a complete `generateContent` response.
fn reply_text(body: &Value) -> anyhow::Result<String> {
    check_prompt(body)?;
    check_finish(body)?;

    match candidate_text(body) {
        Some(text) => Ok(text),
        None if body.pointer("/candidates/0").is_some() => {
            anyhow::bail!("model returned no text")
        }
        None => anyhow::bail!("model returned no candidates"),
    }
}

/// Extract the text delta from one streamed chunk.
fn chunk_text(data: &str) -> anyhow::Result<Option<String>> {
    let v: Value = serde_json::from_str(data).context("gemini sent a malformed chunk")?;

    if let Some(message) = v.pointer("/error/message").and_then(Value::as_str) {
        anyhow::bail!("gemini stream error: {message}");
    }
    check_prompt(&v)?;
    check_finish(&v)?;

    Ok(candidate_text(&v))
}
