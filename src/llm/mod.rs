//! Model drivers for the hosted LLM APIs.
//!
//! The [`ChatModel`] trait is the seam between a conversation and the remote
//! model: it takes the full turn history and returns either the whole reply
//! or a stream of [`NormalizedEvent`]s.
//!
//! # Drivers
//!
//! - [`GeminiDriver`]: Google Generative Language API (`:generateContent`)
//! - [`ChatCompletionsDriver`]: `OpenAI`-compatible Chat Completions (`/v1/chat/completions`)
//!
//! # Example
//!
//! ```rust,ignore
//! use chaat_gpt::llm::{LlmProtocol, LlmSettings, build_model};
//!
//! let settings = LlmSettings {
//!     base_url: "https://generativelanguage.googleapis.com".to_string(),
//!     api_key: Some("...".to_string()),
//!     model: "gemini-1.5-flash-latest".to_string(),
//!     protocol: LlmProtocol::Auto,
//!     timeout: None,
//! };
//! let model = build_model(&settings)?;
//! ```

pub mod chat_completions;
pub mod gemini;
pub mod provider;
mod sse;

pub use chat_completions::ChatCompletionsDriver;
pub use gemini::GeminiDriver;
pub use provider::Provider;

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::normalized::NormalizedEvent;

/// LLM connection and model settings.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// Base URL for the LLM API (e.g., `https://generativelanguage.googleapis.com`).
    pub base_url: String,
    /// Optional API key for authentication.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gemini-1.5-flash-latest`).
    pub model: String,
    /// Protocol to use for communication.
    pub protocol: LlmProtocol,
    /// Upper bound for a single upstream request.
    pub timeout: Option<Duration>,
}

/// LLM protocol variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProtocol {
    /// Pick the protocol from the provider detected in the base URL.
    #[default]
    Auto,
    /// Google Generative Language API.
    Gemini,
    /// `OpenAI` Chat Completions API.
    Chat,
}

impl LlmProtocol {
    /// Resolve [`LlmProtocol::Auto`] against a base URL.
    #[must_use]
    pub fn resolve(self, base_url: &str) -> Self {
        match self {
            Self::Auto => Provider::detect_from_url(base_url).native_protocol(),
            other => other,
        }
    }
}

/// Author of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting (also used for the hidden persona prompt).
    User,
    /// The model.
    Model,
}

impl Role {
    /// Lowercase name, used for CSS classes and JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Who sent it.
    pub role: Role,
    /// Plain text content.
    pub text: String,
}

impl Turn {
    /// Create a user turn.
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    /// Create a model turn.
    #[must_use]
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Role::Model,
            text: text.into(),
        }
    }
}

/// Boxed stream of driver events.
pub type EventStream = Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>;

/// A remote model that continues a conversation.
#[async_trait::async_trait]
pub trait ChatModel: Send + Sync {
    /// Send the full history and wait for the complete reply text.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the provider answers with a
    /// non-success status, or the reply cannot be parsed.
    async fn complete(&self, history: &[Turn]) -> anyhow::Result<String>;

    /// Send the full history and stream the reply.
    ///
    /// The stream yields [`NormalizedEvent::MessageDelta`] items and ends with
    /// [`NormalizedEvent::Done`].
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be started; failures after the
    /// first byte arrive as `Err` items on the stream.
    async fn stream(&self, history: &[Turn]) -> anyhow::Result<EventStream>;
}

/// Build the driver selected by `settings.protocol`.
pub fn build_model(settings: &LlmSettings) -> anyhow::Result<Arc<dyn ChatModel>> {
    let http = http_client(settings)?;
    let model: Arc<dyn ChatModel> = match settings.protocol.resolve(&settings.base_url) {
        LlmProtocol::Chat => Arc::new(ChatCompletionsDriver::new(http, settings.clone())),
        LlmProtocol::Gemini | LlmProtocol::Auto => {
            Arc::new(GeminiDriver::new(http, settings.clone()))
        }
    };
    Ok(model)
}

fn http_client(settings: &LlmSettings) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = settings.timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().context("failed to build HTTP client")
}

/// Turn a non-success response into an error carrying the provider message.
async fn ensure_success(resp: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(ToString::to_string)
        })
        .unwrap_or(body);

    if detail.trim().is_empty() {
        anyhow::bail!("upstream returned {status}");
    }
    anyhow::bail!("upstream returned {status}: {}", detail.trim())
}
