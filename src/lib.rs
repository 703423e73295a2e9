//! ChaatGPT
//!
//! A persona-primed chat front-end: it renders a chat page, keeps one
//! conversation per browser session with a hosted LLM, and returns or streams
//! the model's replies back into the page.
//!
//! # Architecture
//!
//! - **Server**: Axum HTTP server rendering HTML (HTMX-enhanced) plus a JSON/SSE API
//! - **Sessions**: in-memory store keyed by a session cookie, idle sessions swept
//! - **LLM**: Gemini and Chat Completions drivers behind one trait
//!
//! # Modules
//!
//! - [`llm`]: model drivers and the turn types they exchange
//! - [`normalized`]: streaming event model
//! - [`session`]: conversations and the session store
//! - [`ui`]: HTML rendering

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::unused_async)]

pub mod config;
pub mod error;
pub mod llm;
pub mod normalized;
pub mod persona;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod ui;

use crate::config::AppConfig;

use llm::ChatModel;
use session::SessionStore;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub struct AppState {
    /// Session store for conversation management.
    pub sessions: SessionStore,
    /// Remote model every conversation talks to.
    pub model: Arc<dyn ChatModel>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}
