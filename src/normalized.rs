//! Reply stream events shared by the drivers and the SSE endpoints.
//!
//! Gemini chunks and Chat Completions deltas are both mapped onto
//! [`NormalizedEvent`], so the page script and API clients only ever see
//! `stream.start`, `message.delta`, `error` and `done`.
//!
//! ```rust
//! use chaat_gpt::normalized::{NormalizedEvent, sse_event};
//!
//! let frame = sse_event(&NormalizedEvent::MessageDelta {
//!     text: "Namaste".to_string(),
//! });
//! assert!(frame.starts_with("event: message.delta\n"));
//! ```

use serde::{Deserialize, Serialize};

/// One step of a streamed model reply.
///
/// Serialized as `{"type": "<name>", "data": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum NormalizedEvent {
    /// First frame of an exchange.
    #[serde(rename = "stream.start")]
    StreamStart {
        /// Id used to correlate log lines for this exchange.
        request_id: String,
    },

    /// A piece of reply text, in order.
    #[serde(rename = "message.delta")]
    MessageDelta {
        text: String,
    },

    /// The exchange failed and the partial reply was dropped.
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Last frame, sent after success and failure alike.
    #[serde(rename = "done")]
    Done,
}

/// Format an event as one `event:` / `data:` SSE frame.
pub fn sse_event(evt: &NormalizedEvent) -> String {
    let data = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });
    format!("event: {}\ndata: {data}\n\n", event_name(evt))
}

/// SSE event name, matching the serde `type` tag.
pub fn event_name(evt: &NormalizedEvent) -> &'static str {
    match evt {
        NormalizedEvent::StreamStart { .. } => "stream.start",
        NormalizedEvent::MessageDelta { .. } => "message.delta",
        NormalizedEvent::Error { .. } => "error",
        NormalizedEvent::Done => "done",
    }
}
