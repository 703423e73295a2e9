use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Form, Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::config::AppConfig;
use crate::error::ChatError;
use crate::llm::{self, Turn};
use crate::normalized::{NormalizedEvent, sse_event};
use crate::session::{Conversation, SessionStore};
use crate::ui;

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "chaat_session";

/// Response header carrying the session id on the streaming endpoint.
pub const SESSION_HEADER: &str = "x-session-id";

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let settings = config.llm.settings();
    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        protocol = ?settings.protocol.resolve(&settings.base_url),
        "LLM configuration loaded"
    );
    if settings.api_key.is_none() {
        tracing::warn!(
            name: "llm.config.missing_key",
            "No API key configured; set GEMINI_API_KEY or CHAAT_LLM__API_KEY"
        );
    }

    let model = llm::build_model(&settings)?;

    let sessions = SessionStore::new();
    let _sweeper = sessions.spawn_sweeper(
        config.session.idle_timeout(),
        config.session.sweep_interval(),
    );

    let state = AppState {
        sessions,
        model,
        config: Arc::clone(&config),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // HTML pages
        .route("/", get(index_handler))
        .route("/chat", post(chat_form_handler))
        .route("/chat/stream", get(chat_stream_handler))
        .route("/reset", post(reset_handler))
        // API routes
        .route("/api/chat", post(api_chat))
        .route("/api/chat/stream", get(api_chat_stream))
        .route("/api/sessions/{id}", delete(api_delete_session))
        .route("/api/sessions/{id}/messages", get(api_get_messages))
        .route("/healthz", get(|| async { "ok" }))
        // Static assets
        .nest_service("/static", ServeDir::new("static"))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Session cookie
// ─────────────────────────────────────────────────────────────────────────────

/// Look up the caller's conversation, creating one if the cookie is missing
/// or refers to an expired session.
fn conversation_for(state: &AppState, jar: CookieJar) -> (CookieJar, Conversation) {
    let known = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());
    let conversation = state.sessions.resolve(known.as_deref());

    if known.as_deref() == Some(conversation.id()) {
        return (jar, conversation);
    }

    let cookie = Cookie::build((SESSION_COOKIE, conversation.id().to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();
    (jar.add(cookie), conversation)
}

fn is_htmx(headers: &HeaderMap) -> bool {
    headers.contains_key("hx-request")
}

// ─────────────────────────────────────────────────────────────────────────────
// HTML Page Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// GET / - Render the conversation.
async fn index_handler(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let (jar, conversation) = conversation_for(&state, jar);
    let page = ui::chat_page(&conversation.visible_turns(), None);
    (jar, Html(page))
}

/// Chat form body.
#[derive(Debug, Deserialize)]
struct ChatForm {
    prompt: String,
}

/// POST /chat - Send one message from the page.
///
/// HTMX requests get the user block back at once, plus an empty model block
/// that the page fills from `GET /chat/stream`. Plain form posts wait for the
/// reply, then redirect back to the page, or re-render it with the error
/// banner on failure.
async fn chat_form_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    headers: HeaderMap,
    Form(form): Form<ChatForm>,
) -> Response {
    let (jar, conversation) = conversation_for(&state, jar);

    if is_htmx(&headers) {
        if form.prompt.trim().is_empty() {
            return (jar, StatusCode::NO_CONTENT).into_response();
        }
        return (jar, Html(ui::pending_exchange(&form.prompt))).into_response();
    }

    match conversation
        .append_and_respond(state.model.as_ref(), &form.prompt)
        .await
    {
        Ok(_) | Err(ChatError::EmptyMessage) => (jar, Redirect::to("/")).into_response(),
        Err(e) => {
            let page = ui::chat_page(&conversation.visible_turns(), Some(&e.to_string()));
            (jar, Html(page)).into_response()
        }
    }
}

/// Query for the page's reply stream.
#[derive(Debug, Deserialize)]
struct PromptQuery {
    prompt: String,
}

/// GET /chat/stream - Run one exchange for the cookie's conversation and
/// stream the reply.
///
/// Besides the normalized events, a successful exchange sends a
/// `message.html` frame with the rendered model block right before `done`.
async fn chat_stream_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<PromptQuery>,
) -> Response {
    let (jar, conversation) = conversation_for(&state, jar);

    let resp = match conversation.append_and_stream(Arc::clone(&state.model), &query.prompt) {
        Ok(events) => {
            let body = events.map(move |event| {
                let mut frame = String::new();
                if event == NormalizedEvent::Done {
                    if let Some(reply) = conversation.last_reply() {
                        frame.push_str(&html_frame(&ui::message_block(&reply)));
                    }
                }
                frame.push_str(&sse_event(&event));
                Ok::<String, Infallible>(frame)
            });
            build_sse_response(Body::from_stream(body))
        }
        Err(e) => single_error_sse(&e.to_string()),
    };

    (jar, resp).into_response()
}

fn html_frame(html: &str) -> String {
    let data = serde_json::json!({ "html": html });
    format!("event: message.html\ndata: {data}\n\n")
}

/// POST /reset - Start over with only the priming pair.
async fn reset_handler(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    let (jar, conversation) = conversation_for(&state, jar);
    conversation.reset().await;
    info!(name: "session.reset", session_id = %conversation.id(), "Conversation reset");
    (jar, Redirect::to("/"))
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Optional session ID (creates new if not provided or unknown).
    #[serde(default)]
    session_id: Option<String>,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
struct ChatResponse {
    /// Session ID for this conversation.
    session_id: String,
    /// The model turn.
    reply: Turn,
}

/// POST /api/chat - Send a message and wait for the reply.
///
/// The session id is also returned in the `x-session-id` header, on failures
/// too, so a client can retry within the same conversation.
async fn api_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Response {
    let conversation = state.sessions.resolve(req.session_id.as_deref());
    tracing::info!(
        session_id = %conversation.id(),
        message_length = req.message.len(),
        "Received chat request"
    );

    let resp = match conversation
        .append_and_respond(state.model.as_ref(), &req.message)
        .await
    {
        Ok(reply) => Json(ChatResponse {
            session_id: conversation.id().to_string(),
            reply,
        })
        .into_response(),
        Err(e) => e.into_response(),
    };

    with_session_header(resp, conversation.id())
}

/// Query parameters for the streaming endpoint.
#[derive(Debug, Deserialize)]
struct StreamQuery {
    /// Optional session ID (creates new if not provided or unknown).
    #[serde(default)]
    session_id: Option<String>,
    /// User message content.
    message: String,
}

/// GET /api/chat/stream - Send a message and stream the reply as SSE.
async fn api_chat_stream(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    let conversation = state.sessions.resolve(query.session_id.as_deref());

    let resp = match conversation.append_and_stream(Arc::clone(&state.model), &query.message) {
        Ok(events) => {
            let body = events.map(|event| Ok::<String, Infallible>(sse_event(&event)));
            build_sse_response(Body::from_stream(body))
        }
        Err(e) => single_error_sse(&e.to_string()),
    };

    with_session_header(resp, conversation.id())
}

/// GET /api/sessions/:id/messages - Get the visible turns of a session.
async fn api_get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<Turn>>, ChatError> {
    state
        .sessions
        .get(&id)
        .map(|conversation| Json(conversation.visible_turns()))
        .ok_or(ChatError::SessionNotFound(id))
}

/// DELETE /api/sessions/:id - Delete a session.
async fn api_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ChatError> {
    match state.sessions.remove(&id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ChatError::SessionNotFound(id)),
    }
}

fn with_session_header(mut resp: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        resp.headers_mut().insert(SESSION_HEADER, value);
    }
    resp
}

fn single_error_sse(message: &str) -> Response {
    let err = NormalizedEvent::Error {
        message: message.to_string(),
        code: None,
    };
    let done = NormalizedEvent::Done;

    let payload = format!("{}{}", sse_event(&err), sse_event(&done));
    build_sse_response(Body::from(payload))
}

fn build_sse_response(body: Body) -> Response {
    let mut resp = Response::new(body);
    let h = resp.headers_mut();
    h.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    h.insert("x-accel-buffering", HeaderValue::from_static("no"));
    resp
}
