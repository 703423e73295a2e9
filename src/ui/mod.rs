//! Server-rendered HTML for the chat page.
//!
//! Every page load is a full re-render of the conversation: the shell, one
//! block per visible turn, an optional error banner and the input form. HTMX
//! form posts receive the user block at once plus a placeholder that
//! `chat.js` streams the reply into.

mod chat;
mod markdown;

pub use chat::{error_banner, input_area, message_block, message_list, pending_exchange};

use crate::llm::Turn;
use crate::persona;

/// Wrap page content in the document shell.
pub fn html_shell(title: &str, content: &str) -> String {
    let title = html_escape::encode_text(title);
    let icon = persona::PAGE_ICON;
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>{title}</title>
    <link rel="icon" href="data:image/svg+xml,<svg xmlns=%22http://www.w3.org/2000/svg%22 viewBox=%220 0 100 100%22><text y=%22.9em%22 font-size=%2290%22>{icon}</text></svg>">
    <script src="https://unpkg.com/htmx.org@2.0.8" defer></script>
    <script src="/static/chat.js" defer></script>
    <link rel="stylesheet" href="/static/app.css">
</head>
<body>
    <main class="chat-shell">
{content}
    </main>
</body>
</html>"#
    )
}

/// Render the full chat page.
///
/// `turns` must already exclude the priming pair.
pub fn chat_page(turns: &[Turn], error: Option<&str>) -> String {
    let heading = html_escape::encode_text(persona::HEADING);
    let banner = error.map(error_banner).unwrap_or_default();

    let content = format!(
        r#"        <header class="chat-header">
            <h1>{heading}</h1>
            <form action="/reset" method="post">
                <button type="submit" class="reset-button">New chat</button>
            </form>
        </header>
{messages}
{banner}
{input}"#,
        messages = message_list(turns),
        input = input_area(),
    );

    html_shell(persona::PAGE_TITLE, &content)
}
