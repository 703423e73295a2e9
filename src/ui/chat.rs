//! Chat message blocks, error banner and input form.

use crate::llm::{Role, Turn};
use crate::persona;

use super::markdown;

/// Avatar shown next to a turn.
fn avatar(role: Role) -> &'static str {
    match role {
        Role::Model => persona::MODEL_AVATAR,
        Role::User => persona::USER_AVATAR,
    }
}

/// One styled block for a turn, keyed by role. Text is rendered as markdown.
pub fn message_block(turn: &Turn) -> String {
    let role = turn.role.as_str();
    format!(
        r#"            <div class="chat-message chat-message--{role}" data-role="{role}">
                <span class="chat-avatar" aria-hidden="true">{avatar}</span>
                <div class="chat-text">{text}</div>
            </div>
"#,
        avatar = avatar(turn.role),
        text = markdown::render(&turn.text),
    )
}

/// The message container with every visible turn.
pub fn message_list(turns: &[Turn]) -> String {
    let mut out = String::from("        <section id=\"messages\" class=\"chat-messages\">\n");
    for turn in turns {
        out.push_str(&message_block(turn));
    }
    out.push_str("        </section>");
    out
}

/// Error banner shown after a failed exchange.
pub fn error_banner(message: &str) -> String {
    format!(
        r#"            <div class="error-banner" role="alert">An error occurred: {}</div>
"#,
        html_escape::encode_text(message)
    )
}

/// The chat input form.
///
/// Works as a plain form post; with HTMX loaded the new blocks are appended
/// to `#messages` without a page reload.
pub fn input_area() -> String {
    let placeholder = html_escape::encode_double_quoted_attribute(persona::INPUT_PLACEHOLDER);
    format!(
        r##"        <form class="chat-input" action="/chat" method="post"
              hx-post="/chat" hx-target="#messages" hx-swap="beforeend"
              hx-disabled-elt="find button">
            <input type="text" name="prompt" placeholder="{placeholder}" autocomplete="off" autofocus required>
            <button type="submit">Send</button>
        </form>"##
    )
}

/// Blocks appended right after an HTMX form post: the user turn and an empty
/// model block that `chat.js` fills from the reply stream.
pub fn pending_exchange(user_text: &str) -> String {
    let mut out = message_block(&Turn::user(user_text));
    out.push_str(&format!(
        r#"            <div class="chat-message chat-message--model chat-message--pending" data-role="model"
                 data-stream="/chat/stream" data-prompt="{prompt}" aria-busy="true">
                <span class="chat-avatar" aria-hidden="true">{avatar}</span>
                <div class="chat-text"></div>
            </div>
"#,
        prompt = html_escape::encode_double_quoted_attribute(user_text),
        avatar = persona::MODEL_AVATAR,
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_escaped() {
        let block = message_block(&Turn::user("<script>alert(1)</script>"));
        assert!(!block.contains("<script>"));
        assert!(block.contains("&lt;script&gt;"));
    }

    #[test]
    fn model_markdown_is_rendered() {
        let block = message_block(&Turn::model("Toppings:\n\n- sev\n- <script>x</script>\n"));
        assert!(block.contains("<li>sev</li>"));
        assert!(!block.contains("<script>"));
    }

    #[test]
    fn blocks_are_keyed_by_role() {
        let user = message_block(&Turn::user("hi"));
        let model = message_block(&Turn::model("namaste"));

        assert!(user.contains("chat-message--user"));
        assert!(user.contains(persona::USER_AVATAR));
        assert!(model.contains("chat-message--model"));
        assert!(model.contains(persona::MODEL_AVATAR));
    }

    #[test]
    fn pending_exchange_has_user_block_and_empty_reply() {
        let fragment = pending_exchange(r#"pani "puri"?"#);

        assert!(fragment.contains("chat-message--user"));
        assert!(fragment.contains("chat-message--pending"));
        assert!(fragment.contains(r#"data-stream="/chat/stream""#));
        assert!(fragment.contains(r#"data-prompt="pani &quot;puri&quot;?""#));
        assert!(fragment.contains(r#"<div class="chat-text"></div>"#));
    }
}
