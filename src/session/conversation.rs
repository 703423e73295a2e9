//! Persona-primed conversation and the session store that owns it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::ChatError;
use crate::llm::{ChatModel, Role, Turn};
use crate::normalized::NormalizedEvent;
use crate::persona;

/// Default session idle timeout (30 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Number of hidden turns every conversation starts with.
pub const PRIMING_TURNS: usize = 2;

/// A single conversation.
///
/// Cloning is cheap and yields a handle to the same conversation. Exchanges
/// on one conversation are serialized; a second message waits for the first
/// reply before its user turn is appended.
#[derive(Debug, Clone)]
pub struct Conversation {
    inner: Arc<ConversationInner>,
}

#[derive(Debug)]
struct ConversationInner {
    /// Session identifier.
    id: String,
    /// Turns in send order, priming pair first.
    turns: RwLock<Vec<Turn>>,
    /// Held for the duration of one exchange.
    exchange: Arc<Mutex<()>>,
    /// Last time a turn was added or the conversation was reset.
    last_activity: RwLock<Instant>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn priming_pair() -> Vec<Turn> {
    vec![
        Turn::user(persona::PERSONA_PROMPT),
        Turn::model(persona::GREETING),
    ]
}

impl Conversation {
    /// Create a conversation holding only the priming pair.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ConversationInner {
                id: id.into(),
                turns: RwLock::new(priming_pair()),
                exchange: Arc::new(Mutex::new(())),
                last_activity: RwLock::new(Instant::now()),
            }),
        }
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// All turns, priming pair included.
    #[must_use]
    pub fn turns(&self) -> Vec<Turn> {
        read(&self.inner.turns).clone()
    }

    /// Turns that are shown to the user (everything after the priming pair).
    #[must_use]
    pub fn visible_turns(&self) -> Vec<Turn> {
        read(&self.inner.turns)
            .iter()
            .skip(PRIMING_TURNS)
            .cloned()
            .collect()
    }

    /// The newest turn if it is a model reply outside the priming pair.
    #[must_use]
    pub fn last_reply(&self) -> Option<Turn> {
        read(&self.inner.turns)
            .iter()
            .skip(PRIMING_TURNS)
            .next_back()
            .filter(|turn| turn.role == Role::Model)
            .cloned()
    }

    /// Total number of turns, priming pair included.
    #[must_use]
    pub fn turn_count(&self) -> usize {
        read(&self.inner.turns).len()
    }

    /// Drop every turn after the priming pair.
    pub async fn reset(&self) {
        let _exchange = self.inner.exchange.lock().await;
        write(&self.inner.turns).truncate(PRIMING_TURNS);
        self.touch();
    }

    /// Append a user turn, ask the model for a reply and append it.
    ///
    /// On failure the user turn stays recorded and no model turn is added,
    /// so the user can simply send another message.
    pub async fn append_and_respond(
        &self,
        model: &dyn ChatModel,
        text: &str,
    ) -> Result<Turn, ChatError> {
        let text = validate(text)?;
        let _exchange = self.inner.exchange.lock().await;

        let history = self.push(Turn::user(text));
        tracing::debug!(session_id = %self.id(), turns = history.len(), "Sending exchange");

        let reply = model
            .complete(&history)
            .await
            .map_err(|e| ChatError::upstream(&e))
            .and_then(non_empty_reply);

        match reply {
            Ok(reply) => {
                let turn = Turn::model(reply);
                self.push(turn.clone());
                tracing::info!(
                    name: "chat.exchange.completed",
                    session_id = %self.id(),
                    reply_length = turn.text.len(),
                    turns = self.turn_count(),
                    "Exchange completed"
                );
                Ok(turn)
            }
            Err(e) => {
                tracing::warn!(
                    name: "chat.exchange.failed",
                    session_id = %self.id(),
                    error = %e,
                    "Exchange failed"
                );
                Err(e)
            }
        }
    }

    /// Streaming variant of [`Conversation::append_and_respond`].
    ///
    /// The returned stream starts with [`NormalizedEvent::StreamStart`] and
    /// always ends with [`NormalizedEvent::Done`]. The model turn is appended
    /// only once the upstream stream has finished cleanly; a failure midway
    /// yields [`NormalizedEvent::Error`] and discards the partial reply.
    pub fn append_and_stream(
        &self,
        model: Arc<dyn ChatModel>,
        text: &str,
    ) -> Result<impl Stream<Item = NormalizedEvent> + Send + use<>, ChatError> {
        let text = validate(text)?.to_string();
        let this = self.clone();
        let exchange = Arc::clone(&self.inner.exchange);
        let request_id = Uuid::new_v4().to_string();

        Ok(async_stream::stream! {
            let _exchange = exchange.lock_owned().await;
            yield NormalizedEvent::StreamStart { request_id: request_id.clone() };

            let history = this.push(Turn::user(text));
            tracing::debug!(
                session_id = %this.id(),
                request_id = %request_id,
                turns = history.len(),
                "Opening exchange stream"
            );

            let mut upstream = match model.stream(&history).await {
                Ok(s) => s,
                Err(e) => {
                    let err = ChatError::upstream(&e);
                    tracing::warn!(name: "chat.exchange.failed", session_id = %this.id(), error = %err, "Exchange failed");
                    yield NormalizedEvent::Error { message: err.to_string(), code: None };
                    yield NormalizedEvent::Done;
                    return;
                }
            };

            let mut reply = String::new();
            let mut failure = None;
            while let Some(event) = upstream.next().await {
                match event {
                    Ok(NormalizedEvent::MessageDelta { text }) => {
                        reply.push_str(&text);
                        yield NormalizedEvent::MessageDelta { text };
                    }
                    Ok(NormalizedEvent::Done) => break,
                    Ok(other) => tracing::trace!(event = ?other, "Ignoring upstream event"),
                    Err(e) => {
                        failure = Some(ChatError::upstream(&e));
                        break;
                    }
                }
            }

            match failure.map_or_else(|| non_empty_reply(reply), Err) {
                Ok(reply) => {
                    let length = reply.len();
                    this.push(Turn::model(reply));
                    tracing::info!(
                        name: "chat.exchange.completed",
                        session_id = %this.id(),
                        request_id = %request_id,
                        reply_length = length,
                        turns = this.turn_count(),
                        "Exchange completed"
                    );
                }
                Err(err) => {
                    tracing::warn!(name: "chat.exchange.failed", session_id = %this.id(), error = %err, "Exchange failed");
                    yield NormalizedEvent::Error { message: err.to_string(), code: None };
                }
            }

            yield NormalizedEvent::Done;
        })
    }

    /// Append a turn and return the history including it.
    fn push(&self, turn: Turn) -> Vec<Turn> {
        let mut guard = write(&self.inner.turns);
        guard.push(turn);
        let history = guard.clone();
        drop(guard);
        self.touch();
        history
    }

    /// Update the last activity timestamp.
    fn touch(&self) {
        *write(&self.inner.last_activity) = Instant::now();
    }

    /// Whether an exchange is running on this conversation.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.exchange.try_lock().is_err()
    }

    /// Check if the conversation has been idle longer than `timeout`.
    ///
    /// A conversation waiting on the model is never idle.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        !self.is_busy() && read(&self.inner.last_activity).elapsed() > timeout
    }
}

fn validate(text: &str) -> Result<&str, ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    Ok(text)
}

fn non_empty_reply(reply: String) -> Result<String, ChatError> {
    if reply.trim().is_empty() {
        return Err(ChatError::Upstream(
            "model returned an empty response".to_string(),
        ));
    }
    Ok(reply)
}

/// Thread-safe store mapping session ids to conversations.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Conversation>>>,
}

impl SessionStore {
    /// Create a new session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation under a fresh id.
    #[must_use]
    pub fn create(&self) -> Conversation {
        let conversation = Conversation::new(Uuid::new_v4().to_string());
        write(&self.inner).insert(conversation.id().to_string(), conversation.clone());
        tracing::debug!(session_id = %conversation.id(), "Session created");
        conversation
    }

    /// Get a conversation by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Conversation> {
        read(&self.inner).get(id).cloned()
    }

    /// Return the conversation for `id`, or a new one under a fresh id.
    ///
    /// Unknown ids are never adopted, so a client cannot choose its own
    /// session id.
    #[must_use]
    pub fn resolve(&self, id: Option<&str>) -> Conversation {
        id.and_then(|id| self.get(id))
            .unwrap_or_else(|| self.create())
    }

    /// Remove a conversation by id.
    pub fn remove(&self, id: &str) -> Option<Conversation> {
        write(&self.inner).remove(id)
    }

    /// Get the number of active sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        read(&self.inner).len()
    }

    /// Check if there are no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove conversations that have been idle longer than the timeout.
    ///
    /// Returns the number of sessions removed.
    pub fn cleanup_expired_with_timeout(&self, timeout: Duration) -> usize {
        let mut guard = write(&self.inner);
        let before = guard.len();
        guard.retain(|_, c| !c.is_expired_with_timeout(timeout));
        before - guard.len()
    }

    /// Periodically drop idle sessions until the runtime shuts down.
    pub fn spawn_sweeper(&self, idle_timeout: Duration, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.cleanup_expired_with_timeout(idle_timeout);
                if removed > 0 {
                    tracing::info!(
                        name: "session.swept",
                        removed = removed,
                        remaining = store.len(),
                        "Idle sessions removed"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::EventStream;
    use std::sync::Mutex as StdMutex;

    /// Model that answers from a script and records every history it saw.
    #[derive(Default)]
    struct ScriptedModel {
        replies: StdMutex<Vec<anyhow::Result<String>>>,
        seen: StdMutex<Vec<Vec<Turn>>>,
    }

    impl ScriptedModel {
        fn new(replies: Vec<anyhow::Result<String>>) -> Self {
            let mut replies = replies;
            replies.reverse();
            Self {
                replies: StdMutex::new(replies),
                seen: StdMutex::default(),
            }
        }

        fn next(&self, history: &[Turn]) -> anyhow::Result<String> {
            self.seen.lock().unwrap().push(history.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
        }
    }

    #[async_trait::async_trait]
    impl ChatModel for ScriptedModel {
        async fn complete(&self, history: &[Turn]) -> anyhow::Result<String> {
            self.next(history)
        }

        async fn stream(&self, history: &[Turn]) -> anyhow::Result<EventStream> {
            let reply = self.next(history)?;
            let (head, tail) = reply.split_at(reply.len() / 2);
            let events = vec![
                Ok(NormalizedEvent::MessageDelta { text: head.to_string() }),
                Ok(NormalizedEvent::MessageDelta { text: tail.to_string() }),
                Ok(NormalizedEvent::Done),
            ];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    /// Model whose stream breaks after the first delta.
    struct BrokenStream;

    #[async_trait::async_trait]
    impl ChatModel for BrokenStream {
        async fn complete(&self, _history: &[Turn]) -> anyhow::Result<String> {
            anyhow::bail!("unused")
        }

        async fn stream(&self, _history: &[Turn]) -> anyhow::Result<EventStream> {
            let events = vec![
                Ok(NormalizedEvent::MessageDelta { text: "Pani ".to_string() }),
                Err(anyhow::anyhow!("connection reset")),
            ];
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    #[test]
    fn fresh_conversation_is_primed_and_hidden() {
        let conversation = Conversation::new("s1");

        assert_eq!(conversation.turn_count(), PRIMING_TURNS);
        let turns = conversation.turns();
        assert_eq!(turns[0], Turn::user(persona::PERSONA_PROMPT));
        assert_eq!(turns[1], Turn::model(persona::GREETING));
        assert!(conversation.visible_turns().is_empty());
    }

    #[tokio::test]
    async fn successful_exchange_adds_two_turns() {
        let model = ScriptedModel::new(vec![Ok("Fill crisp puris with spicy pani!".into())]);
        let conversation = Conversation::new("s1");

        let reply = conversation
            .append_and_respond(&model, "How do I make pani puri?")
            .await
            .unwrap();

        assert_eq!(reply.role, Role::Model);
        assert!(!reply.text.is_empty());
        assert_eq!(conversation.turn_count(), 4);
        assert_eq!(
            conversation.visible_turns(),
            vec![
                Turn::user("How do I make pani puri?"),
                Turn::model("Fill crisp puris with spicy pani!"),
            ]
        );
    }

    #[tokio::test]
    async fn full_history_including_priming_is_sent() {
        let model = ScriptedModel::new(vec![Ok("one".into()), Ok("two".into())]);
        let conversation = Conversation::new("s1");

        conversation.append_and_respond(&model, "first").await.unwrap();
        conversation.append_and_respond(&model, "second").await.unwrap();

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen[0].len(), 3);
        assert_eq!(seen[1].len(), 5);
        assert_eq!(seen[1][0].text, persona::PERSONA_PROMPT);
        assert_eq!(seen[1][2], Turn::user("first"));
        assert_eq!(seen[1][3], Turn::model("one"));
        assert_eq!(seen[1][4], Turn::user("second"));
    }

    #[tokio::test]
    async fn failed_exchange_keeps_only_user_turn() {
        let model = ScriptedModel::new(vec![Err(anyhow::anyhow!("quota exceeded"))]);
        let conversation = Conversation::new("s1");

        let err = conversation
            .append_and_respond(&model, "How do I make pani puri?")
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Upstream(ref m) if m.contains("quota exceeded")));
        assert_eq!(conversation.turn_count(), 3);
        assert_eq!(conversation.visible_turns(), vec![Turn::user("How do I make pani puri?")]);
    }

    #[tokio::test]
    async fn retry_after_failure_continues_the_sequence() {
        let model = ScriptedModel::new(vec![Err(anyhow::anyhow!("timeout")), Ok("Here you go".into())]);
        let conversation = Conversation::new("s1");

        assert!(conversation.append_and_respond(&model, "hello").await.is_err());
        conversation.append_and_respond(&model, "hello again").await.unwrap();

        assert_eq!(conversation.turn_count(), 5);
        let roles: Vec<Role> = conversation.visible_turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Model]);
    }

    #[tokio::test]
    async fn two_sends_make_six_turns() {
        let model = ScriptedModel::new(vec![Ok("a".into()), Ok("b".into())]);
        let conversation = Conversation::new("s1");

        conversation.append_and_respond(&model, "one").await.unwrap();
        conversation.append_and_respond(&model, "two").await.unwrap();

        assert_eq!(conversation.turn_count(), 6);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_appending() {
        let model = ScriptedModel::new(vec![]);
        let conversation = Conversation::new("s1");

        let err = conversation.append_and_respond(&model, "   \n").await.unwrap_err();

        assert!(matches!(err, ChatError::EmptyMessage));
        assert_eq!(conversation.turn_count(), PRIMING_TURNS);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_reply_counts_as_failure() {
        let model = ScriptedModel::new(vec![Ok("  ".into())]);
        let conversation = Conversation::new("s1");

        let err = conversation.append_and_respond(&model, "hi").await.unwrap_err();

        assert!(matches!(err, ChatError::Upstream(_)));
        assert_eq!(conversation.turn_count(), 3);
    }

    #[tokio::test]
    async fn concurrent_sends_are_serialized() {
        let model: Arc<dyn ChatModel> =
            Arc::new(ScriptedModel::new(vec![Ok("a".into()), Ok("b".into())]));
        let conversation = Conversation::new("s1");

        let (first, second) = tokio::join!(
            conversation.append_and_respond(model.as_ref(), "one"),
            conversation.append_and_respond(model.as_ref(), "two"),
        );
        first.unwrap();
        second.unwrap();

        let roles: Vec<Role> = conversation.visible_turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User, Role::Model]);
    }

    #[tokio::test]
    async fn stream_appends_reply_after_completion() {
        let model: Arc<dyn ChatModel> =
            Arc::new(ScriptedModel::new(vec![Ok("Bhel puri time".into())]));
        let conversation = Conversation::new("s1");

        let events: Vec<NormalizedEvent> = conversation
            .append_and_stream(model, "snack idea?")
            .unwrap()
            .collect()
            .await;

        assert!(matches!(events.first(), Some(NormalizedEvent::StreamStart { .. })));
        assert_eq!(events.last(), Some(&NormalizedEvent::Done));
        let text: String = events
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::MessageDelta { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Bhel puri time");
        assert_eq!(conversation.turn_count(), 4);
        assert_eq!(conversation.visible_turns()[1], Turn::model("Bhel puri time"));
    }

    #[tokio::test]
    async fn broken_stream_discards_partial_reply() {
        let conversation = Conversation::new("s1");

        let events: Vec<NormalizedEvent> = conversation
            .append_and_stream(Arc::new(BrokenStream), "pani puri?")
            .unwrap()
            .collect()
            .await;

        assert!(events.iter().any(|e| matches!(
            e,
            NormalizedEvent::Error { message, .. } if message.contains("connection reset")
        )));
        assert_eq!(events.last(), Some(&NormalizedEvent::Done));
        assert_eq!(conversation.turn_count(), 3);
    }

    #[test]
    fn stream_rejects_empty_input_eagerly() {
        let conversation = Conversation::new("s1");
        let result = conversation.append_and_stream(Arc::new(BrokenStream), "");
        assert!(matches!(result, Err(ChatError::EmptyMessage)));
        assert_eq!(conversation.turn_count(), PRIMING_TURNS);
    }

    #[tokio::test]
    async fn reset_keeps_priming_pair() {
        let model = ScriptedModel::new(vec![Ok("a".into())]);
        let conversation = Conversation::new("s1");
        conversation.append_and_respond(&model, "one").await.unwrap();

        conversation.reset().await;

        assert_eq!(conversation.turns(), priming_pair());
    }

    #[test]
    fn store_resolves_known_ids_and_replaces_unknown_ones() {
        let store = SessionStore::new();
        assert!(store.is_empty());

        let created = store.resolve(None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.resolve(Some(created.id())).id(), created.id());

        let fresh = store.resolve(Some("attacker-chosen"));
        assert_ne!(fresh.id(), "attacker-chosen");
        assert_eq!(store.len(), 2);

        assert!(store.remove(created.id()).is_some());
        assert!(store.get(created.id()).is_none());
    }

    #[test]
    fn cleanup_drops_only_idle_sessions() {
        let store = SessionStore::new();
        let _ = store.create();

        assert_eq!(store.cleanup_expired_with_timeout(DEFAULT_IDLE_TIMEOUT), 0);
        assert_eq!(store.len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.cleanup_expired_with_timeout(Duration::ZERO), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_keeps_conversations_waiting_on_the_model() {
        let store = SessionStore::new();
        let conversation = store.create();
        let exchange = conversation.inner.exchange.lock().await;

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(conversation.is_busy());
        assert_eq!(store.cleanup_expired_with_timeout(Duration::from_secs(60)), 0);

        drop(exchange);
        assert_eq!(store.cleanup_expired_with_timeout(Duration::from_secs(60)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_removes_idle_sessions() {
        let store = SessionStore::new();
        let idle = store.create();
        let _sweeper = store.spawn_sweeper(Duration::from_secs(60), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(45)).await;
        let active = store.create();
        assert_eq!(store.len(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(store.get(idle.id()).is_none());
        assert!(store.get(active.id()).is_some());
    }

    #[test]
    fn last_reply_ignores_the_greeting_and_user_turns() {
        let conversation = Conversation::new("s1");
        assert_eq!(conversation.last_reply(), None);

        conversation.push(Turn::user("hi"));
        assert_eq!(conversation.last_reply(), None);

        conversation.push(Turn::model("namaste"));
        assert_eq!(conversation.last_reply(), Some(Turn::model("namaste")));
    }
}
