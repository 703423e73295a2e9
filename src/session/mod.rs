//! Session and conversation management.
//!
//! This module provides in-memory session storage. Each session owns one
//! persona-primed [`Conversation`]; sessions are identified by UUID and are
//! dropped once idle for longer than the configured timeout.
//!
//! # Architecture
//!
//! - [`Conversation`]: ordered turns of one chat, priming pair first
//! - [`SessionStore`]: thread-safe map from session id to conversation
//!
//! # Example
//!
//! ```rust
//! use chaat_gpt::session::SessionStore;
//!
//! let store = SessionStore::new();
//! let conversation = store.resolve(None);
//!
//! // The persona prompt and greeting are sent to the model but never shown.
//! assert_eq!(conversation.turn_count(), 2);
//! assert!(conversation.visible_turns().is_empty());
//! ```

mod conversation;

pub use conversation::{Conversation, DEFAULT_IDLE_TIMEOUT, PRIMING_TURNS, SessionStore};
