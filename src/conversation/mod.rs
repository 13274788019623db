//! Conversation state
//!
//! Role-tagged messages, conversations that always keep their seed message,
//! and the store that owns them for a session.

pub mod models;
pub mod store;

pub use models::{Conversation, ConversationSet, Message, Role, DEFAULT_CONVERSATION};
pub use store::ConversationStore;
