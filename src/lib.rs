//! Streaming chat-completion client with token-budgeted conversation sessions
//!
//! - `conversation`: named conversations and their invariants
//! - `context`: model token budgets, token accounting and truncation
//! - `api`: completion API client and event-stream decoding
//! - `session`: the request state machine, retry and cancellation
//! - `persistence`: saved sessions over an async key-value store

pub mod api;
pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod session;

pub use api::CompletionClient;
pub use config::Config;
pub use context::{ModelProfile, TokenAccountant};
pub use conversation::{Conversation, ConversationSet, ConversationStore, Message, Role};
pub use error::{ChatError, RequestError, Result};
pub use persistence::{PersistenceAdapter, SavedSession, SessionArchive};
pub use session::{AskOptions, ChatSession, PartialReplyPolicy, ReplyStream, SessionState};
