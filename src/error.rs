//! Error types for the chat session manager

use std::fmt;
use thiserror::Error;

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ChatError>;

/// Failure of the completion request itself.
///
/// Carries the raw upstream detail so it can be shown to the user as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    /// HTTP status code, `None` when no response was received
    pub status: Option<u16>,
    /// Reason phrase for the status, or the transport error description
    pub reason: String,
    /// Raw response body
    pub body: String,
    /// Set when no response headers arrived before the request timeout
    pub timed_out: bool,
}

impl RequestError {
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        Self {
            status: Some(status.as_u16()),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            body,
            timed_out: false,
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: reason.into(),
            body: String::new(),
            timed_out: false,
        }
    }

    pub fn timeout(after: std::time::Duration) -> Self {
        Self {
            status: None,
            reason: format!("no response within {:?}", after),
            body: String::new(),
            timed_out: true,
        }
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} {} {}", status, self.reason, self.body),
            None if self.timed_out => write!(f, "timeout: {}", self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Chat session errors
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("Insufficient history: asked to remove {requested} messages, {available} removable")]
    InsufficientHistory { requested: usize, available: usize },

    #[error("System prompt is too long: {tokens} tokens, model allows {max}")]
    SystemPromptTooLong { tokens: usize, max: usize },

    #[error("Request failed: {0}")]
    Request(RequestError),

    #[error("Session is busy with another request")]
    SessionBusy,

    #[error("Malformed stream chunk: {0}")]
    MalformedStreamChunk(String),

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Reply cancelled")]
    Cancelled,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RequestError> for ChatError {
    fn from(err: RequestError) -> Self {
        ChatError::Request(err)
    }
}
