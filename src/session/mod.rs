//! Conversation session manager
//!
//! Owns the conversations of one chat session and drives the completion
//! request lifecycle:
//!
//! ```text
//! Idle -> Sending -> Streaming -> Completed
//!            |           |-----> Cancelled
//!            +-----------+-----> Failed
//! ```
//!
//! One request is in flight at a time; any further request or mutation while
//! `Sending` or `Streaming` fails with `SessionBusy`.

mod chat;
mod reply;
pub mod title;

pub use chat::{AskOptions, ChatSession, SessionSettings};
pub use reply::ReplyStream;
pub use title::{FirstLineTitler, SessionTitler, Summarizer};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of the session in the request lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    /// A request is in flight
    pub fn is_busy(&self) -> bool {
        matches!(self, SessionState::Sending | SessionState::Streaming)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Sending => "sending",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens to the text of a reply cancelled mid-stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PartialReplyPolicy {
    /// Append the partial text as an assistant message flagged `incomplete`
    #[default]
    #[serde(rename = "keep")]
    KeepIncomplete,
    /// Drop the partial text; the user prompt stays in place
    #[serde(rename = "discard")]
    Discard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_states() {
        assert!(SessionState::Sending.is_busy());
        assert!(SessionState::Streaming.is_busy());
        for state in [
            SessionState::Idle,
            SessionState::Completed,
            SessionState::Failed,
            SessionState::Cancelled,
        ] {
            assert!(!state.is_busy(), "{} should not be busy", state);
        }
    }

    #[test]
    fn test_partial_reply_policy_names() {
        let keep: PartialReplyPolicy = serde_json::from_str("\"keep\"").unwrap();
        let discard: PartialReplyPolicy = serde_json::from_str("\"discard\"").unwrap();
        assert_eq!(keep, PartialReplyPolicy::KeepIncomplete);
        assert_eq!(discard, PartialReplyPolicy::Discard);
        assert_eq!(PartialReplyPolicy::default(), PartialReplyPolicy::KeepIncomplete);
    }
}
