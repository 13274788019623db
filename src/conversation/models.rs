//! Data models for conversations

use crate::error::{ChatError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Well-known id of the primary conversation
pub const DEFAULT_CONVERSATION: &str = "default";

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ChatError::InvalidState(format!("unknown role '{}'", other))),
        }
    }
}

/// A single role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Optional participant name; when present the API omits the role token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Reply that was cut short by cancellation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub incomplete: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            incomplete: false,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn mark_incomplete(mut self) -> Self {
        self.incomplete = true;
        self
    }
}

/// Ordered, never-empty sequence of messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Message>", into = "Vec<Message>")]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Start a conversation seeded with a single system message
    pub fn seeded(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    /// Build from an existing message list, which must not be empty
    pub fn from_messages(messages: Vec<Message>) -> Result<Self> {
        if messages.is_empty() {
            return Err(ChatError::InvalidState(
                "a conversation needs at least one message".to_string(),
            ));
        }
        Ok(Self { messages })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Never true for a conversation built through this API
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn seed(&self) -> &Message {
        &self.messages[0]
    }

    pub fn last(&self) -> &Message {
        &self.messages[self.messages.len() - 1]
    }

    /// Messages after the seed, i.e. those rollback may remove
    pub fn removable(&self) -> usize {
        self.messages.len() - 1
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Remove the last `n` messages. Caller guarantees `n <= removable()`.
    pub(crate) fn pop_n(&mut self, n: usize) -> Vec<Message> {
        let keep = self.messages.len() - n;
        self.messages.split_off(keep)
    }

    /// Remove the oldest message after the seed
    pub(crate) fn evict_oldest(&mut self) -> Option<Message> {
        if self.messages.len() > 1 {
            Some(self.messages.remove(1))
        } else {
            None
        }
    }
}

impl TryFrom<Vec<Message>> for Conversation {
    type Error = ChatError;

    fn try_from(messages: Vec<Message>) -> Result<Self> {
        Self::from_messages(messages)
    }
}

impl From<Conversation> for Vec<Message> {
    fn from(conversation: Conversation) -> Self {
        conversation.messages
    }
}

/// Mapping from conversation id to conversation, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationSet(IndexMap<String, Conversation>);

impl ConversationSet {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// A set holding only the primary conversation
    pub fn with_default(system_prompt: impl Into<String>) -> Self {
        let mut set = Self::new();
        set.0.insert(
            DEFAULT_CONVERSATION.to_string(),
            Conversation::seeded(system_prompt),
        );
        set
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.0.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Conversation> {
        self.0.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, conversation: Conversation) -> Option<Conversation> {
        self.0.insert(id.into(), conversation)
    }

    pub fn remove(&mut self, id: &str) -> Option<Conversation> {
        self.0.shift_remove(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_shape() {
        let json = serde_json::to_value(Message::user("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "user", "content": "hi"}));

        let partial = serde_json::to_value(Message::assistant("h").mark_incomplete()).unwrap();
        assert_eq!(partial["incomplete"], true);
    }

    #[test]
    fn test_empty_conversation_rejected() {
        assert!(Conversation::from_messages(vec![]).is_err());
        let parsed: std::result::Result<Conversation, _> = serde_json::from_str("[]");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_set_keeps_original_storage_layout() {
        let raw = r#"{"default":[{"role":"system","content":"You are a helper."},{"role":"user","content":"hi"}]}"#;
        let set: ConversationSet = serde_json::from_str(raw).unwrap();
        let conversation = set.get(DEFAULT_CONVERSATION).unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.last().role, Role::User);
        assert_eq!(serde_json::to_string(&set).unwrap(), raw);
    }

    #[test]
    fn test_evict_keeps_seed() {
        let mut conversation = Conversation::seeded("sys");
        assert!(conversation.evict_oldest().is_none());
        conversation.push(Message::user("a"));
        conversation.push(Message::assistant("b"));
        assert_eq!(conversation.evict_oldest().unwrap().content, "a");
        assert_eq!(conversation.seed().content, "sys");
        assert_eq!(conversation.len(), 2);
    }
}
