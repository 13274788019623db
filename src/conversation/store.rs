//! In-memory conversation store

use super::models::*;
use crate::error::{ChatError, Result};
use tracing::debug;

/// Owns every conversation of a session and enforces their invariants
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    conversations: ConversationSet,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing set, e.g. one loaded from storage
    pub fn from_set(conversations: ConversationSet) -> Self {
        Self { conversations }
    }

    /// Seed a new conversation with exactly one system message
    pub fn create(
        &mut self,
        id: &str,
        system_prompt: &str,
        overwrite: bool,
    ) -> Result<&Conversation> {
        if self.conversations.contains(id) && !overwrite {
            return Err(ChatError::InvalidState(format!(
                "conversation '{}' already exists",
                id
            )));
        }

        debug!("Creating conversation: id={}", id);
        self.conversations
            .insert(id.to_string(), Conversation::seeded(system_prompt));
        self.get(id)
    }

    /// Append a message at the end of a conversation
    pub fn append(&mut self, id: &str, message: Message) -> Result<()> {
        let conversation = self.get_mut(id)?;
        conversation.push(message);
        Ok(())
    }

    /// Remove the last `n` messages, never touching the seed
    pub fn rollback(&mut self, id: &str, n: usize) -> Result<Vec<Message>> {
        let conversation = self.get_mut(id)?;
        let available = conversation.removable();
        if n > available {
            return Err(ChatError::InsufficientHistory {
                requested: n,
                available,
            });
        }

        debug!("Rolling back {} messages from '{}'", n, id);
        Ok(conversation.pop_n(n))
    }

    /// Swap in a whole message list. Loaded data is trusted, so a first
    /// message that is not a system prompt is accepted.
    pub fn replace(&mut self, id: &str, messages: Vec<Message>) -> Result<()> {
        let conversation = Conversation::from_messages(messages)?;
        if conversation.seed().role != Role::System {
            debug!(
                "Conversation '{}' replaced with a {} first message",
                id,
                conversation.seed().role
            );
        }
        self.conversations.insert(id.to_string(), conversation);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Conversation> {
        self.conversations
            .get(id)
            .ok_or_else(|| ChatError::UnknownConversation(id.to_string()))
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Result<&mut Conversation> {
        self.conversations
            .get_mut(id)
            .ok_or_else(|| ChatError::UnknownConversation(id.to_string()))
    }

    pub fn remove(&mut self, id: &str) -> Result<Conversation> {
        self.conversations
            .remove(id)
            .ok_or_else(|| ChatError::UnknownConversation(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.conversations.contains(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.conversations.ids().map(str::to_string).collect()
    }

    /// Copy of every conversation, suitable for persisting
    pub fn snapshot(&self) -> ConversationSet {
        self.conversations.clone()
    }

    /// Replace every conversation with a loaded snapshot
    pub fn restore(&mut self, conversations: ConversationSet) {
        self.conversations = conversations;
    }
}
