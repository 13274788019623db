//! Token accounting using tiktoken

use crate::conversation::{Conversation, Message};
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;
use dashmap::DashMap;
use std::sync::Arc;
use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer};
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Implicit `<im_start>{role}\n ... <im_end>\n` framing around every message
pub const MESSAGE_OVERHEAD: usize = 5;
/// Extra charge when a message carries a `name`
pub const NAME_OVERHEAD: usize = 5;
/// Every reply is primed with `<im_start>assistant`
pub const REPLY_PRIMING: usize = 5;

/// Encoding chosen for a model id
#[derive(Clone)]
pub struct ResolvedEncoding {
    pub tokenizer: Tokenizer,
    /// The id was not recognized and the GPT-4 encoding stands in for it
    pub used_fallback: bool,
    bpe: Arc<CoreBPE>,
}

impl ResolvedEncoding {
    pub fn encoded_len(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }
}

impl std::fmt::Debug for ResolvedEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedEncoding")
            .field("tokenizer", &self.tokenizer)
            .field("used_fallback", &self.used_fallback)
            .finish()
    }
}

/// Counts the tokens a conversation costs against a model.
///
/// Counting is pure: the caches below only avoid reloading BPE tables.
#[derive(Default)]
pub struct TokenAccountant {
    tables: DashMap<String, Arc<CoreBPE>>,
    models: DashMap<String, ResolvedEncoding>,
}

impl TokenAccountant {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the encoding for a model id, falling back to `cl100k_base`
    pub fn resolve_encoding(&self, model_id: &str) -> Result<ResolvedEncoding> {
        if let Some(resolved) = self.models.get(model_id) {
            return Ok(resolved.clone());
        }

        // Only GPT-family ids are recognized; everything else is counted as GPT-4
        let (tokenizer, used_fallback) = if model_id.contains("gpt") {
            (get_tokenizer(model_id).unwrap_or(Tokenizer::Cl100kBase), false)
        } else {
            warn!(
                "Unrecognized model '{}', counting tokens with the GPT-4 encoding (cl100k_base)",
                model_id
            );
            METRICS.encoding_fallbacks.inc();
            (Tokenizer::Cl100kBase, true)
        };

        let bpe = self.table(tokenizer)?;
        let resolved = ResolvedEncoding {
            tokenizer,
            used_fallback,
            bpe,
        };
        self.models.insert(model_id.to_string(), resolved.clone());
        Ok(resolved)
    }

    fn table(&self, tokenizer: Tokenizer) -> Result<Arc<CoreBPE>> {
        let key = format!("{:?}", tokenizer);
        if let Some(bpe) = self.tables.get(&key) {
            return Ok(Arc::clone(&bpe));
        }

        debug!("Loading BPE table {}", key);
        let bpe = tiktoken_rs::get_bpe_from_tokenizer(tokenizer)
            .map_err(|e| ChatError::Tokenizer(e.to_string()))?;
        let bpe = Arc::new(bpe);
        self.tables.insert(key, Arc::clone(&bpe));
        Ok(bpe)
    }

    /// Token cost of an arbitrary message list, including reply priming
    pub fn count_messages(&self, messages: &[Message], model_id: &str) -> Result<usize> {
        let encoding = self.resolve_encoding(model_id)?;

        let mut tokens = 0;
        for message in messages {
            tokens += MESSAGE_OVERHEAD;
            tokens += encoding.encoded_len(message.role.as_str());
            if !message.content.is_empty() {
                tokens += encoding.encoded_len(&message.content);
            }
            if let Some(name) = &message.name {
                if !name.is_empty() {
                    tokens += encoding.encoded_len(name);
                }
                tokens += NAME_OVERHEAD;
            }
        }

        Ok(tokens + REPLY_PRIMING)
    }

    /// Token cost of a stored conversation
    pub fn count_tokens(&self, conversation: &Conversation, model_id: &str) -> Result<usize> {
        self.count_messages(conversation.messages(), model_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Conversation {
        let mut conversation = Conversation::seeded("You are a helper.");
        conversation.push(Message::user("What is the capital of France?"));
        conversation.push(Message::assistant("Paris."));
        conversation
    }

    #[test]
    fn test_empty_list_costs_priming_only() {
        let accountant = TokenAccountant::new();
        assert_eq!(accountant.count_messages(&[], "gpt-4").unwrap(), REPLY_PRIMING);
    }

    #[test]
    fn test_per_message_overhead() {
        let accountant = TokenAccountant::new();
        // "system" and "hello" are single tokens in cl100k_base
        let tokens = accountant
            .count_messages(&[Message::system("hello")], "gpt-4")
            .unwrap();
        assert_eq!(tokens, MESSAGE_OVERHEAD + 1 + 1 + REPLY_PRIMING);

        let empty = accountant
            .count_messages(&[Message::system("")], "gpt-4")
            .unwrap();
        assert_eq!(empty, MESSAGE_OVERHEAD + 1 + REPLY_PRIMING);
    }

    #[test]
    fn test_name_field_overhead() {
        let accountant = TokenAccountant::new();
        let plain = accountant
            .count_messages(&[Message::user("hello")], "gpt-4")
            .unwrap();
        let named = accountant
            .count_messages(&[Message::user("hello").with_name("bob")], "gpt-4")
            .unwrap();
        assert!(named >= plain + NAME_OVERHEAD + 1);
    }

    #[test]
    fn test_unknown_model_falls_back_to_gpt4_encoding() {
        let accountant = TokenAccountant::new();
        let known = accountant.resolve_encoding("gpt-4").unwrap();
        assert!(!known.used_fallback);

        let unknown = accountant.resolve_encoding("my-local-llama").unwrap();
        assert!(unknown.used_fallback);
        assert_eq!(unknown.tokenizer, Tokenizer::Cl100kBase);

        let conversation = sample();
        assert_eq!(
            accountant.count_tokens(&conversation, "my-local-llama").unwrap(),
            accountant.count_tokens(&conversation, "gpt-4").unwrap()
        );
    }

    #[test]
    fn test_non_gpt_ids_are_flagged_as_fallback() {
        let accountant = TokenAccountant::new();
        for model in ["text-davinci-003", "code-davinci-002", "davinci"] {
            let resolved = accountant.resolve_encoding(model).unwrap();
            assert_eq!(resolved.tokenizer, Tokenizer::Cl100kBase, "{}", model);
            assert!(resolved.used_fallback, "{}", model);
        }

        for model in ["gpt-3.5-turbo", "gpt-4-32k", "gpt-4-0613"] {
            let resolved = accountant.resolve_encoding(model).unwrap();
            assert_eq!(resolved.tokenizer, Tokenizer::Cl100kBase, "{}", model);
            assert!(!resolved.used_fallback, "{}", model);
        }
    }

    #[test]
    fn test_count_is_deterministic() {
        let accountant = TokenAccountant::new();
        let conversation = sample();
        let first = accountant.count_tokens(&conversation, "gpt-3.5-turbo").unwrap();
        let second = accountant.count_tokens(&conversation, "gpt-3.5-turbo").unwrap();
        let fresh = TokenAccountant::new()
            .count_tokens(&conversation, "gpt-3.5-turbo")
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first, fresh);
    }

    #[test]
    fn test_count_grows_with_appends() {
        let accountant = TokenAccountant::new();
        let mut conversation = Conversation::seeded("sys");
        let mut previous = accountant.count_tokens(&conversation, "gpt-4").unwrap();
        for text in ["", "a", "a longer message with several words in it"] {
            conversation.push(Message::user(text));
            let now = accountant.count_tokens(&conversation, "gpt-4").unwrap();
            assert!(now > previous);
            previous = now;
        }
    }
}
