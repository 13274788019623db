//! Per-model token budgets
//!
//! A profile bounds how large a request may grow:
//! - `max_tokens`: the model's context window as far as this client is concerned
//! - `truncate_limit`: history is trimmed below this before sending, leaving
//!   `max_tokens - truncate_limit` tokens of headroom for the reply

use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};

/// Headroom kept for the reply when a profile is derived from a context window
pub const REPLY_HEADROOM: usize = 500;

/// Static token configuration of one model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub id: String,
    pub max_tokens: usize,
    pub truncate_limit: usize,
}

impl ModelProfile {
    /// Create a profile, rejecting a truncate limit that leaves no reply room
    pub fn new(id: impl Into<String>, max_tokens: usize, truncate_limit: usize) -> Result<Self> {
        let profile = Self {
            id: id.into(),
            max_tokens,
            truncate_limit,
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Built-in limits keyed on the model id
    pub fn for_model(id: &str) -> Self {
        let (max_tokens, truncate_limit) = if id.contains("gpt-4-32k") {
            (31000, 30500)
        } else if id.contains("gpt-4") {
            (7000, 6500)
        } else if id.contains("gpt-3.5-turbo-16k") {
            (15000, 14500)
        } else {
            (4000, 3500)
        };

        Self {
            id: id.to_string(),
            max_tokens,
            truncate_limit,
        }
    }

    /// Profile for a model whose context window was reported by the server
    pub fn with_context_window(id: &str, tokens: usize) -> Result<Self> {
        let truncate_limit = tokens.saturating_sub(REPLY_HEADROOM).max(tokens / 2);
        Self::new(id, tokens, truncate_limit)
    }

    /// Apply configured overrides on top of the built-in limits
    pub fn with_overrides(
        mut self,
        max_tokens: Option<usize>,
        truncate_limit: Option<usize>,
    ) -> Result<Self> {
        if let Some(max) = max_tokens {
            self.max_tokens = max;
            if truncate_limit.is_none() && self.truncate_limit >= max {
                self.truncate_limit = max.saturating_sub(REPLY_HEADROOM).max(max / 2);
            }
        }
        if let Some(limit) = truncate_limit {
            self.truncate_limit = limit;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check that the profile is consistent
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 || self.truncate_limit >= self.max_tokens {
            return Err(ChatError::Configuration(format!(
                "model '{}': truncate limit {} must be below max tokens {}",
                self.id, self.truncate_limit, self.max_tokens
            )));
        }
        Ok(())
    }

    /// Fail when a seed message alone does not fit the model
    pub fn check_system_prompt(&self, tokens: usize) -> Result<()> {
        if tokens > self.max_tokens {
            return Err(ChatError::SystemPromptTooLong {
                tokens,
                max: self.max_tokens,
            });
        }
        Ok(())
    }

    /// Reply size to request: what is left of the window, capped by the caller
    pub fn reply_budget(&self, prompt_tokens: usize, requested: Option<usize>) -> usize {
        let remaining = self.max_tokens.saturating_sub(prompt_tokens);
        remaining.min(requested.unwrap_or(self.max_tokens))
    }
}
