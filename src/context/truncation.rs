//! History truncation under a token budget

use super::token_budget::ModelProfile;
use super::token_estimator::TokenAccountant;
use crate::conversation::Conversation;
use crate::error::Result;
use crate::metrics::METRICS;
use tracing::debug;

/// Outcome of a truncation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Truncation {
    /// Messages evicted from the front of the history
    pub removed: usize,
    /// Token count after eviction
    pub tokens: usize,
}

impl Truncation {
    /// Only the seed is left and the budget is still exceeded
    pub fn exhausted(&self, profile: &ModelProfile) -> bool {
        self.tokens > profile.truncate_limit
    }
}

/// Evict the oldest messages after the seed until the conversation fits
/// `profile.truncate_limit` or only the seed remains.
///
/// Running it twice is the same as running it once.
pub fn truncate(
    conversation: &mut Conversation,
    profile: &ModelProfile,
    accountant: &TokenAccountant,
) -> Result<Truncation> {
    let mut tokens = accountant.count_tokens(conversation, &profile.id)?;
    let mut removed = 0;

    while tokens > profile.truncate_limit && conversation.len() > 1 {
        if let Some(evicted) = conversation.evict_oldest() {
            debug!(
                "Evicted {} message ({} chars) at {} tokens, limit {}",
                evicted.role,
                evicted.content.len(),
                tokens,
                profile.truncate_limit
            );
            removed += 1;
        }
        tokens = accountant.count_tokens(conversation, &profile.id)?;
    }

    if removed > 0 {
        METRICS.truncated_messages.inc_by(removed as f64);
    }

    Ok(Truncation { removed, tokens })
}
