//! Token budgets for conversations
//!
//! - Per-model limits (`ModelProfile`)
//! - Token accounting with model-specific BPE encodings
//! - Truncation of old turns to stay under the budget

pub mod token_budget;
pub mod token_estimator;
pub mod truncation;

pub use token_budget::{ModelProfile, REPLY_HEADROOM};
pub use token_estimator::{ResolvedEncoding, TokenAccountant};
pub use truncation::{truncate, Truncation};
