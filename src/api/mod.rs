//! Completion API access
//!
//! - Wire types for requests and streamed chunks
//! - Line decoder for the `data:` event stream
//! - HTTP client with timeout and status mapping

pub mod client;
pub mod models;
pub mod sse;

pub use client::CompletionClient;
pub use models::{
    ChatCompletionChunk, ChatCompletionRequest, ChunkDelta, ImageRequest, ModelInfo, WireMessage,
};
pub use sse::{SseDecoder, StreamEvent};
