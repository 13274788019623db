//! Saved-session persistence
//!
//! Storage is an opaque async key-value store of JSON values. Loads are
//! bounded by a timeout and fall back to a default.

pub mod archive;
pub mod store;

pub use archive::{sessions_key, SavedSession, SessionArchive};
pub use store::{JsonFileStore, MemoryStore, PersistenceAdapter};
