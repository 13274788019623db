//! Saved sessions, most recent first

use super::store::PersistenceAdapter;
use crate::conversation::ConversationSet;
use crate::error::{ChatError, Result};
use crate::metrics::METRICS;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Named snapshot of every conversation of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    pub title: String,
    pub conversation: ConversationSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Storage key holding the saved sessions of a model
pub fn sessions_key(model: &str) -> String {
    format!("{}_con", model)
}

/// Saved-session access over a storage backend
#[derive(Clone)]
pub struct SessionArchive {
    adapter: Arc<dyn PersistenceAdapter>,
    load_timeout: Duration,
}

impl SessionArchive {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>, load_timeout: Duration) -> Self {
        Self {
            adapter,
            load_timeout,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn PersistenceAdapter> {
        &self.adapter
    }

    /// Load and decode a value, falling back to `default` on timeout,
    /// absence, storage error or undecodable data
    pub async fn load_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match tokio::time::timeout(self.load_timeout, self.adapter.load(key)).await {
            Ok(Ok(Some(value))) => match serde_json::from_value(value) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!("Stored value under '{}' could not be decoded: {}", key, e);
                    default
                }
            },
            Ok(Ok(None)) => default,
            Ok(Err(e)) => {
                warn!("Loading '{}' failed: {}", key, e);
                default
            }
            Err(_) => {
                METRICS.storage_timeouts.inc();
                warn!("Loading '{}' took longer than {:?}", key, self.load_timeout);
                default
            }
        }
    }

    /// Load that reports every failure, for read-modify-write
    async fn load_strict(&self, key: &str) -> Result<Vec<SavedSession>> {
        let loaded = tokio::time::timeout(self.load_timeout, self.adapter.load(key))
            .await
            .map_err(|_| {
                METRICS.storage_timeouts.inc();
                ChatError::Persistence(format!(
                    "loading '{}' took longer than {:?}",
                    key, self.load_timeout
                ))
            })??;

        match loaded {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }

    pub async fn saved_sessions(&self, model: &str) -> Vec<SavedSession> {
        self.load_or(&sessions_key(model), Vec::new()).await
    }

    /// Record a snapshot in front of the existing ones.
    ///
    /// Existing records that cannot be read make this fail rather than be
    /// overwritten.
    pub async fn save_session(
        &self,
        model: &str,
        title: &str,
        conversation: ConversationSet,
    ) -> Result<SavedSession> {
        let key = sessions_key(model);
        let mut sessions = self.load_strict(&key).await?;

        let saved = SavedSession {
            title: title.to_string(),
            conversation,
            saved_at: Some(Utc::now()),
        };
        sessions.insert(0, saved.clone());
        self.adapter.save(&key, &serde_json::to_value(&sessions)?).await?;

        info!("Saved session '{}' ({} stored for {})", title, sessions.len(), model);
        Ok(saved)
    }

    /// Delete the snapshot at `index` in most-recent-first order
    pub async fn remove_session(&self, model: &str, index: usize) -> Result<SavedSession> {
        let key = sessions_key(model);
        let mut sessions = self.load_strict(&key).await?;
        if index >= sessions.len() {
            return Err(ChatError::InvalidState(format!(
                "no saved session at index {} ({} stored)",
                index,
                sessions.len()
            )));
        }

        let removed = sessions.remove(index);
        self.adapter.save(&key, &serde_json::to_value(&sessions)?).await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct StalledStore;

    #[async_trait]
    impl PersistenceAdapter for StalledStore {
        async fn load(&self, _key: &str) -> Result<Option<Value>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }

        async fn save(&self, _key: &str, _value: &Value) -> Result<()> {
            Ok(())
        }
    }

    fn archive(adapter: Arc<dyn PersistenceAdapter>) -> SessionArchive {
        SessionArchive::new(adapter, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_load_or_falls_back_on_timeout() {
        let archive = archive(Arc::new(StalledStore));
        let loaded: Vec<SavedSession> = archive.load_or("gpt-4_con", Vec::new()).await;
        assert!(loaded.is_empty());
        assert!(archive
            .save_session("gpt-4", "t", ConversationSet::with_default("p"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_load_or_falls_back_on_bad_data() {
        let store = Arc::new(MemoryStore::new());
        store.save("k", &json!("not a list")).await.unwrap();
        let loaded: Vec<SavedSession> = archive(store).load_or("k", Vec::new()).await;
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_saved_record_without_timestamp_loads() {
        let store = Arc::new(MemoryStore::new());
        store
            .save(
                "gpt-3.5-turbo_con",
                &json!([{
                    "title": "Old",
                    "conversation": {"default": [{"role": "system", "content": "p"}]}
                }]),
            )
            .await
            .unwrap();

        let sessions = archive(store).saved_sessions("gpt-3.5-turbo").await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "Old");
        assert!(sessions[0].saved_at.is_none());
    }

    #[tokio::test]
    async fn test_remove_session_bounds() {
        let archive = archive(Arc::new(MemoryStore::new()));
        archive
            .save_session("m", "only", ConversationSet::with_default("p"))
            .await
            .unwrap();
        assert!(matches!(
            archive.remove_session("m", 3).await,
            Err(ChatError::InvalidState(_))
        ));
        assert_eq!(archive.remove_session("m", 0).await.unwrap().title, "only");
        assert!(archive.saved_sessions("m").await.is_empty());
    }
}
