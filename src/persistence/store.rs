//! Key-value storage backends

use crate::error::{ChatError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Durable key-value storage for JSON values.
///
/// Calls may be slow or fail; callers bound their waits.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Value stored under `key`, `None` when absent
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    async fn save(&self, key: &str, value: &Value) -> Result<()>;
}

/// Process-local storage
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.get(key).map(|entry| entry.value().clone()))
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        self.values.insert(key.to_string(), value.clone());
        Ok(())
    }
}

/// One `<key>.json` file per key under a directory
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// The directory is created on first save
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

#[async_trait]
impl PersistenceAdapter for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ChatError::Persistence(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let value = serde_json::from_str(&json).map_err(|e| {
            ChatError::Persistence(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Some(value))
    }

    async fn save(&self, key: &str, value: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            ChatError::Persistence(format!(
                "Failed to create storage directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&path, json).await.map_err(|e| {
            ChatError::Persistence(format!("Failed to write {}: {}", path.display(), e))
        })?;

        debug!("Saved key '{}' to {}", key, path.display());
        Ok(())
    }
}

/// Keep keys inside the storage directory
fn sanitize_key(key: &str) -> String {
    let sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    match sanitized.trim_start_matches('.') {
        "" => "_".to_string(),
        rest => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.load("k").await.unwrap().is_none());
        assert_ok!(store.save("k", &json!({"a": 1})).await);
        assert_eq!(store.load("k").await.unwrap(), Some(json!({"a": 1})));
    }

    #[tokio::test]
    async fn test_json_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested"));

        assert!(store.load("gpt-4_con").await.unwrap().is_none());
        store.save("gpt-4_con", &json!([1, 2, 3])).await.unwrap();
        assert_eq!(store.load("gpt-4_con").await.unwrap(), Some(json!([1, 2, 3])));
        assert!(dir.path().join("nested/gpt-4_con.json").exists());
    }

    #[tokio::test]
    async fn test_json_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{oops").unwrap();
        let store = JsonFileStore::new(dir.path());
        let err = assert_err!(store.load("bad").await);
        assert!(matches!(err, ChatError::Persistence(_)));
    }

    #[test]
    fn test_sanitize_key() {
        assert_eq!(sanitize_key("gpt-3.5-turbo_con"), "gpt-3.5-turbo_con");
        assert_eq!(sanitize_key("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_key("a b/c"), "a_b_c");
        assert_eq!(sanitize_key(".."), "_");
    }
}
