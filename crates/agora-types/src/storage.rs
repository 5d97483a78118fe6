//! Key-value storage collaborator.
//!
//! The dispatcher persists session and dialogue state through this narrow
//! interface. Values are plain JSON so that any backend can hold them.

use crate::error::{AgoraError, AgoraResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A JSON key-value store.
///
/// Implementations must be cheap to call from inside the dispatch path; none
/// of the methods may block on network I/O.
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if absent.
    fn get(&self, key: &str) -> AgoraResult<Option<Value>>;

    /// Insert or replace a value.
    fn set(&self, key: &str, value: Value) -> AgoraResult<()>;

    /// Delete a value. Deleting an absent key is not an error.
    fn remove(&self, key: &str) -> AgoraResult<()>;

    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> AgoraResult<Vec<String>>;
}

/// Process-local store, used by tests and agents without persistence.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> AgoraResult<Option<Value>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| AgoraError::Internal(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> AgoraResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| AgoraError::Internal(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> AgoraResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| AgoraError::Internal(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> AgoraResult<Vec<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| AgoraError::Internal(e.to_string()))?;
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_set_remove() {
        let store = MemoryStore::new();
        assert!(store.get("k").unwrap().is_none());

        store.set("k", json!({"state": "s1"})).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!({"state": "s1"})));

        store.set("k", json!(2)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(json!(2)));

        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        // Removing twice is fine.
        store.remove("k").unwrap();
    }

    #[test]
    fn test_keys_with_prefix() {
        let store = MemoryStore::new();
        store.set("session:b", json!(1)).unwrap();
        store.set("session:a", json!(1)).unwrap();
        store.set("dialogue:x", json!(1)).unwrap();

        assert_eq!(
            store.keys_with_prefix("session:").unwrap(),
            vec!["session:a".to_string(), "session:b".to_string()]
        );
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set("k", json!("v")).unwrap();
        assert_eq!(other.get("k").unwrap(), Some(json!("v")));
    }
}
