//! SQLite key-value store.

use crate::migration::run_migrations;
use agora_types::error::{AgoraError, AgoraResult};
use agora_types::storage::KeyValueStore;
use chrono::Utc;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Key-value store backed by a SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> AgoraResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|e| AgoraError::Storage(e.to_string()))?;
        run_migrations(&conn).map_err(|e| AgoraError::Storage(e.to_string()))?;
        debug!(path = %path.display(), "opened sqlite store");
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// A private, non-persistent database.
    pub fn open_in_memory() -> AgoraResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| AgoraError::Storage(e.to_string()))?;
        run_migrations(&conn).map_err(|e| AgoraError::Storage(e.to_string()))?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// Wrap an already migrated connection.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Stored version counter of `key`; bumped on every overwrite.
    pub fn version(&self, key: &str) -> AgoraResult<Option<u64>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AgoraError::Internal(e.to_string()))?;
        let result = conn.query_row(
            "SELECT version FROM kv_store WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, i64>(0),
        );
        match result {
            Ok(v) => Ok(Some(v as u64)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AgoraError::Storage(e.to_string())),
        }
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> AgoraResult<Option<serde_json::Value>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AgoraError::Internal(e.to_string()))?;
        let result = conn.query_row(
            "SELECT value FROM kv_store WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, Vec<u8>>(0),
        );
        match result {
            Ok(blob) => {
                let value = serde_json::from_slice(&blob)
                    .map_err(|e| AgoraError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(AgoraError::Storage(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: serde_json::Value) -> AgoraResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AgoraError::Internal(e.to_string()))?;
        let blob =
            serde_json::to_vec(&value).map_err(|e| AgoraError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO kv_store (key, value, version, updated_at) VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, version = version + 1, updated_at = ?3",
            rusqlite::params![key, blob, now],
        )
        .map_err(|e| AgoraError::Storage(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> AgoraResult<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AgoraError::Internal(e.to_string()))?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", rusqlite::params![key])
            .map_err(|e| AgoraError::Storage(e.to_string()))?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> AgoraResult<Vec<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AgoraError::Internal(e.to_string()))?;
        // substr comparison instead of LIKE so '%' and '_' in keys match literally.
        let mut stmt = conn
            .prepare(
                "SELECT key FROM kv_store WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
            )
            .map_err(|e| AgoraError::Storage(e.to_string()))?;
        let rows = stmt
            .query_map(rusqlite::params![prefix], |row| row.get::<_, String>(0))
            .map_err(|e| AgoraError::Storage(e.to_string()))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row.map_err(|e| AgoraError::Storage(e.to_string()))?);
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn test_kv_set_get() {
        let store = setup();
        store.set("greeting", json!({"text": "hi"})).unwrap();
        assert_eq!(store.get("greeting").unwrap(), Some(json!({"text": "hi"})));
    }

    #[test]
    fn test_kv_get_missing() {
        let store = setup();
        assert!(store.get("nonexistent").unwrap().is_none());
    }

    #[test]
    fn test_kv_remove() {
        let store = setup();
        store.set("gone", json!(42)).unwrap();
        store.remove("gone").unwrap();
        assert!(store.get("gone").unwrap().is_none());
        // Removing twice is fine.
        store.remove("gone").unwrap();
    }

    #[test]
    fn test_kv_update_bumps_version() {
        let store = setup();
        store.set("k", json!("v1")).unwrap();
        assert_eq!(store.version("k").unwrap(), Some(1));
        store.set("k", json!("v2")).unwrap();
        assert_eq!(store.version("k").unwrap(), Some(2));
        assert_eq!(store.get("k").unwrap(), Some(json!("v2")));
        assert!(store.version("missing").unwrap().is_none());
    }

    #[test]
    fn test_keys_with_prefix_is_literal() {
        let store = setup();
        store.set("dialogue:a:1", json!(1)).unwrap();
        store.set("dialogue:a:2", json!(2)).unwrap();
        store.set("dialogue:b:1", json!(3)).unwrap();
        store.set("dialogueXa", json!(4)).unwrap();
        store.set("100%_done", json!(5)).unwrap();
        store.set("100abc", json!(6)).unwrap();

        assert_eq!(
            store.keys_with_prefix("dialogue:a:").unwrap(),
            vec!["dialogue:a:1".to_string(), "dialogue:a:2".to_string()]
        );
        assert_eq!(
            store.keys_with_prefix("100%_").unwrap(),
            vec!["100%_done".to_string()]
        );
        assert_eq!(store.keys_with_prefix("").unwrap().len(), 6);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("session:bob", json!("3f2a")).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("session:bob").unwrap(), Some(json!("3f2a")));
    }

    #[test]
    fn test_usable_as_trait_object() {
        let store: Arc<dyn KeyValueStore> = Arc::new(setup());
        store.set("x", json!(true)).unwrap();
        assert_eq!(store.get("x").unwrap(), Some(json!(true)));
    }
}
