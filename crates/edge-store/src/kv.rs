//! Key-value collections.

use crate::{Database, StoreResult};
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::Arc;

/// String key-value pairs scoped to one named collection.
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Insert or replace a value.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a value. Returns false if the key was absent.
    fn remove(&self, key: &str) -> StoreResult<bool>;

    /// Every entry in the collection, ordered by key.
    fn entries(&self) -> StoreResult<Vec<(String, String)>>;

    /// Delete the whole collection, returning how many entries were removed.
    fn clear(&self) -> StoreResult<usize>;

    /// Check if a key exists.
    fn contains(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Every key in the collection.
    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.entries()?.into_iter().map(|(k, _)| k).collect())
    }
}

/// Collection stored in the `kv_entries` table.
pub struct SqliteKeyValueStore {
    db: Arc<Database>,
    collection: String,
}

impl SqliteKeyValueStore {
    pub fn new(db: Arc<Database>, collection: &str) -> Self {
        Self {
            db,
            collection: collection.to_string(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl KeyValueStore for SqliteKeyValueStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .db
            .connection()
            .query_row(
                "SELECT value FROM kv_entries WHERE collection = ?1 AND key = ?2",
                params![self.collection, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.db.connection().execute(
            "INSERT INTO kv_entries (collection, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT(collection, key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
            params![self.collection, key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        let removed = self.db.connection().execute(
            "DELETE FROM kv_entries WHERE collection = ?1 AND key = ?2",
            params![self.collection, key],
        )?;
        Ok(removed > 0)
    }

    fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        let conn = self.db.connection();
        let mut stmt = conn
            .prepare("SELECT key, value FROM kv_entries WHERE collection = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![self.collection], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let entries = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn clear(&self) -> StoreResult<usize> {
        let removed = self.db.connection().execute(
            "DELETE FROM kv_entries WHERE collection = ?1",
            params![self.collection],
        )?;
        Ok(removed)
    }
}

/// In-memory collection for tests.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<bool> {
        Ok(self.entries.lock().remove(key).is_some())
    }

    fn entries(&self) -> StoreResult<Vec<(String, String)>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear(&self) -> StoreResult<usize> {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}
