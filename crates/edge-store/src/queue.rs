//! Durable FIFO hit queue.

use crate::{Database, QueuedRecord, StoreError, StoreResult};
use chrono::DateTime;
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// FIFO of hits awaiting dispatch.
///
/// The queue never interprets payloads. Records leave the queue only through
/// [`HitQueue::remove`] (processed) or [`HitQueue::clear`] (discarded).
pub trait HitQueue: Send + Sync {
    /// Append a record. Returns false when a record with the same id is already queued.
    fn enqueue(&self, record: QueuedRecord) -> StoreResult<bool>;

    /// Oldest record, left in place.
    fn peek(&self) -> StoreResult<Option<QueuedRecord>>;

    /// Remove a record by id. Returns false if it was not queued.
    fn remove(&self, id: &str) -> StoreResult<bool>;

    /// Discard every queued record, returning how many were dropped.
    fn clear(&self) -> StoreResult<usize>;

    /// Number of queued records.
    fn count(&self) -> StoreResult<usize>;
}

/// Hit queue persisted in the `hits` table, one logical queue per name.
pub struct SqliteHitQueue {
    db: Arc<Database>,
    name: String,
}

impl SqliteHitQueue {
    pub fn new(db: Arc<Database>, name: &str) -> Self {
        Self {
            db,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl HitQueue for SqliteHitQueue {
    fn enqueue(&self, record: QueuedRecord) -> StoreResult<bool> {
        let inserted = self.db.connection().execute(
            "INSERT OR IGNORE INTO hits (queue, id, timestamp_ms, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                self.name,
                record.id,
                record.timestamp.timestamp_millis(),
                record.payload
            ],
        )?;
        debug!(queue = %self.name, id = %record.id, inserted = inserted == 1, "Enqueued hit");
        Ok(inserted == 1)
    }

    fn peek(&self) -> StoreResult<Option<QueuedRecord>> {
        let conn = self.db.connection();
        let row = conn
            .query_row(
                "SELECT id, timestamp_ms, payload FROM hits WHERE queue = ?1 ORDER BY seq ASC LIMIT 1",
                params![self.name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((id, timestamp_ms, payload)) => {
                let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
                    StoreError::InvalidData(format!("hit {} has timestamp {}", id, timestamp_ms))
                })?;
                Ok(Some(QueuedRecord {
                    id,
                    timestamp,
                    payload,
                }))
            }
            None => Ok(None),
        }
    }

    fn remove(&self, id: &str) -> StoreResult<bool> {
        let removed = self.db.connection().execute(
            "DELETE FROM hits WHERE queue = ?1 AND id = ?2",
            params![self.name, id],
        )?;
        Ok(removed > 0)
    }

    fn clear(&self) -> StoreResult<usize> {
        let removed = self
            .db
            .connection()
            .execute("DELETE FROM hits WHERE queue = ?1", params![self.name])?;
        debug!(queue = %self.name, removed, "Cleared hit queue");
        Ok(removed)
    }

    fn count(&self) -> StoreResult<usize> {
        let count: i64 = self.db.connection().query_row(
            "SELECT COUNT(*) FROM hits WHERE queue = ?1",
            params![self.name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Non-durable queue for tests and ephemeral pipelines.
#[derive(Debug, Default)]
pub struct MemoryHitQueue {
    records: Mutex<VecDeque<QueuedRecord>>,
}

impl MemoryHitQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HitQueue for MemoryHitQueue {
    fn enqueue(&self, record: QueuedRecord) -> StoreResult<bool> {
        let mut records = self.records.lock();
        if records.iter().any(|r| r.id == record.id) {
            return Ok(false);
        }
        records.push_back(record);
        Ok(true)
    }

    fn peek(&self) -> StoreResult<Option<QueuedRecord>> {
        Ok(self.records.lock().front().cloned())
    }

    fn remove(&self, id: &str) -> StoreResult<bool> {
        let mut records = self.records.lock();
        match records.iter().position(|r| r.id == id) {
            Some(pos) => {
                records.remove(pos);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clear(&self) -> StoreResult<usize> {
        let mut records = self.records.lock();
        let removed = records.len();
        records.clear();
        Ok(removed)
    }

    fn count(&self) -> StoreResult<usize> {
        Ok(self.records.lock().len())
    }
}
