//! Row types.

use chrono::{DateTime, Utc};

/// One unit of work in the hit queue.
///
/// `payload` is opaque to the queue; the dispatch pipeline owns its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRecord {
    /// Unique within a queue; the originating event id.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Vec<u8>,
}

impl QueuedRecord {
    pub fn new(id: impl Into<String>, timestamp: DateTime<Utc>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            timestamp,
            payload,
        }
    }
}
