//! SQLite persistence for the edge dispatch pipeline.
//!
//! This crate provides:
//! - [`Database`]: a single SQLite connection with schema migrations
//! - [`HitQueue`]: the durable FIFO of hits awaiting dispatch
//! - [`KeyValueStore`]: string key-value pairs scoped to a named collection
//!
//! Every trait has a SQLite implementation for production and an in-memory
//! one for tests.
//!
//! ```ignore
//! let db = Arc::new(Database::open(&paths.database_file())?);
//! let queue = SqliteHitQueue::new(db.clone(), "edge");
//! let payloads = SqliteKeyValueStore::new(db, "edge.payloads");
//! ```

mod db;
mod error;
mod kv;
mod migrations;
mod models;
mod queue;

pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use kv::{KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::QueuedRecord;
pub use queue::{HitQueue, MemoryHitQueue, SqliteHitQueue};
