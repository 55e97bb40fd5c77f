//! Server-provided key/value payloads echoed back on later requests.

use crate::{DispatchError, DispatchResult};
use chrono::{DateTime, Duration, Utc};
use edge_store::KeyValueStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Collection name for persisted store payloads.
pub const STORE_PAYLOADS_COLLECTION: &str = "edge.storePayloads";

/// A `state:store` entry as sent by the server and echoed back in requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePayload {
    pub key: String,
    pub value: String,
    /// Lifetime in seconds; zero or less means delete.
    pub max_age: i64,
}

/// A store payload with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreResponsePayload {
    pub payload: StorePayload,
    pub expiry_date: DateTime<Utc>,
}

impl StoreResponsePayload {
    pub fn new(payload: StorePayload, received_at: DateTime<Utc>) -> Self {
        let expiry_date = received_at + Duration::seconds(payload.max_age.max(0));
        Self {
            payload,
            expiry_date,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry_date
    }
}

/// Persists store payloads with TTL semantics.
///
/// All read-modify-write cycles run under one lock, so concurrent saves and
/// reads never interleave.
pub struct StorePayloadManager {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
}

impl StorePayloadManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
        }
    }

    /// Unexpired payloads keyed by payload key.
    pub fn get_active(&self) -> BTreeMap<String, StoreResponsePayload> {
        self.get_active_at(Utc::now())
    }

    /// Unexpired payloads as of `now`. Expired entries are evicted and
    /// unreadable ones skipped; store failures yield an empty map.
    pub fn get_active_at(&self, now: DateTime<Utc>) -> BTreeMap<String, StoreResponsePayload> {
        let _guard = self.lock.lock();
        let entries = match self.store.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read store payloads");
                return BTreeMap::new();
            }
        };

        let mut active = BTreeMap::new();
        let mut evict = Vec::new();
        for (key, raw) in entries {
            match serde_json::from_str::<StoreResponsePayload>(&raw) {
                Ok(payload) if payload.payload.max_age > 0 && !payload.is_expired_at(now) => {
                    active.insert(key, payload);
                }
                Ok(_) => evict.push(key),
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping unreadable store payload");
                }
            }
        }

        for key in evict {
            if let Err(e) = self.store.remove(&key) {
                warn!(key = %key, error = %e, "Failed to evict store payload");
            }
        }
        active
    }

    /// Active payloads in request form, ordered by key.
    pub fn active_payloads(&self) -> Vec<StorePayload> {
        self.get_active()
            .into_values()
            .map(|stored| stored.payload)
            .collect()
    }

    /// Merge payloads into the persisted set. Entries with a non-positive
    /// max age remove their key instead.
    pub fn save(&self, payloads: &[StoreResponsePayload]) -> DispatchResult<()> {
        if payloads.is_empty() {
            return Ok(());
        }

        let _guard = self.lock.lock();
        let mut first_error: Option<DispatchError> = None;
        let mut deletions = Vec::new();
        for payload in payloads {
            let key = payload.payload.key.as_str();
            if payload.payload.max_age <= 0 {
                deletions.push(key);
                continue;
            }
            let stored = serde_json::to_string(payload)
                .map_err(DispatchError::from)
                .and_then(|encoded| self.store.set(key, &encoded).map_err(DispatchError::from));
            if let Err(e) = stored {
                warn!(key = %key, error = %e, "Failed to store payload");
                first_error.get_or_insert(e);
            }
        }
        for key in deletions {
            if let Err(e) = self.store.remove(key) {
                warn!(key = %key, error = %e, "Failed to delete store payload");
                first_error.get_or_insert(e.into());
            }
        }

        debug!(count = payloads.len(), "Saved store payloads");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drop every persisted payload.
    pub fn delete_all(&self) -> DispatchResult<usize> {
        let _guard = self.lock.lock();
        Ok(self.store.clear()?)
    }
}
