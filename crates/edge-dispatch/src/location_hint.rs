//! Location hint persistence.
//!
//! A location hint pins requests to one Edge Network region. It is kept with
//! an expiry and published as shared state `{"locationHint": hint}` whenever
//! its visible value changes.

use crate::shared_state::SharedStateRegistry;
use chrono::{DateTime, Duration, Utc};
use edge_store::KeyValueStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

/// Key under which the hint is persisted in the state collection.
pub const LOCATION_HINT_KEY: &str = "locationHint";

/// TTL applied when the server or caller omits one.
pub const DEFAULT_LOCATION_HINT_TTL_SECS: i64 = 1800;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredHint {
    hint: String,
    expiry_date: DateTime<Utc>,
}

/// Current location hint plus the value last published to shared state.
pub struct LocationHintManager {
    store: Arc<dyn KeyValueStore>,
    current: Mutex<Option<StoredHint>>,
    published: Mutex<Option<String>>,
}

impl LocationHintManager {
    /// Load any persisted hint.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let current = match store.get(LOCATION_HINT_KEY) {
            Ok(Some(raw)) => serde_json::from_str::<StoredHint>(&raw)
                .map_err(|e| debug!(error = %e, "Ignoring unreadable location hint"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Failed to load location hint");
                None
            }
        };

        Self {
            store,
            current: Mutex::new(current),
            published: Mutex::new(None),
        }
    }

    pub fn current(&self) -> Option<String> {
        self.current_at(Utc::now())
    }

    /// The hint if it has not expired at `now`.
    pub fn current_at(&self, now: DateTime<Utc>) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .filter(|stored| now < stored.expiry_date)
            .map(|stored| stored.hint.clone())
    }

    pub fn set(&self, hint: &str, ttl_secs: i64) -> bool {
        self.set_at(hint, ttl_secs, Utc::now())
    }

    /// Store a hint. A blank hint or non-positive TTL clears instead.
    /// Returns whether the visible hint changed.
    pub fn set_at(&self, hint: &str, ttl_secs: i64, now: DateTime<Utc>) -> bool {
        let hint = hint.trim();
        if hint.is_empty() || ttl_secs <= 0 {
            return self.clear_at(now);
        }

        let previous = self.current_at(now);
        let stored = StoredHint {
            hint: hint.to_string(),
            expiry_date: now + Duration::seconds(ttl_secs),
        };
        match serde_json::to_string(&stored) {
            Ok(raw) => {
                if let Err(e) = self.store.set(LOCATION_HINT_KEY, &raw) {
                    warn!(error = %e, "Failed to persist location hint");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode location hint"),
        }
        *self.current.lock() = Some(stored);

        previous.as_deref() != Some(hint)
    }

    pub fn clear(&self) -> bool {
        self.clear_at(Utc::now())
    }

    fn clear_at(&self, now: DateTime<Utc>) -> bool {
        let previous = self.current_at(now);
        *self.current.lock() = None;
        if let Err(e) = self.store.remove(LOCATION_HINT_KEY) {
            warn!(error = %e, "Failed to remove location hint");
        }
        previous.is_some()
    }

    /// Publish the current hint if it differs from what was last published,
    /// including when it has silently expired.
    pub fn publish_if_changed(&self, registry: &dyn SharedStateRegistry) -> bool {
        let current = self.current();
        let mut published = self.published.lock();
        if *published == current {
            return false;
        }

        debug!(hint = ?current, "Publishing location hint");
        let state = match &current {
            Some(hint) => json!({ "locationHint": hint }),
            None => json!({}),
        };
        registry.publish(state);
        *published = current;
        true
    }
}
