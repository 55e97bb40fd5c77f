//! Inbound host events and outbound dispatches.

use crate::response::{EdgeEventError, EdgeEventHandle};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// What an inbound event asks the pipeline to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    /// Experience data to send to `/v1/interact`.
    ExperienceEvent,
    /// Consent preferences to send to `/v1/privacy/set-consent`.
    ConsentUpdate,
    /// Consent component published new preferences.
    ConsentPreferences,
    /// Identities were reset.
    ResetIdentities,
    /// Another component published shared state.
    SharedStateChanged,
    /// Set or clear the location hint.
    UpdateLocationHint,
    /// Ask for the current location hint.
    RequestLocationHint,
}

/// An event delivered to the pipeline by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeEvent {
    pub id: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl EdgeEvent {
    pub fn new(kind: EventKind, data: Map<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Experience event carrying an XDM body.
    pub fn experience(xdm: Value) -> Self {
        Self::new(EventKind::ExperienceEvent, object(json!({ "xdm": xdm })))
    }

    /// Consent update carrying a `consents` document.
    pub fn consent_update(consents: Value) -> Self {
        Self::new(EventKind::ConsentUpdate, object(json!({ "consents": consents })))
    }

    /// New consent preferences from the consent component.
    pub fn consent_preferences(preferences: Value) -> Self {
        Self::new(EventKind::ConsentPreferences, object(preferences))
    }

    pub fn reset_identities() -> Self {
        Self::new(EventKind::ResetIdentities, Map::new())
    }

    pub fn shared_state_changed(owner: &str) -> Self {
        Self::new(
            EventKind::SharedStateChanged,
            object(json!({ "stateowner": owner })),
        )
    }

    /// Set the location hint, or clear it with `None`.
    pub fn update_location_hint(hint: Option<&str>, ttl_seconds: Option<i64>) -> Self {
        let mut data = object(json!({ "locationHint": hint }));
        if let Some(ttl) = ttl_seconds {
            data.insert("ttlSeconds".to_string(), json!(ttl));
        }
        Self::new(EventKind::UpdateLocationHint, data)
    }

    pub fn request_location_hint() -> Self {
        Self::new(EventKind::RequestLocationHint, Map::new())
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Events the pipeline emits back to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    /// One response handle, correlated to its originating event when possible.
    ResponseContent {
        request_id: String,
        request_event_id: Option<String>,
        handle: EdgeEventHandle,
    },
    /// One server error or warning, or a transport failure.
    ErrorResponseContent {
        request_id: String,
        request_event_id: Option<String>,
        error: EdgeEventError,
    },
    /// Answer to a location hint request.
    LocationHintResponse {
        parent_event_id: String,
        location_hint: Option<String>,
    },
}

/// Receives outbound events.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: OutboundEvent);
}

/// Discards all outbound events.
#[derive(Debug, Default)]
pub struct NullDispatcher;

impl EventDispatcher for NullDispatcher {
    fn dispatch(&self, _event: OutboundEvent) {}
}

/// Records outbound events for inspection.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Handles dispatched so far, in order.
    pub fn handles(&self) -> Vec<(Option<String>, EdgeEventHandle)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                OutboundEvent::ResponseContent {
                    request_event_id,
                    handle,
                    ..
                } => Some((request_event_id.clone(), handle.clone())),
                _ => None,
            })
            .collect()
    }

    /// Errors dispatched so far, in order.
    pub fn errors(&self) -> Vec<(Option<String>, EdgeEventError)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                OutboundEvent::ErrorResponseContent {
                    request_event_id,
                    error,
                    ..
                } => Some((request_event_id.clone(), error.clone())),
                _ => None,
            })
            .collect()
    }
}

impl EventDispatcher for RecordingDispatcher {
    fn dispatch(&self, event: OutboundEvent) {
        self.events.lock().push(event);
    }
}
