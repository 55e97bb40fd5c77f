//! Matches response content to the events that produced it.
//!
//! Before a request is sent, the ids of its events are recorded under the
//! request id in send order. Response handles and errors carry an
//! `eventIndex` into that list.

use crate::completion::CompletionRegistry;
use crate::events::{EdgeEvent, EventDispatcher, OutboundEvent};
use crate::location_hint::{LocationHintManager, DEFAULT_LOCATION_HINT_TTL_SECS};
use crate::response::{
    EdgeEventError, EdgeEventHandle, EdgeResponse, LOCATION_HINT_HANDLE, STORE_HANDLE,
};
use crate::shared_state::SharedStateRegistry;
use crate::store_payload::{StorePayload, StorePayloadManager, StoreResponsePayload};
use chrono::{DateTime, Utc};
use edge_store::KeyValueStore;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Key under which the last identity reset time is persisted.
pub const RESET_MARKER_KEY: &str = "reset.timestamp";

/// Location hint scope that applies to Edge Network requests.
const EDGE_NETWORK_SCOPE: &str = "EdgeNetwork";

/// An event awaiting response content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitingEvent {
    pub event_id: String,
    pub enqueued_at: DateTime<Utc>,
}

impl From<&EdgeEvent> for WaitingEvent {
    fn from(event: &EdgeEvent) -> Self {
        Self {
            event_id: event.id.clone(),
            enqueued_at: event.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Severity {
    Error,
    Warning,
}

/// Resolve an `eventIndex` (default 0) against a waiting list.
pub fn extract_request_event_id(
    event_index: Option<i64>,
    waiting: &[WaitingEvent],
) -> Option<String> {
    let index = usize::try_from(event_index.unwrap_or(0)).ok()?;
    waiting.get(index).map(|w| w.event_id.clone())
}

pub struct ResponseCorrelator {
    waiting: Mutex<HashMap<String, Vec<WaitingEvent>>>,
    dispatcher: Arc<dyn EventDispatcher>,
    completion: Arc<CompletionRegistry>,
    store_payloads: Arc<StorePayloadManager>,
    location_hint: Arc<LocationHintManager>,
    registry: Arc<dyn SharedStateRegistry>,
    state: Arc<dyn KeyValueStore>,
}

impl ResponseCorrelator {
    pub fn new(
        dispatcher: Arc<dyn EventDispatcher>,
        completion: Arc<CompletionRegistry>,
        store_payloads: Arc<StorePayloadManager>,
        location_hint: Arc<LocationHintManager>,
        registry: Arc<dyn SharedStateRegistry>,
        state: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            waiting: Mutex::new(HashMap::new()),
            dispatcher,
            completion,
            store_payloads,
            location_hint,
            registry,
            state,
        }
    }

    /// Record the events of a request, in send order.
    pub fn add_waiting_events(&self, request_id: &str, events: Vec<WaitingEvent>) {
        self.waiting.lock().insert(request_id.to_string(), events);
    }

    pub fn waiting_events(&self, request_id: &str) -> Vec<WaitingEvent> {
        self.waiting
            .lock()
            .get(request_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop and return the waiting list. Later calls return `None`.
    pub fn remove_waiting_events(&self, request_id: &str) -> Option<Vec<WaitingEvent>> {
        self.waiting.lock().remove(request_id)
    }

    pub fn extract_request_event_id(&self, request_id: &str, event_index: Option<i64>) -> Option<String> {
        extract_request_event_id(event_index, &self.waiting_events(request_id))
    }

    /// Remember when identities were last reset.
    pub fn set_last_reset(&self, at: DateTime<Utc>) {
        let seconds = at.timestamp_millis() as f64 / 1000.0;
        if let Err(e) = self.state.set(RESET_MARKER_KEY, &seconds.to_string()) {
            warn!(error = %e, "Failed to persist reset marker");
        }
    }

    pub fn last_reset(&self) -> Option<DateTime<Utc>> {
        let raw = match self.state.get(RESET_MARKER_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read reset marker");
                return None;
            }
        };
        let seconds: f64 = raw.parse().ok()?;
        DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
    }

    /// Store payloads from a request queued before the last reset belong to
    /// the old identity.
    fn should_ignore_store_payloads(&self, waiting: &[WaitingEvent]) -> bool {
        let (Some(reset), Some(earliest)) = (
            self.last_reset(),
            waiting.iter().map(|w| w.enqueued_at).min(),
        ) else {
            return false;
        };
        earliest < reset
    }

    /// Process one success document.
    pub fn process_response(&self, content: &str, request_id: &str) {
        if content.trim().is_empty() {
            debug!(request_id, "Ignoring empty response content");
            return;
        }
        let response: EdgeResponse = match serde_json::from_str(content) {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id, error = %e, "Failed to parse response content");
                return;
            }
        };

        let waiting = self.waiting_events(request_id);
        let ignore_store = self.should_ignore_store_payloads(&waiting);

        for raw in response.handle {
            let handle: EdgeEventHandle = match serde_json::from_value(raw) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(request_id, error = %e, "Skipping malformed handle");
                    continue;
                }
            };
            let event_id = extract_request_event_id(handle.event_index, &waiting);

            if handle.is_type(STORE_HANDLE) {
                if ignore_store {
                    debug!(request_id, "Ignoring store payloads from before identity reset");
                } else {
                    self.save_store_payloads(&handle);
                }
            } else if handle.is_type(LOCATION_HINT_HANDLE) {
                self.update_location_hint(&handle);
            }

            if let Some(event_id) = &event_id {
                self.completion.on_handle_received(event_id, handle.clone());
            }
            debug!(request_id, event_id = ?event_id, handle_type = ?handle.handle_type, "Dispatching handle");
            self.dispatcher.dispatch(OutboundEvent::ResponseContent {
                request_id: request_id.to_string(),
                request_event_id: event_id,
                handle,
            });
        }

        self.dispatch_errors(response.errors, request_id, &waiting, Severity::Error);
        self.dispatch_errors(response.warnings, request_id, &waiting, Severity::Warning);
    }

    /// Process one error document.
    pub fn process_error(&self, content: &str, request_id: &str) {
        let value: Value = match serde_json::from_str(content) {
            Ok(value) => value,
            Err(e) => {
                warn!(request_id, error = %e, "Failed to parse error content");
                return;
            }
        };
        let waiting = self.waiting_events(request_id);

        if value.get("errors").is_some() || value.get("warnings").is_some() {
            match serde_json::from_value::<EdgeResponse>(value) {
                Ok(response) => {
                    self.dispatch_errors(response.errors, request_id, &waiting, Severity::Error);
                    self.dispatch_errors(
                        response.warnings,
                        request_id,
                        &waiting,
                        Severity::Warning,
                    );
                }
                Err(e) => warn!(request_id, error = %e, "Failed to parse error response"),
            }
            return;
        }

        self.dispatch_errors(vec![value], request_id, &waiting, Severity::Error);
    }

    /// Drop the waiting list and finish every event's completion callback.
    /// Returns the ids that were waiting; repeat calls return nothing.
    pub fn complete(&self, request_id: &str) -> Vec<String> {
        let Some(waiting) = self.remove_waiting_events(request_id) else {
            return Vec::new();
        };
        waiting
            .into_iter()
            .map(|w| {
                self.completion.unregister(&w.event_id);
                w.event_id
            })
            .collect()
    }

    fn dispatch_errors(
        &self,
        entries: Vec<Value>,
        request_id: &str,
        waiting: &[WaitingEvent],
        severity: Severity,
    ) {
        for raw in entries {
            let error: EdgeEventError = match serde_json::from_value(raw) {
                Ok(error) => error,
                Err(e) => {
                    warn!(request_id, error = %e, "Skipping malformed error entry");
                    continue;
                }
            };
            let event_id = extract_request_event_id(error.resolved_event_index(), waiting);

            match severity {
                Severity::Error => error!(
                    request_id,
                    event_id = ?event_id,
                    status = ?error.status,
                    detail = ?error.detail,
                    "Edge Network error: {}",
                    error.summary()
                ),
                Severity::Warning => warn!(
                    request_id,
                    event_id = ?event_id,
                    status = ?error.status,
                    "Edge Network warning: {}",
                    error.summary()
                ),
            }

            self.dispatcher.dispatch(OutboundEvent::ErrorResponseContent {
                request_id: request_id.to_string(),
                request_event_id: event_id,
                error,
            });
        }
    }

    fn save_store_payloads(&self, handle: &EdgeEventHandle) {
        let received_at = Utc::now();
        let payloads: Vec<StoreResponsePayload> = handle
            .payload
            .iter()
            .filter_map(|entry| {
                serde_json::from_value::<StorePayload>(Value::Object(entry.clone()))
                    .map_err(|e| warn!(error = %e, "Skipping malformed store payload"))
                    .ok()
            })
            .map(|payload| StoreResponsePayload::new(payload, received_at))
            .collect();

        if let Err(e) = self.store_payloads.save(&payloads) {
            warn!(error = %e, "Failed to save store payloads");
        }
    }

    fn update_location_hint(&self, handle: &EdgeEventHandle) {
        for entry in &handle.payload {
            if entry.get("scope").and_then(Value::as_str) != Some(EDGE_NETWORK_SCOPE) {
                continue;
            }
            let Some(hint) = entry.get("hint").and_then(Value::as_str) else {
                continue;
            };
            let ttl = entry
                .get("ttlSeconds")
                .and_then(Value::as_i64)
                .unwrap_or(DEFAULT_LOCATION_HINT_TTL_SECS);
            // Only explicit UpdateLocationHint events may clear the hint.
            if hint.trim().is_empty() || ttl <= 0 {
                debug!(hint, ttl, "Ignoring unusable location hint");
                continue;
            }

            if self.location_hint.set(hint, ttl) {
                debug!(hint, ttl, "Location hint updated");
            }
            self.location_hint.publish_if_changed(self.registry.as_ref());
        }
    }
}
