//! Prints outbound pipeline events as JSON lines.

use edge_dispatch::{EventDispatcher, OutboundEvent};
use serde_json::json;

pub struct PrintDispatcher;

impl EventDispatcher for PrintDispatcher {
    fn dispatch(&self, event: OutboundEvent) {
        let line = match event {
            OutboundEvent::ResponseContent {
                request_id,
                request_event_id,
                handle,
            } => json!({
                "kind": "response",
                "requestId": request_id,
                "eventId": request_event_id,
                "handle": handle,
            }),
            OutboundEvent::ErrorResponseContent {
                request_id,
                request_event_id,
                error,
            } => json!({
                "kind": "error",
                "requestId": request_id,
                "eventId": request_event_id,
                "error": error,
            }),
            OutboundEvent::LocationHintResponse {
                parent_event_id,
                location_hint,
            } => json!({
                "kind": "locationHint",
                "parentEventId": parent_event_id,
                "locationHint": location_hint,
            }),
        };
        println!("{}", line);
    }
}
