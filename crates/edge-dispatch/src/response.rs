//! Edge Network response documents.
//!
//! A response is first read with `handle`, `errors` and `warnings` left as
//! raw JSON; each entry is then decoded on its own, and a malformed entry
//! never discards its siblings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Handle type carrying client-side store payloads.
pub const STORE_HANDLE: &str = "state:store";
/// Handle type carrying location hints.
pub const LOCATION_HINT_HANDLE: &str = "locationHint:result";

/// One response fragment.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeResponse {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub handle: Vec<Value>,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub warnings: Vec<Value>,
}

/// A typed piece of response content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeEventHandle {
    /// Position of the originating event in the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_index: Option<i64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub handle_type: Option<String>,
    #[serde(default)]
    pub payload: Vec<Map<String, Value>>,
}

impl EdgeEventHandle {
    pub fn is_type(&self, handle_type: &str) -> bool {
        self.handle_type.as_deref() == Some(handle_type)
    }
}

/// An error or warning reported by the Edge Network, or a transport failure
/// described in the same shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeEventError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EdgeEventError {
    /// Transport-level failure with no server-provided detail.
    pub fn global(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            namespace: Some("global".to_string()),
            ..Self::default()
        }
    }

    /// Event index, falling back to `report.eventIndex`.
    pub fn resolved_event_index(&self) -> Option<i64> {
        self.event_index.or_else(|| {
            self.report
                .as_ref()
                .and_then(|r| r.get("eventIndex"))
                .and_then(Value::as_i64)
        })
    }

    /// Best human-readable summary.
    pub fn summary(&self) -> &str {
        self.title
            .as_deref()
            .or(self.message.as_deref())
            .or(self.detail.as_deref())
            .unwrap_or("unknown error")
    }
}

/// Build the JSON body used for failures that have no server body.
pub fn global_error_body(message: &str) -> String {
    serde_json::json!({ "message": message, "namespace": "global" }).to_string()
}
