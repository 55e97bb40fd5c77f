//! Outbound request payloads.

use crate::entity::EdgeDataEntity;
use crate::store_payload::{StorePayload, StorePayloadManager};
use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Event data key for a per-event dataset override.
pub const DATASET_ID_KEY: &str = "datasetId";
/// Event data key for per-request overrides; never transmitted.
pub const REQUEST_KEY: &str = "request";

/// Streaming negotiation sent with every interact request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Streaming {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_feed: Option<String>,
    pub enabled: bool,
}

impl Streaming {
    /// Streaming is enabled only when both characters are present.
    pub fn new(record_separator: Option<String>, line_feed: Option<String>) -> Self {
        let enabled = record_separator.as_deref().is_some_and(|s| !s.is_empty())
            && line_feed.as_deref().is_some_and(|s| !s.is_empty());
        Self {
            record_separator,
            line_feed,
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KonductorConfig {
    pub streaming: Streaming,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateMetadata {
    pub entries: Vec<StorePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub konductor_config: Option<KonductorConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StateMetadata>,
}

/// Body of a `/v1/interact` request.
#[derive(Debug, Clone, Serialize)]
pub struct EdgeRequest {
    pub meta: RequestMetadata,
    pub xdm: Map<String, Value>,
    pub events: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOptions {
    pub operation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsentEntry {
    pub standard: String,
    pub version: String,
    pub value: Value,
}

/// Body of a `/v1/privacy/set-consent` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub meta: RequestMetadata,
    pub query: QueryOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_map: Option<Value>,
    pub consent: Vec<ConsentEntry>,
}

/// Assembles request bodies from queued entities.
pub struct RequestBuilder<'a> {
    store_payloads: &'a StorePayloadManager,
    streaming: Streaming,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(store_payloads: &'a StorePayloadManager, streaming: Streaming) -> Self {
        Self {
            store_payloads,
            streaming,
        }
    }

    pub fn streaming(&self) -> &Streaming {
        &self.streaming
    }

    /// Build an interact request. Event order in the body matches `entities`,
    /// so response `eventIndex` values map back by position.
    pub fn build_experience_request(&self, entities: &[EdgeDataEntity]) -> Option<EdgeRequest> {
        let first = entities.first()?;

        let entries = self.store_payloads.active_payloads();
        let state = (!entries.is_empty()).then_some(StateMetadata {
            entries,
            cookies_enabled: None,
        });

        let mut xdm = Map::new();
        if let Some(identity_map) = &first.identity_map {
            xdm.insert("identityMap".to_string(), identity_map.clone());
        }
        xdm.insert("implementationDetails".to_string(), implementation_details());

        Some(EdgeRequest {
            meta: RequestMetadata {
                konductor_config: Some(KonductorConfig {
                    streaming: self.streaming.clone(),
                }),
                state,
            },
            xdm,
            events: entities.iter().map(event_body).collect(),
        })
    }

    /// Build a consent request from one consent-update entity.
    ///
    /// Returns `None` when the event carries no `consents` object.
    pub fn build_consent_request(&self, entity: &EdgeDataEntity) -> Option<ConsentRequest> {
        let consents = entity
            .event
            .data
            .get("consents")
            .filter(|c| c.as_object().is_some_and(|m| !m.is_empty()))?;

        Some(ConsentRequest {
            meta: RequestMetadata {
                konductor_config: Some(KonductorConfig {
                    streaming: self.streaming.clone(),
                }),
                state: None,
            },
            query: QueryOptions {
                operation: "update".to_string(),
            },
            identity_map: entity.identity_map.clone(),
            consent: vec![ConsentEntry {
                standard: "Adobe".to_string(),
                version: "2.0".to_string(),
                value: consents.clone(),
            }],
        })
    }
}

fn implementation_details() -> Value {
    json!({
        "name": "edge-dispatch",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": "app",
    })
}

/// Shape one event for transmission.
fn event_body(entity: &EdgeDataEntity) -> Map<String, Value> {
    let event = &entity.event;
    let mut body = event.data.clone();
    body.remove(REQUEST_KEY);

    let mut xdm = match body.remove("xdm") {
        Some(Value::Object(xdm)) => xdm,
        _ => Map::new(),
    };
    let has_timestamp = xdm
        .get("timestamp")
        .and_then(Value::as_str)
        .is_some_and(|ts| !ts.trim().is_empty());
    if !has_timestamp {
        xdm.insert(
            "timestamp".to_string(),
            Value::String(event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    xdm.insert("_id".to_string(), Value::String(Uuid::new_v4().to_string()));
    body.insert("xdm".to_string(), Value::Object(xdm));

    if let Some(dataset) = body.remove(DATASET_ID_KEY) {
        let dataset = dataset.as_str().map(str::trim).unwrap_or_default();
        if !dataset.is_empty() {
            set_collect_dataset(&mut body, dataset);
        }
    }
    body
}

fn set_collect_dataset(body: &mut Map<String, Value>, dataset: &str) {
    let meta = body
        .entry("meta")
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    if let Some(meta) = meta.as_object_mut() {
        let collect = meta
            .entry("collect")
            .or_insert_with(|| Value::Object(Map::new()));
        if !collect.is_object() {
            *collect = Value::Object(Map::new());
        }
        if let Some(collect) = collect.as_object_mut() {
            collect.insert(DATASET_ID_KEY.to_string(), Value::String(dataset.to_string()));
        }
    }
}

/// Path override carried in `request.path`, if any.
pub fn request_path_override(entity: &EdgeDataEntity) -> Option<&str> {
    entity
        .event
        .data
        .get(REQUEST_KEY)
        .and_then(|r| r.get("path"))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EdgeEvent;
    use crate::shared_state::EdgeConfiguration;
    use crate::store_payload::StoreResponsePayload;
    use chrono::{TimeZone, Utc};
    use edge_store::MemoryKeyValueStore;
    use std::sync::Arc;

    fn entity(data: Value) -> EdgeDataEntity {
        let event = EdgeEvent::new(
            crate::events::EventKind::ExperienceEvent,
            data.as_object().cloned().unwrap_or_default(),
        )
        .with_timestamp(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap());
        EdgeDataEntity::new(
            event,
            EdgeConfiguration::new("cfg"),
            Some(json!({"ECID": [{"id": "ecid-1"}]})),
        )
    }

    fn manager() -> StorePayloadManager {
        StorePayloadManager::new(Arc::new(MemoryKeyValueStore::new()))
    }

    #[test]
    fn test_streaming_needs_both_characters() {
        assert!(Streaming::new(Some("\u{0000}".into()), Some("\n".into())).enabled);
        assert!(!Streaming::new(Some("\u{0000}".into()), None).enabled);
        assert!(!Streaming::new(None, Some("\n".into())).enabled);
        assert!(!Streaming::disabled().enabled);
    }

    #[test]
    fn test_empty_batch_builds_nothing() {
        let manager = manager();
        let builder = RequestBuilder::new(&manager, Streaming::disabled());
        assert!(builder.build_experience_request(&[]).is_none());
    }

    #[test]
    fn test_event_body_shaping() {
        let manager = manager();
        let builder = RequestBuilder::new(&manager, Streaming::disabled());
        let request = builder
            .build_experience_request(&[entity(json!({
                "xdm": {"eventType": "page.view"},
                "data": {"custom": 1},
                "datasetId": "ds-1",
                "request": {"path": "/va/v1/sessionstart"}
            }))])
            .unwrap();

        let body = serde_json::to_value(&request).unwrap();
        let event = &body["events"][0];
        assert_eq!(event["xdm"]["eventType"], "page.view");
        assert_eq!(event["xdm"]["timestamp"], "2024-05-01T12:00:00.000Z");
        assert!(event["xdm"]["_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(event["data"]["custom"], 1);
        assert_eq!(event["meta"]["collect"]["datasetId"], "ds-1");
        assert!(event.get("datasetId").is_none());
        assert!(event.get("request").is_none());

        assert_eq!(body["xdm"]["identityMap"]["ECID"][0]["id"], "ecid-1");
        assert_eq!(body["meta"]["konductorConfig"]["streaming"]["enabled"], false);
        assert!(body["meta"].get("state").is_none());
    }

    #[test]
    fn test_existing_timestamp_is_kept_and_xdm_is_created() {
        let manager = manager();
        let builder = RequestBuilder::new(&manager, Streaming::disabled());
        let request = builder
            .build_experience_request(&[
                entity(json!({"xdm": {"timestamp": "2020-01-01T00:00:00Z"}})),
                entity(json!({"data": {"only": "data"}})),
            ])
            .unwrap();

        assert_eq!(request.events.len(), 2);
        assert_eq!(request.events[0]["xdm"]["timestamp"], "2020-01-01T00:00:00Z");
        assert_eq!(request.events[1]["xdm"]["timestamp"], "2024-05-01T12:00:00.000Z");
        assert_ne!(request.events[0]["xdm"]["_id"], request.events[1]["xdm"]["_id"]);
    }

    #[test]
    fn test_active_store_payloads_are_attached() {
        let manager = manager();
        manager
            .save(&[StoreResponsePayload::new(
                StorePayload {
                    key: "kndctr_cluster".into(),
                    value: "or2".into(),
                    max_age: 1800,
                },
                Utc::now(),
            )])
            .unwrap();

        let builder = RequestBuilder::new(
            &manager,
            Streaming::new(Some("\u{0000}".into()), Some("\n".into())),
        );
        let body =
            serde_json::to_value(builder.build_experience_request(&[entity(json!({}))]).unwrap())
                .unwrap();

        assert_eq!(
            body["meta"]["state"]["entries"],
            json!([{"key": "kndctr_cluster", "value": "or2", "maxAge": 1800}])
        );
        assert_eq!(body["meta"]["konductorConfig"]["streaming"]["enabled"], true);
        assert_eq!(body["meta"]["konductorConfig"]["streaming"]["lineFeed"], "\n");
    }

    #[test]
    fn test_consent_request() {
        let manager = manager();
        let builder = RequestBuilder::new(&manager, Streaming::disabled());
        let consent = entity(json!({"consents": {"collect": {"val": "y"}}}));

        let body = serde_json::to_value(builder.build_consent_request(&consent).unwrap()).unwrap();
        assert_eq!(body["query"], json!({"operation": "update"}));
        assert_eq!(body["identityMap"]["ECID"][0]["id"], "ecid-1");
        assert_eq!(
            body["consent"],
            json!([{"standard": "Adobe", "version": "2.0", "value": {"collect": {"val": "y"}}}])
        );
        assert!(body["meta"].get("state").is_none());

        assert!(builder.build_consent_request(&entity(json!({}))).is_none());
        assert!(builder
            .build_consent_request(&entity(json!({"consents": {}})))
            .is_none());
    }

    #[test]
    fn test_request_path_override() {
        let with_path = entity(json!({"request": {"path": "/va/v1/sessionstart"}}));
        assert_eq!(request_path_override(&with_path), Some("/va/v1/sessionstart"));
        assert!(request_path_override(&entity(json!({}))).is_none());
    }
}
