//! FIFO delivery, response correlation, readiness holding and request shaping.

use super::harness::{capture_completion, handle_doc, ok, TestHarness};
use crate::completion::CompletionRegistry;
use crate::correlator::{ResponseCorrelator, WaitingEvent};
use crate::entity::EdgeDataEntity;
use crate::events::{EdgeEvent, RecordingDispatcher};
use crate::location_hint::LocationHintManager;
use crate::request::{RequestBuilder, Streaming};
use crate::shared_state::{
    EdgeConfiguration, InMemorySharedState, SharedState, CONFIGURATION_OWNER,
};
use crate::store_payload::StorePayloadManager;
use chrono::Utc;
use edge_store::{HitQueue, MemoryKeyValueStore, QueuedRecord};
use serde_json::{json, Value};
use std::sync::Arc;

fn page_view(name: &str) -> EdgeEvent {
    EdgeEvent::experience(json!({"eventType": "web.webpagedetails.pageViews", "name": name}))
}

// =============================================================================
// Delivery order
// =============================================================================

#[tokio::test]
async fn hits_are_sent_in_enqueue_order() {
    let h = TestHarness::new();
    for name in ["first", "second", "third"] {
        h.pipeline.handle_event(page_view(name));
    }
    assert_eq!(h.queued(), 3);

    assert_eq!(h.pipeline.drain().await, 3);

    let names: Vec<String> = h
        .network
        .requests()
        .iter()
        .map(|r| r.body["events"][0]["xdm"]["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["first", "second", "third"]);
    assert_eq!(h.queued(), 0);
}

#[tokio::test]
async fn concurrent_drains_send_each_hit_once() {
    let h = TestHarness::new();
    for i in 0..5 {
        h.pipeline.handle_event(page_view(&format!("e{}", i)));
    }

    let (a, b) = tokio::join!(h.pipeline.drain(), h.pipeline.drain());
    assert_eq!(a + b, 5);
    assert_eq!(h.network.request_count(), 5);
}

#[tokio::test]
async fn every_request_gets_a_fresh_request_id() {
    let h = TestHarness::new();
    h.pipeline.handle_event(page_view("a"));
    h.pipeline.handle_event(page_view("b"));
    h.pipeline.drain().await;

    let requests = h.network.requests();
    let first = requests[0].query("requestId").unwrap();
    let second = requests[1].query("requestId").unwrap();
    assert_ne!(first, second);
    assert_eq!(requests[0].query("configId").as_deref(), Some("test-config"));
}

#[tokio::test]
async fn unreadable_hit_is_dropped_without_stalling() {
    let h = TestHarness::new();
    h.queue
        .enqueue(QueuedRecord::new("poison", Utc::now(), b"{broken".to_vec()))
        .unwrap();
    h.pipeline.handle_event(page_view("after"));

    assert_eq!(h.pipeline.drain().await, 2);
    assert_eq!(h.network.request_count(), 1);
    assert_eq!(h.queued(), 0);
}

// =============================================================================
// Correlation
// =============================================================================

#[test]
fn batched_request_maps_handles_back_by_position() {
    let first = page_view("e1");
    let second = page_view("e2");
    let entities: Vec<EdgeDataEntity> = [&first, &second]
        .into_iter()
        .map(|event| EdgeDataEntity::new(event.clone(), EdgeConfiguration::new("cfg"), None))
        .collect();

    let store_payloads = Arc::new(StorePayloadManager::new(Arc::new(MemoryKeyValueStore::new())));
    let request = RequestBuilder::new(&store_payloads, Streaming::disabled())
        .build_experience_request(&entities)
        .unwrap();
    let wire: Value = serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
    assert_eq!(wire["events"][0]["xdm"]["name"], "e1");
    assert_eq!(wire["events"][1]["xdm"]["name"], "e2");

    let dispatcher = Arc::new(RecordingDispatcher::new());
    let correlator = ResponseCorrelator::new(
        dispatcher.clone(),
        Arc::new(CompletionRegistry::new()),
        store_payloads,
        Arc::new(LocationHintManager::new(Arc::new(MemoryKeyValueStore::new()))),
        Arc::new(InMemorySharedState::with_config_id("cfg")),
        Arc::new(MemoryKeyValueStore::new()),
    );
    correlator.add_waiting_events(
        "batch",
        entities.iter().map(|e| WaitingEvent::from(&e.event)).collect(),
    );

    let response = json!({"handle": [
        {"type": "personalization:decisions", "eventIndex": 1, "payload": []},
        {"type": "personalization:decisions", "eventIndex": 0, "payload": []}
    ]});
    correlator.process_response(&response.to_string(), "batch");

    let resolved: Vec<Option<String>> = dispatcher.handles().into_iter().map(|(id, _)| id).collect();
    assert_eq!(resolved, vec![Some(second.id.clone()), Some(first.id.clone())]);
}

#[tokio::test]
async fn handles_reach_the_originating_event() {
    let h = TestHarness::new();
    let event = page_view("decisions");
    let event_id = event.id.clone();
    let (callback, calls) = capture_completion();

    h.network.queue_reply(ok(handle_doc(
        "personalization:decisions",
        0,
        json!([{"id": "offer-1"}]),
    )));
    h.pipeline.send_event(event, Some(callback));
    h.pipeline.drain().await;

    let handles = h.dispatcher.handles();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].0.as_deref(), Some(event_id.as_str()));

    let calls = calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 1);
    assert_eq!(
        calls[0][0].handle_type.as_deref(),
        Some("personalization:decisions")
    );
}

#[tokio::test]
async fn completion_fires_once_even_without_content() {
    let h = TestHarness::new();
    let (callback, calls) = capture_completion();

    h.pipeline.send_event(page_view("quiet"), Some(callback));
    h.pipeline.drain().await;
    h.pipeline.drain().await;

    assert_eq!(*calls.lock(), vec![Vec::new()]);
}

#[tokio::test]
async fn out_of_range_index_is_dispatched_uncorrelated() {
    let h = TestHarness::new();
    h.network
        .queue_reply(ok(handle_doc("identity:result", 4, json!([]))));
    h.pipeline.handle_event(page_view("one"));
    h.pipeline.drain().await;

    let handles = h.dispatcher.handles();
    assert_eq!(handles.len(), 1);
    assert!(handles[0].0.is_none());
}

// =============================================================================
// Readiness
// =============================================================================

#[tokio::test]
async fn events_wait_for_configuration() {
    let registry = Arc::new(InMemorySharedState::new());
    let h = TestHarness::with_registry(registry.clone());

    h.pipeline.handle_event(page_view("early"));
    h.pipeline.handle_event(page_view("later"));
    assert_eq!(h.pipeline.held_len(), 2);
    assert_eq!(h.queued(), 0);
    assert_eq!(h.pipeline.drain().await, 0);

    registry.set_configuration(SharedState::Set(json!({
        "edge.configId": "late-config",
        "edge.environment": "pre-prod"
    })));
    h.pipeline
        .handle_event(EdgeEvent::shared_state_changed(CONFIGURATION_OWNER));
    assert_eq!(h.pipeline.held_len(), 0);
    assert_eq!(h.queued(), 2);

    h.pipeline.drain().await;
    let requests = h.network.requests();
    assert_eq!(requests[0].body["events"][0]["xdm"]["name"], "early");
    assert_eq!(requests[1].body["events"][0]["xdm"]["name"], "later");
    assert_eq!(requests[0].url.path(), "/ee-pre-prd/v1/interact");
    assert_eq!(requests[0].query("configId").as_deref(), Some("late-config"));
}

// =============================================================================
// Request shaping
// =============================================================================

#[tokio::test]
async fn identity_and_overrides_are_applied() {
    let registry = Arc::new(InMemorySharedState::new());
    registry.set_configuration(SharedState::Set(json!({
        "edge.configId": "cfg",
        "edge.validationToken": "token-1"
    })));
    registry.set_identity(SharedState::Set(json!({
        "identityMap": {"ECID": [{"id": "ecid-1", "primary": true}]}
    })));
    let h = TestHarness::with_registry(registry);

    let mut event = page_view("media");
    event.data.insert("datasetId".into(), json!("dataset-9"));
    event
        .data
        .insert("request".into(), json!({"path": "/va/v1/sessionstart"}));
    h.pipeline.handle_event(event);
    h.pipeline.drain().await;

    let request = &h.network.requests()[0];
    assert_eq!(request.url.path(), "/ee/va/v1/sessionstart");
    assert_eq!(request.header("X-Adobe-AEP-Validation-Token"), Some("token-1"));
    assert_eq!(request.header("content-type"), Some("application/json"));
    assert_eq!(request.body["xdm"]["identityMap"]["ECID"][0]["id"], "ecid-1");

    let sent = &request.body["events"][0];
    assert_eq!(sent["meta"]["collect"]["datasetId"], "dataset-9");
    assert!(sent.get("request").is_none());
    assert!(sent.get("datasetId").is_none());
    assert!(sent["xdm"]["_id"].is_string());
    assert!(sent["xdm"]["timestamp"].is_string());
}
