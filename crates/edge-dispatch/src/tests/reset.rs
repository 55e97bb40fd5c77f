//! Identity reset and persistence across restarts.

use super::harness::{handle_doc, ok, test_config, MockNetwork, TestHarness};
use crate::correlator::RESET_MARKER_KEY;
use crate::events::{EdgeEvent, RecordingDispatcher};
use crate::pipeline::{EdgePipeline, PipelineBackends, STATE_COLLECTION};
use crate::shared_state::InMemorySharedState;
use crate::store_payload::{
    StorePayload, StoreResponsePayload, STORE_PAYLOADS_COLLECTION,
};
use chrono::{Duration, Utc};
use edge_store::{Database, KeyValueStore, SqliteHitQueue, SqliteKeyValueStore};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn event() -> EdgeEvent {
    EdgeEvent::experience(json!({"eventType": "application.launch"}))
}

fn store_doc(key: &str, value: &str) -> serde_json::Value {
    handle_doc(
        "state:store",
        0,
        json!([{"key": key, "value": value, "maxAge": 3600}]),
    )
}

// =============================================================================
// Reset
// =============================================================================

#[tokio::test]
async fn reset_clears_store_payloads_and_location_hint() {
    let h = TestHarness::new();
    h.pipeline
        .store_payloads()
        .save(&[StoreResponsePayload::new(
            StorePayload {
                key: "kndctr_identity".into(),
                value: "old".into(),
                max_age: 3600,
            },
            Utc::now(),
        )])
        .unwrap();
    h.pipeline
        .handle_event(EdgeEvent::update_location_hint(Some("or2"), Some(600)));

    h.pipeline.handle_event(EdgeEvent::reset_identities());
    assert!(h.state_store.get(RESET_MARKER_KEY).unwrap().is_some());
    assert_eq!(h.pipeline.drain().await, 1);

    assert_eq!(h.network.request_count(), 0);
    assert!(h.pipeline.store_payloads().get_active().is_empty());
    assert!(h.payload_store.entries().unwrap().is_empty());
    assert!(h.pipeline.location_hint().is_none());
    assert_eq!(h.registry.last_published(), Some(json!({})));
}

#[tokio::test]
async fn reset_wins_over_responses_to_earlier_events() {
    let h = TestHarness::new();
    let now = Utc::now();

    // Queued before the reset: its store payloads belong to the old identity.
    h.pipeline
        .handle_event(event().with_timestamp(now - Duration::seconds(10)));
    h.pipeline
        .handle_event(EdgeEvent::reset_identities().with_timestamp(now - Duration::seconds(5)));
    h.pipeline.handle_event(event().with_timestamp(now));

    h.network.queue_reply(ok(store_doc("stale", "old-identity")));
    h.network.queue_reply(ok(store_doc("fresh", "new-identity")));

    assert_eq!(h.pipeline.drain().await, 3);
    assert_eq!(h.network.request_count(), 2);

    let active = h.pipeline.store_payloads().get_active();
    assert_eq!(active.keys().collect::<Vec<_>>(), vec!["fresh"]);

    // Store handles are still delivered even when not persisted.
    assert_eq!(h.dispatcher.handles().len(), 2);
}

// =============================================================================
// Restart
// =============================================================================

fn sqlite_pipeline(path: &Path, network: Arc<MockNetwork>) -> EdgePipeline {
    let db = Arc::new(Database::open(path).unwrap());
    let config = test_config();
    EdgePipeline::new(
        config.clone(),
        PipelineBackends {
            queue: Arc::new(SqliteHitQueue::new(db.clone(), &config.queue_name)),
            payload_store: Arc::new(SqliteKeyValueStore::new(
                db.clone(),
                STORE_PAYLOADS_COLLECTION,
            )),
            state_store: Arc::new(SqliteKeyValueStore::new(db, STATE_COLLECTION)),
            network,
            registry: Arc::new(InMemorySharedState::with_config_id("test-config")),
            dispatcher: Arc::new(RecordingDispatcher::new()),
        },
    )
}

#[tokio::test]
async fn queued_hits_and_state_survive_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("edge.sqlite");

    {
        let network = Arc::new(MockNetwork::new());
        network.queue_reply(ok(store_doc("kndctr_identity", "abc")));
        let pipeline = sqlite_pipeline(&path, network.clone());

        pipeline.handle_event(event());
        assert_eq!(pipeline.drain().await, 1);
        pipeline.handle_event(EdgeEvent::update_location_hint(Some("irl1"), Some(3600)));

        pipeline.handle_event(
            EdgeEvent::experience(json!({"name": "first"})),
        );
        pipeline.handle_event(
            EdgeEvent::experience(json!({"name": "second"})),
        );
        assert_eq!(pipeline.queue_len(), 2);
    }

    let network = Arc::new(MockNetwork::new());
    let pipeline = sqlite_pipeline(&path, network.clone());
    assert_eq!(pipeline.queue_len(), 2);
    assert_eq!(pipeline.location_hint().as_deref(), Some("irl1"));

    assert_eq!(pipeline.drain().await, 2);
    let requests = network.requests();
    assert_eq!(requests[0].body["events"][0]["xdm"]["name"], "first");
    assert_eq!(requests[1].body["events"][0]["xdm"]["name"], "second");
    assert_eq!(requests[0].url.path(), "/ee/irl1/v1/interact");
    assert_eq!(
        requests[0].body["meta"]["state"]["entries"][0]["value"],
        "abc"
    );
}
