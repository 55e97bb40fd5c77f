//! Pipeline assembly and event routing.

use crate::completion::{CompletionCallback, CompletionRegistry};
use crate::config::DispatchConfig;
use crate::consent::ConsentStatus;
use crate::controller::QueueController;
use crate::correlator::ResponseCorrelator;
use crate::entity::EdgeDataEntity;
use crate::events::{EdgeEvent, EventDispatcher, EventKind, OutboundEvent};
use crate::location_hint::{LocationHintManager, DEFAULT_LOCATION_HINT_TTL_SECS};
use crate::processor::HitProcessor;
use crate::shared_state::{
    EdgeConfiguration, SharedState, SharedStateRegistry, CONSENT_OWNER,
};
use crate::store_payload::{StorePayloadManager, STORE_PAYLOADS_COLLECTION};
use crate::transport::{NetworkService, ReqwestNetworkService};
use crate::{DispatchError, DispatchResult};
use edge_store::{Database, HitQueue, KeyValueStore, SqliteHitQueue, SqliteKeyValueStore};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collection holding the reset marker and location hint.
pub const STATE_COLLECTION: &str = "edge.state";

/// Storage, network and host integration for a pipeline.
pub struct PipelineBackends {
    pub queue: Arc<dyn HitQueue>,
    pub payload_store: Arc<dyn KeyValueStore>,
    pub state_store: Arc<dyn KeyValueStore>,
    pub network: Arc<dyn NetworkService>,
    pub registry: Arc<dyn SharedStateRegistry>,
    pub dispatcher: Arc<dyn EventDispatcher>,
}

impl PipelineBackends {
    /// SQLite persistence in `db` and a reqwest network client.
    pub fn sqlite(
        db: Arc<Database>,
        config: &DispatchConfig,
        registry: Arc<dyn SharedStateRegistry>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> DispatchResult<Self> {
        Ok(Self {
            queue: Arc::new(SqliteHitQueue::new(db.clone(), &config.queue_name)),
            payload_store: Arc::new(SqliteKeyValueStore::new(
                db.clone(),
                STORE_PAYLOADS_COLLECTION,
            )),
            state_store: Arc::new(SqliteKeyValueStore::new(db, STATE_COLLECTION)),
            network: Arc::new(ReqwestNetworkService::new(config.connect_timeout)?),
            registry,
            dispatcher,
        })
    }
}

/// An event waiting for configuration.
struct HeldEvent {
    event: EdgeEvent,
    callback: Option<CompletionCallback>,
}

struct Inner {
    queue: Arc<dyn HitQueue>,
    controller: QueueController,
    processor: HitProcessor,
    correlator: Arc<ResponseCorrelator>,
    completion: Arc<CompletionRegistry>,
    store_payloads: Arc<StorePayloadManager>,
    location_hint: Arc<LocationHintManager>,
    registry: Arc<dyn SharedStateRegistry>,
    dispatcher: Arc<dyn EventDispatcher>,
    held: Mutex<VecDeque<HeldEvent>>,
    wake: Arc<Notify>,
    drain_lock: tokio::sync::Mutex<()>,
}

/// The dispatch pipeline.
///
/// Inbound events are routed by [`EdgePipeline::handle_event`]. Queued hits
/// are drained one at a time, in order, by [`EdgePipeline::drain`] or the
/// background loop from [`EdgePipeline::start`]. Cloning is cheap and all
/// clones share state.
#[derive(Clone)]
pub struct EdgePipeline {
    inner: Arc<Inner>,
}

impl EdgePipeline {
    pub fn new(config: DispatchConfig, backends: PipelineBackends) -> Self {
        let PipelineBackends {
            queue,
            payload_store,
            state_store,
            network,
            registry,
            dispatcher,
        } = backends;

        let wake = Arc::new(Notify::new());
        let completion = Arc::new(CompletionRegistry::new());
        let store_payloads = Arc::new(StorePayloadManager::new(payload_store));
        let location_hint = Arc::new(LocationHintManager::new(state_store.clone()));
        let correlator = Arc::new(ResponseCorrelator::new(
            dispatcher.clone(),
            completion.clone(),
            store_payloads.clone(),
            location_hint.clone(),
            registry.clone(),
            state_store,
        ));
        let processor = HitProcessor::new(
            config,
            network,
            correlator.clone(),
            store_payloads.clone(),
            location_hint.clone(),
            registry.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                controller: QueueController::new(queue.clone(), wake.clone()),
                queue,
                processor,
                correlator,
                completion,
                store_payloads,
                location_hint,
                registry,
                dispatcher,
                held: Mutex::new(VecDeque::new()),
                wake,
                drain_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Route one inbound event. Never fails; problems are logged.
    pub fn handle_event(&self, event: EdgeEvent) {
        self.bootstrap_if_needed();
        debug!(event_id = %event.id, kind = ?event.kind, "Handling event");

        match event.kind {
            EventKind::ExperienceEvent => self.send_event(event, None),
            EventKind::ConsentUpdate => self.accept(event, None),
            EventKind::ResetIdentities => {
                self.inner.correlator.set_last_reset(event.timestamp);
                self.accept(event, None);
            }
            EventKind::ConsentPreferences => {
                let status = ConsentStatus::from_preferences(&Value::Object(event.data));
                self.inner.controller.apply(status);
            }
            EventKind::SharedStateChanged => {
                let owner = event.data_str("stateowner").unwrap_or_default().to_string();
                self.on_shared_state_changed(&owner);
            }
            EventKind::UpdateLocationHint => self.update_location_hint(&event),
            EventKind::RequestLocationHint => {
                self.inner
                    .dispatcher
                    .dispatch(OutboundEvent::LocationHintResponse {
                        parent_event_id: event.id,
                        location_hint: self.inner.location_hint.current(),
                    });
            }
        }
    }

    /// Queue an experience event.
    ///
    /// `callback` receives every handle returned for this event once its
    /// request finishes, or an empty list if the event is dropped.
    pub fn send_event(&self, event: EdgeEvent, callback: Option<CompletionCallback>) {
        if event.kind != EventKind::ExperienceEvent {
            warn!(event_id = %event.id, kind = ?event.kind, "send_event expects an experience event");
            self.handle_event(event);
            if let Some(callback) = callback {
                callback(Vec::new());
            }
            return;
        }
        self.bootstrap_if_needed();
        self.accept(event, callback);
    }

    /// Drain the queue until it is empty, suspended, or a hit asks to be
    /// retried later. Returns the number of hits processed.
    ///
    /// Concurrent callers are serialized; only one hit is ever in flight.
    pub async fn drain(&self) -> usize {
        let inner = &self.inner;
        let _guard = inner.drain_lock.lock().await;
        self.bootstrap_if_needed();

        let mut processed = 0;
        loop {
            if inner.controller.is_suspended() {
                debug!(consent = %inner.controller.consent(), "Hit queue suspended");
                break;
            }
            let record = match inner.queue.peek() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to read hit queue");
                    break;
                }
            };

            if !inner.processor.process_hit(&record).await {
                warn!(id = %record.id, "Hit kept for a later drain");
                break;
            }
            if let Err(e) = inner.queue.remove(&record.id) {
                error!(id = %record.id, error = %e, "Failed to remove processed hit");
                break;
            }
            processed += 1;
        }

        if processed > 0 {
            debug!(processed, "Drain finished");
        }
        processed
    }

    /// Spawn a task that drains whenever the pipeline is woken.
    pub fn start(&self) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            info!("Edge dispatch loop started");
            loop {
                pipeline.drain().await;
                pipeline.inner.wake.notified().await;
            }
        })
    }

    pub fn consent(&self) -> ConsentStatus {
        self.inner.controller.consent()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue.count().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to count hit queue");
            0
        })
    }

    /// Discard every queued hit.
    pub fn clear_queue(&self) -> DispatchResult<usize> {
        Ok(self.inner.queue.clear()?)
    }

    /// Events held until configuration arrives.
    pub fn held_len(&self) -> usize {
        self.inner.held.lock().len()
    }

    pub fn location_hint(&self) -> Option<String> {
        self.inner.location_hint.current()
    }

    pub fn store_payloads(&self) -> &StorePayloadManager {
        &self.inner.store_payloads
    }

    fn bootstrap_if_needed(&self) {
        let inner = &self.inner;
        if !inner.controller.is_bootstrapped() {
            inner.controller.bootstrap(inner.registry.as_ref());
        }
    }

    fn current_configuration(&self) -> Option<EdgeConfiguration> {
        self.inner
            .registry
            .configuration()
            .value()
            .and_then(EdgeConfiguration::from_shared_state)
    }

    fn current_identity_map(&self) -> Option<Value> {
        self.inner
            .registry
            .identity()
            .value()
            .and_then(|identity| identity.get("identityMap").cloned())
    }

    /// Hold the event, then queue everything held if configuration is ready.
    fn accept(&self, event: EdgeEvent, callback: Option<CompletionCallback>) {
        self.inner
            .held
            .lock()
            .push_back(HeldEvent { event, callback });
        self.flush_held();
    }

    fn flush_held(&self) {
        let inner = &self.inner;
        let Some(configuration) = self.current_configuration() else {
            debug!(held = self.held_len(), "Waiting for configuration");
            return;
        };
        let identity_map = self.current_identity_map();

        let mut rejected: Vec<CompletionCallback> = Vec::new();
        let mut failed: Vec<String> = Vec::new();
        let mut queued = 0;
        {
            let mut held = inner.held.lock();
            while let Some(HeldEvent { event, callback }) = held.pop_front() {
                if event.kind == EventKind::ExperienceEvent
                    && inner.controller.consent() == ConsentStatus::No
                {
                    debug!(event_id = %event.id, "Consent denied, ignoring experience event");
                    rejected.extend(callback);
                    continue;
                }
                if inner.completion.is_registered(&event.id) {
                    warn!(event_id = %event.id, "Event already queued, ignoring duplicate");
                    rejected.extend(callback);
                    continue;
                }

                let event_id = event.id.clone();
                if let Some(callback) = callback {
                    inner.completion.register(&event_id, callback);
                }
                let entity = EdgeDataEntity::new(event, configuration.clone(), identity_map.clone());
                let enqueued = entity
                    .to_record()
                    .and_then(|record| inner.queue.enqueue(record).map_err(DispatchError::from));
                match enqueued {
                    Ok(true) => queued += 1,
                    Ok(false) => {
                        warn!(event_id = %event_id, "Event already queued, ignoring duplicate");
                        failed.push(event_id);
                    }
                    Err(e) => {
                        error!(event_id = %event_id, error = %e, "Failed to queue event");
                        failed.push(event_id);
                    }
                }
            }
        }

        for callback in rejected {
            callback(Vec::new());
        }
        for event_id in failed {
            inner.completion.unregister(&event_id);
        }
        if queued > 0 {
            debug!(queued, "Queued events");
            inner.wake.notify_one();
        }
    }

    fn on_shared_state_changed(&self, owner: &str) {
        if owner == CONSENT_OWNER {
            if let SharedState::Set(preferences) = self.inner.registry.consent() {
                self.inner
                    .controller
                    .apply(ConsentStatus::from_preferences(&preferences));
            }
        }
        self.flush_held();
        self.inner.wake.notify_one();
    }

    fn update_location_hint(&self, event: &EdgeEvent) {
        let inner = &self.inner;
        let ttl = event
            .data
            .get("ttlSeconds")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_LOCATION_HINT_TTL_SECS);

        match event.data_str("locationHint").map(str::trim) {
            Some(hint) if !hint.is_empty() => {
                inner.location_hint.set(hint, ttl);
            }
            _ => {
                inner.location_hint.clear();
            }
        }
        inner.location_hint.publish_if_changed(inner.registry.as_ref());
    }
}
