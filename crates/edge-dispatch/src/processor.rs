//! Turns one queued hit into a network exchange.

use crate::config::DispatchConfig;
use crate::correlator::{ResponseCorrelator, WaitingEvent};
use crate::endpoint::{endpoint_url, EdgeRequestType};
use crate::entity::EdgeDataEntity;
use crate::events::EventKind;
use crate::location_hint::LocationHintManager;
use crate::request::{request_path_override, RequestBuilder, Streaming};
use crate::shared_state::{EdgeConfiguration, SharedStateRegistry};
use crate::store_payload::StorePayloadManager;
use crate::transport::{EdgeNetworkService, NetworkService, ResponseCallback, RetryDecision};
use edge_store::QueuedRecord;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Header carrying the optional validation token.
pub const VALIDATION_TOKEN_HEADER: &str = "X-Adobe-AEP-Validation-Token";

/// Forwards transport callbacks to the correlator for one request.
struct CorrelatingCallback<'a> {
    request_id: &'a str,
    correlator: &'a ResponseCorrelator,
}

impl ResponseCallback for CorrelatingCallback<'_> {
    fn on_response(&self, content: &str) {
        self.correlator.process_response(content, self.request_id);
    }

    fn on_error(&self, content: &str) {
        self.correlator.process_error(content, self.request_id);
    }

    fn on_complete(&self) {
        let completed = self.correlator.complete(self.request_id);
        debug!(request_id = self.request_id, events = completed.len(), "Request complete");
    }
}

/// Processes hits one at a time.
pub struct HitProcessor {
    config: DispatchConfig,
    network: EdgeNetworkService,
    correlator: Arc<ResponseCorrelator>,
    store_payloads: Arc<StorePayloadManager>,
    location_hint: Arc<LocationHintManager>,
    registry: Arc<dyn SharedStateRegistry>,
}

impl HitProcessor {
    pub fn new(
        config: DispatchConfig,
        network: Arc<dyn NetworkService>,
        correlator: Arc<ResponseCorrelator>,
        store_payloads: Arc<StorePayloadManager>,
        location_hint: Arc<LocationHintManager>,
        registry: Arc<dyn SharedStateRegistry>,
    ) -> Self {
        let network =
            EdgeNetworkService::new(network, config.connect_timeout, config.read_timeout);
        Self {
            config,
            network,
            correlator,
            store_payloads,
            location_hint,
            registry,
        }
    }

    fn streaming(&self) -> Streaming {
        Streaming::new(
            self.config.record_separator.clone(),
            self.config.line_feed.clone(),
        )
    }

    /// Process one hit.
    ///
    /// Returns true when the hit is finished and may leave the queue, and
    /// false when it must stay at the head for the next drain.
    pub async fn process_hit(&self, record: &QueuedRecord) -> bool {
        let entity = match EdgeDataEntity::from_record(record) {
            Ok(entity) => entity,
            Err(e) => {
                error!(error = %e, "Dropping unreadable hit");
                return true;
            }
        };

        match entity.event.kind {
            EventKind::ExperienceEvent => self.process_experience(&entity).await,
            EventKind::ConsentUpdate => self.process_consent(&entity).await,
            EventKind::ResetIdentities => self.process_reset(),
            kind => {
                warn!(?kind, id = %record.id, "Dropping hit of unexpected kind");
                true
            }
        }
    }

    async fn process_experience(&self, entity: &EdgeDataEntity) -> bool {
        let builder = RequestBuilder::new(&self.store_payloads, self.streaming());
        let Some(request) = builder.build_experience_request(std::slice::from_ref(entity)) else {
            warn!(event_id = %entity.event.id, "Nothing to send for experience event");
            return true;
        };

        self.send(
            EdgeRequestType::Interact,
            entity,
            request_path_override(entity),
            &request,
        )
        .await
    }

    async fn process_consent(&self, entity: &EdgeDataEntity) -> bool {
        let builder = RequestBuilder::new(&self.store_payloads, self.streaming());
        let Some(request) = builder.build_consent_request(entity) else {
            warn!(event_id = %entity.event.id, "Consent update has no consents, dropping");
            return true;
        };

        self.send(EdgeRequestType::Consent, entity, None, &request).await
    }

    fn process_reset(&self) -> bool {
        match self.store_payloads.delete_all() {
            Ok(removed) => info!(removed, "Cleared store payloads after identity reset"),
            Err(e) => {
                error!(error = %e, "Failed to clear store payloads, keeping reset queued");
                return false;
            }
        }
        self.location_hint.clear();
        self.location_hint.publish_if_changed(self.registry.as_ref());
        true
    }

    /// Send a request, retrying in place while the server asks for it.
    ///
    /// The transport runs at most `retry_times` times. When attempts run
    /// out the request is completed here and the hit advances.
    async fn send<B>(
        &self,
        request_type: EdgeRequestType,
        entity: &EdgeDataEntity,
        path_override: Option<&str>,
        body: &B,
    ) -> bool
    where
        B: Serialize + Sync,
    {
        self.location_hint.publish_if_changed(self.registry.as_ref());
        let location_hint = self.location_hint.current();
        let request_id = Uuid::new_v4().to_string();

        let url = match endpoint_url(
            request_type,
            &entity.configuration,
            location_hint.as_deref(),
            path_override,
            &request_id,
        ) {
            Ok(url) => url,
            Err(e) => {
                error!(error = %e, event_id = %entity.event.id, "Failed to build endpoint, dropping hit");
                return true;
            }
        };

        self.correlator
            .add_waiting_events(&request_id, vec![WaitingEvent::from(&entity.event)]);
        let callback = CorrelatingCallback {
            request_id: &request_id,
            correlator: &self.correlator,
        };
        let headers = request_headers(&entity.configuration);
        let streaming = self.streaming();

        let attempts = self.config.retry_times.max(1);
        for attempt in 1..=attempts {
            match self
                .network
                .do_request(&url, body, &headers, &streaming, &callback)
                .await
            {
                RetryDecision::Done => return true,
                RetryDecision::Retry { retry_after } => {
                    if attempt == attempts {
                        break;
                    }
                    let delay = retry_after.unwrap_or(self.config.retry_interval);
                    warn!(
                        request_id = %request_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        error!(request_id = %request_id, attempts, "Retries exhausted, giving up on hit");
        callback.on_complete();
        true
    }
}

fn request_headers(configuration: &EdgeConfiguration) -> Vec<(String, String)> {
    let mut headers = vec![
        ("accept".to_string(), "application/json".to_string()),
        ("content-type".to_string(), "application/json".to_string()),
    ];
    if let Some(token) = configuration
        .validation_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
    {
        headers.push((VALIDATION_TOKEN_HEADER.to_string(), token.to_string()));
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_headers() {
        let mut configuration = EdgeConfiguration::new("cfg");
        let headers = request_headers(&configuration);
        assert_eq!(headers.len(), 2);
        assert!(headers.contains(&("accept".to_string(), "application/json".to_string())));

        configuration.validation_token = Some("token-1".to_string());
        let headers = request_headers(&configuration);
        assert_eq!(
            headers.last(),
            Some(&(VALIDATION_TOKEN_HEADER.to_string(), "token-1".to_string()))
        );
    }
}
