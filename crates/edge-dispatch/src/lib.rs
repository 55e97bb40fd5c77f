//! Consent-gated, durable dispatch of experience events to the Edge Network.
//!
//! This crate provides:
//! - EdgePipeline: routes host events, queues hits and drains them in order
//! - QueueController: consent state machine gating the hit queue
//! - HitProcessor / EdgeNetworkService: request building, sending and retry
//! - ResponseCorrelator: maps response content back to originating events
//! - StorePayloadManager / LocationHintManager: TTL-bound persisted state

mod completion;
mod config;
mod consent;
mod controller;
mod correlator;
mod endpoint;
mod entity;
mod error;
mod events;
mod location_hint;
mod pipeline;
mod processor;
mod request;
mod response;
mod shared_state;
mod store_payload;
mod transport;

#[cfg(test)]
mod tests;

pub use completion::{CompletionCallback, CompletionRegistry};
pub use config::DispatchConfig;
pub use consent::ConsentStatus;
pub use controller::QueueController;
pub use correlator::{extract_request_event_id, ResponseCorrelator, WaitingEvent, RESET_MARKER_KEY};
pub use endpoint::{endpoint_url, is_valid_path_override, EdgeRequestType, DEFAULT_DOMAIN};
pub use entity::EdgeDataEntity;
pub use error::{DispatchError, DispatchResult};
pub use events::{
    EdgeEvent, EventDispatcher, EventKind, NullDispatcher, OutboundEvent, RecordingDispatcher,
};
pub use location_hint::{LocationHintManager, DEFAULT_LOCATION_HINT_TTL_SECS};
pub use pipeline::{EdgePipeline, PipelineBackends, STATE_COLLECTION};
pub use processor::{HitProcessor, VALIDATION_TOKEN_HEADER};
pub use request::{
    ConsentRequest, EdgeRequest, RequestBuilder, RequestMetadata, Streaming,
};
pub use response::{
    EdgeEventError, EdgeEventHandle, EdgeResponse, LOCATION_HINT_HANDLE, STORE_HANDLE,
};
pub use shared_state::{
    EdgeConfiguration, EdgeEnvironment, InMemorySharedState, SharedState, SharedStateRegistry,
    CONFIGURATION_OWNER, CONSENT_OWNER, IDENTITY_OWNER,
};
pub use store_payload::{
    StorePayload, StorePayloadManager, StoreResponsePayload, STORE_PAYLOADS_COLLECTION,
};
pub use transport::{
    EdgeNetworkService, HttpResponse, NetworkRequest, NetworkService, ReqwestNetworkService,
    ResponseCallback, RetryDecision, RECOVERABLE_STATUS_CODES,
};
