//! Read-only view of other components' published state.
//!
//! The pipeline reads configuration, identity and consent from here and
//! publishes its own location hint state back.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Shared-state owner name for configuration.
pub const CONFIGURATION_OWNER: &str = "configuration";
/// Shared-state owner name for identity.
pub const IDENTITY_OWNER: &str = "identity";
/// Shared-state owner name for consent.
pub const CONSENT_OWNER: &str = "consent";

/// Status of one component's published state.
#[derive(Debug, Clone, PartialEq)]
pub enum SharedState<T> {
    /// The component published a value.
    Set(T),
    /// The component is registered but has not published yet.
    Pending,
    /// No such component.
    Unregistered,
}

impl<T> SharedState<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            SharedState::Set(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            SharedState::Set(value) => Some(value),
            _ => None,
        }
    }
}

/// Edge Network environment selected by `edge.environment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeEnvironment {
    #[default]
    Prod,
    PreProd,
    Int,
}

impl EdgeEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeEnvironment::Prod => "prod",
            EdgeEnvironment::PreProd => "pre-prod",
            EdgeEnvironment::Int => "int",
        }
    }
}

impl From<String> for EdgeEnvironment {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pre-prod" => EdgeEnvironment::PreProd,
            "int" => EdgeEnvironment::Int,
            _ => EdgeEnvironment::Prod,
        }
    }
}

impl From<EdgeEnvironment> for String {
    fn from(env: EdgeEnvironment) -> Self {
        env.as_str().to_string()
    }
}

/// Edge settings taken from the configuration shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeConfiguration {
    #[serde(rename = "edge.configId")]
    pub config_id: String,
    #[serde(rename = "edge.environment", default)]
    pub environment: EdgeEnvironment,
    #[serde(rename = "edge.domain", default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(
        rename = "edge.validationToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub validation_token: Option<String>,
}

impl EdgeConfiguration {
    pub fn new(config_id: impl Into<String>) -> Self {
        Self {
            config_id: config_id.into(),
            environment: EdgeEnvironment::Prod,
            domain: None,
            validation_token: None,
        }
    }

    /// Extract Edge settings from a configuration document.
    ///
    /// Returns `None` when `edge.configId` is missing or blank.
    pub fn from_shared_state(state: &Value) -> Option<Self> {
        let config: EdgeConfiguration = serde_json::from_value(state.clone()).ok()?;
        if config.config_id.trim().is_empty() {
            return None;
        }
        Some(config)
    }
}

/// Access to other components' shared state.
pub trait SharedStateRegistry: Send + Sync {
    /// Latest configuration document.
    fn configuration(&self) -> SharedState<Value>;

    /// Latest identity document, holding an `identityMap`.
    fn identity(&self) -> SharedState<Value>;

    /// Latest consent preferences document.
    fn consent(&self) -> SharedState<Value>;

    /// Publish this pipeline's own state.
    fn publish(&self, state: Value);
}

/// Shared state held in memory, set directly by the host.
pub struct InMemorySharedState {
    configuration: RwLock<SharedState<Value>>,
    identity: RwLock<SharedState<Value>>,
    consent: RwLock<SharedState<Value>>,
    published: Mutex<Vec<Value>>,
}

impl Default for InMemorySharedState {
    fn default() -> Self {
        Self {
            configuration: RwLock::new(SharedState::Pending),
            identity: RwLock::new(SharedState::Unregistered),
            consent: RwLock::new(SharedState::Unregistered),
            published: Mutex::new(Vec::new()),
        }
    }
}

impl InMemorySharedState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared state with a ready Edge configuration.
    pub fn with_config_id(config_id: &str) -> Self {
        let state = Self::new();
        state.set_configuration(SharedState::Set(json!({ "edge.configId": config_id })));
        state
    }

    pub fn set_configuration(&self, state: SharedState<Value>) {
        *self.configuration.write() = state;
    }

    pub fn set_identity(&self, state: SharedState<Value>) {
        *self.identity.write() = state;
    }

    pub fn set_consent(&self, state: SharedState<Value>) {
        *self.consent.write() = state;
    }

    /// Every state published so far, oldest first.
    pub fn published(&self) -> Vec<Value> {
        self.published.lock().clone()
    }

    pub fn last_published(&self) -> Option<Value> {
        self.published.lock().last().cloned()
    }
}

impl SharedStateRegistry for InMemorySharedState {
    fn configuration(&self) -> SharedState<Value> {
        self.configuration.read().clone()
    }

    fn identity(&self) -> SharedState<Value> {
        self.identity.read().clone()
    }

    fn consent(&self) -> SharedState<Value> {
        self.consent.read().clone()
    }

    fn publish(&self, state: Value) {
        self.published.lock().push(state);
    }
}
