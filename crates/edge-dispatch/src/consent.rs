//! Collect-consent status.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The user's collect consent.
///
/// Wire values are `"y"`, `"n"` and `"p"`. Anything else decodes to
/// [`ConsentStatus::Pending`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConsentStatus {
    Yes,
    No,
    #[default]
    Pending,
}

impl ConsentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentStatus::Yes => "y",
            ConsentStatus::No => "n",
            ConsentStatus::Pending => "p",
        }
    }

    /// Decode a raw consent value.
    pub fn from_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => ConsentStatus::Yes,
            "n" | "no" => ConsentStatus::No,
            _ => ConsentStatus::Pending,
        }
    }

    /// Read `consents.collect.val` from a consent preferences document.
    pub fn from_preferences(preferences: &Value) -> Self {
        preferences
            .pointer("/consents/collect/val")
            .and_then(Value::as_str)
            .map(Self::from_value)
            .unwrap_or_default()
    }
}

impl From<String> for ConsentStatus {
    fn from(value: String) -> Self {
        Self::from_value(&value)
    }
}

impl From<ConsentStatus> for String {
    fn from(status: ConsentStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
