//! Queued hit payload.

use crate::events::EdgeEvent;
use crate::shared_state::EdgeConfiguration;
use crate::{DispatchError, DispatchResult};
use edge_store::QueuedRecord;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event together with the configuration and identities that were
/// current when it was queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDataEntity {
    pub event: EdgeEvent,
    pub configuration: EdgeConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_map: Option<Value>,
}

impl EdgeDataEntity {
    pub fn new(
        event: EdgeEvent,
        configuration: EdgeConfiguration,
        identity_map: Option<Value>,
    ) -> Self {
        Self {
            event,
            configuration,
            identity_map,
        }
    }

    /// Encode as a queue record keyed by the event id.
    pub fn to_record(&self) -> DispatchResult<QueuedRecord> {
        let payload = serde_json::to_vec(self)?;
        Ok(QueuedRecord::new(
            self.event.id.clone(),
            self.event.timestamp,
            payload,
        ))
    }

    pub fn from_record(record: &QueuedRecord) -> DispatchResult<Self> {
        serde_json::from_slice(&record.payload).map_err(|e| DispatchError::InvalidRecord {
            id: record.id.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_record_keeps_event_identity() {
        let event = EdgeEvent::experience(json!({"eventType": "commerce.purchases"}));
        let entity = EdgeDataEntity::new(
            event.clone(),
            EdgeConfiguration::new("cfg"),
            Some(json!({"ECID": [{"id": "123"}]})),
        );

        let record = entity.to_record().unwrap();
        assert_eq!(record.id, event.id);
        assert_eq!(record.timestamp, event.timestamp);
        assert_eq!(EdgeDataEntity::from_record(&record).unwrap(), entity);
    }

    #[test]
    fn test_garbage_record_is_rejected() {
        let record = QueuedRecord::new("bad", Utc::now(), b"not json".to_vec());
        match EdgeDataEntity::from_record(&record) {
            Err(DispatchError::InvalidRecord { id, .. }) => assert_eq!(id, "bad"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
