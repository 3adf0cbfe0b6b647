use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::position::Position;
use crate::value_objects::{CourierId, DeliveryId, PositionId, Timestamp};

pub const LOCATION_UPDATED_EVENT: &str = "location.updated";
pub const LOCATION_UPDATED_ROUTING_KEY: &str = "tracking.location.updated";

/// 事件信封
///
/// `id` 在一次发布的所有重试之间保持不变，供消费方按至少一次语义去重。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub event_type: String,
    pub source: String,
    pub timestamp: Timestamp,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

impl EventEnvelope {
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        timestamp: Timestamp,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            source: source.into(),
            timestamp,
            payload,
            trace_id: None,
            span_id: None,
        }
    }

    pub fn with_trace(mut self, trace_id: Option<String>, span_id: Option<String>) -> Self {
        self.trace_id = trace_id;
        self.span_id = span_id;
        self
    }
}

/// "位置已更新"事件负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdated {
    pub position_id: PositionId,
    pub delivery_id: DeliveryId,
    pub courier_id: CourierId,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_at: Timestamp,
    pub recorded_at: Timestamp,
}

impl From<&Position> for LocationUpdated {
    fn from(position: &Position) -> Self {
        Self {
            position_id: position.id,
            delivery_id: position.delivery_id,
            courier_id: position.courier_id,
            latitude: position.latitude,
            longitude: position.longitude,
            observed_at: position.observed_at,
            recorded_at: position.recorded_at,
        }
    }
}

impl LocationUpdated {
    pub fn into_envelope(
        self,
        source: impl Into<String>,
        timestamp: Timestamp,
    ) -> Result<EventEnvelope, serde_json::Error> {
        let payload = serde_json::to_value(&self)?;
        Ok(EventEnvelope::new(
            LOCATION_UPDATED_EVENT,
            source,
            timestamp,
            payload,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn envelope_carries_location_payload() {
        let now = Utc::now();
        let position =
            Position::new(DeliveryId::new(5), CourierId::new(8), 10.0, 20.0, now).unwrap();

        let envelope = LocationUpdated::from(&position)
            .into_envelope("tracking-service", now)
            .unwrap();

        assert_eq!(envelope.event_type, LOCATION_UPDATED_EVENT);
        assert_eq!(envelope.source, "tracking-service");
        assert_eq!(envelope.payload["delivery_id"], 5);
        assert_eq!(envelope.payload["courier_id"], 8);
        assert!(envelope.trace_id.is_none());
    }

    #[test]
    fn trace_fields_are_omitted_when_absent() {
        let envelope = EventEnvelope::new("x", "y", Utc::now(), serde_json::json!({}));
        let json = serde_json::to_value(&envelope).unwrap();
        assert!(json.get("trace_id").is_none());

        let traced = envelope.with_trace(Some("abc".into()), Some("def".into()));
        let json = serde_json::to_value(&traced).unwrap();
        assert_eq!(json["trace_id"], "abc");
        assert_eq!(json["span_id"], "def");
    }
}
