//! Push protocol envelopes.
//!
//! Every frame in either direction is a JSON object `{type, data, timestamp}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MonitorError, MonitorResult};
use crate::realtime::filter::FilterPatch;
use crate::tracking::unix_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Subscribe,
    Unsubscribe,
    Ping,
    Pong,
    GetStats,
    StatsUpdate,
    TaskUpdate,
    RequestUpdate,
}

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub timestamp: u64,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: MessageType, data: &T) -> MonitorResult<Self> {
        Ok(Self {
            kind,
            data: serde_json::to_value(data)?,
            timestamp: unix_millis(),
        })
    }

    pub fn pong() -> Self {
        Self {
            kind: MessageType::Pong,
            data: Value::String("pong".to_string()),
            timestamp: unix_millis(),
        }
    }

    pub fn to_json(&self) -> MonitorResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A client→server message after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Subscribe(FilterPatch),
    Unsubscribe,
    Ping,
    GetStats,
}

/// Raw inbound frame; `type` is kept as text so unknown types can be reported.
#[derive(Deserialize)]
struct Inbound {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl ControlMessage {
    /// Parse a text frame from a subscriber.
    pub fn parse(text: &str) -> MonitorResult<Self> {
        let inbound: Inbound =
            serde_json::from_str(text).map_err(|e| MonitorError::MalformedMessage(e.to_string()))?;

        match inbound.kind.as_str() {
            "subscribe" => {
                let patch = if inbound.data.is_null() {
                    FilterPatch::default()
                } else {
                    serde_json::from_value(inbound.data)
                        .map_err(|e| MonitorError::MalformedMessage(format!("invalid filter: {e}")))?
                };
                Ok(ControlMessage::Subscribe(patch))
            }
            "unsubscribe" => Ok(ControlMessage::Unsubscribe),
            "ping" => Ok(ControlMessage::Ping),
            "get_stats" => Ok(ControlMessage::GetStats),
            other => Err(MonitorError::MalformedMessage(format!(
                "unsupported message type '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_shape() {
        let envelope = Envelope::new(MessageType::StatsUpdate, &serde_json::json!({"a": 1})).unwrap();
        let json: Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "stats_update");
        assert_eq!(json["data"]["a"], 1);
        assert!(json["timestamp"].as_u64().unwrap() > 0);
    }

    #[test]
    fn test_parse_subscribe() {
        let msg = ControlMessage::parse(
            r#"{"type":"subscribe","data":{"subscribe_tasks":true,"task_status":["failed"]}}"#,
        )
        .unwrap();
        match msg {
            ControlMessage::Subscribe(patch) => {
                assert_eq!(patch.subscribe_tasks, Some(true));
                assert_eq!(patch.task_status.map(|s| s.len()), Some(1));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            ControlMessage::parse("not json"),
            Err(MonitorError::MalformedMessage(_))
        ));
        assert!(matches!(
            ControlMessage::parse(r#"{"type":"launch"}"#),
            Err(MonitorError::MalformedMessage(_))
        ));
        assert!(matches!(
            ControlMessage::parse(r#"{"type":"subscribe","data":{"task_status":"oops"}}"#),
            Err(MonitorError::MalformedMessage(_))
        ));
        assert_eq!(ControlMessage::parse(r#"{"type":"ping"}"#).unwrap(), ControlMessage::Ping);
    }
}
