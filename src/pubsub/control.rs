//! Control message envelope: `{"type": ..., "data": ...}`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PubSubError;

/// Decoded control-topic message.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    /// Forward the payload to every connected cluster.
    Broadcast(Arc<Value>),
    /// Restart the whole fleet.
    Restart,
    /// A message type this manager does not know. Ignored.
    Unknown(String),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl ControlMessage {
    /// Parses a raw topic message.
    ///
    /// Fails on invalid JSON, a missing `type`, or a `broadcast` without `data`.
    pub fn decode(raw: &str) -> Result<Self, PubSubError> {
        let env: Envelope = serde_json::from_str(raw)?;
        match env.kind.as_str() {
            "broadcast" => env
                .data
                .map(|data| ControlMessage::Broadcast(Arc::new(data)))
                .ok_or(PubSubError::MissingData),
            "restart" => Ok(ControlMessage::Restart),
            _ => Ok(ControlMessage::Unknown(env.kind)),
        }
    }

    /// Wire form of this message.
    pub fn encode(&self) -> Result<String, PubSubError> {
        let env = match self {
            ControlMessage::Broadcast(data) => Envelope {
                kind: "broadcast".into(),
                data: Some(data.as_ref().clone()),
            },
            ControlMessage::Restart => Envelope {
                kind: "restart".into(),
                data: None,
            },
            ControlMessage::Unknown(kind) => Envelope {
                kind: kind.clone(),
                data: None,
            },
        };
        Ok(serde_json::to_string(&env)?)
    }

    /// Short name for logs.
    pub fn kind(&self) -> &str {
        match self {
            ControlMessage::Broadcast(_) => "broadcast",
            ControlMessage::Restart => "restart",
            ControlMessage::Unknown(kind) => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_decode_broadcast() {
        let msg = ControlMessage::decode(r#"{"type":"broadcast","data":{"op":"reload"}}"#)
            .expect("valid broadcast");
        assert_eq!(msg, ControlMessage::Broadcast(Arc::new(json!({ "op": "reload" }))));
    }

    #[test]
    fn test_decode_restart_ignores_data() {
        let msg = ControlMessage::decode(r#"{"type":"restart","data":1}"#).expect("valid restart");
        assert_eq!(msg, ControlMessage::Restart);
    }

    #[test]
    fn test_unknown_type_is_kept_for_logging() {
        let msg = ControlMessage::decode(r#"{"type":"stats"}"#).expect("valid envelope");
        assert_eq!(msg, ControlMessage::Unknown("stats".into()));
        assert_eq!(msg.kind(), "stats");
    }

    #[test]
    fn test_malformed_messages_are_rejected() {
        let err = ControlMessage::decode("not json").expect_err("invalid json");
        assert_eq!(err.as_label(), "pubsub_malformed");

        let err = ControlMessage::decode(r#"{"data":1}"#).expect_err("no type");
        assert_eq!(err.as_label(), "pubsub_malformed");

        let err = ControlMessage::decode(r#"{"type":"broadcast"}"#).expect_err("no data");
        assert_eq!(err.as_label(), "pubsub_missing_data");
    }

    #[test]
    fn test_restart_wire_form() {
        assert_eq!(
            ControlMessage::Restart.encode().expect("encodes"),
            r#"{"type":"restart"}"#
        );
    }
}
