//! Wire records of the notification channel.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::ChannelError;

/// Message type of the client handshake.
pub const CONNECT_MESSAGE_TYPE: &str = "connect";

/// First frame the client sends on every newly opened channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Handshake {
    pub user_id: String,
    pub message_type: String,
    pub message: String,
}

impl Handshake {
    pub fn connect(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            message_type: CONNECT_MESSAGE_TYPE.to_string(),
            message: String::new(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::json!({
            "user_id": self.user_id,
            "message_type": self.message_type,
            "message": self.message,
        })
        .to_string()
    }
}

/// One server-pushed record. The payload is opaque JSON; the accessors read
/// the backend's usual `{user_id, message_type, message}` envelope when it
/// is present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerEvent {
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl ServerEvent {
    pub fn parse(text: &str) -> Result<Self, ChannelError> {
        let payload = serde_json::from_str(text)
            .map_err(|e| ChannelError::InvalidMessage(format!("{e}: {}", preview(text))))?;
        Ok(Self {
            payload,
            received_at: Utc::now(),
        })
    }

    pub fn message_type(&self) -> Option<&str> {
        self.payload.get("message_type").and_then(Value::as_str)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.payload.get("user_id").and_then(Value::as_str)
    }

    /// The `message` field. Producers usually embed JSON as a string; that
    /// text is decoded when possible.
    pub fn message(&self) -> Option<Value> {
        match self.payload.get("message")? {
            Value::String(s) => Some(
                serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
            ),
            other => Some(other.clone()),
        }
    }
}

fn preview(text: &str) -> String {
    const MAX: usize = 80;
    if text.chars().count() <= MAX {
        text.to_string()
    } else {
        let cut: String = text.chars().take(MAX).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn handshake_wire_shape() {
        let json: Value = serde_json::from_str(&Handshake::connect("u1").to_json()).unwrap();
        assert_eq!(json, json!({"user_id": "u1", "message_type": "connect", "message": ""}));
    }

    #[test]
    fn parses_backend_envelope() {
        let event = ServerEvent::parse(
            r#"{"user_id":"u1","message_type":"add_workspace","message":"{\"id\":\"w1\",\"peer_id\":\"u1\",\"role\":\"admin\"}"}"#,
        )
        .unwrap();
        assert_eq!(event.message_type(), Some("add_workspace"));
        assert_eq!(event.user_id(), Some("u1"));
        assert_eq!(event.message().unwrap()["role"], "admin");
    }

    #[test]
    fn plain_text_message_stays_text() {
        let event = ServerEvent::parse(r#"{"message_type":"event","message":"hello"}"#).unwrap();
        assert_eq!(event.message(), Some(Value::String("hello".into())));
    }

    #[test]
    fn opaque_records_are_accepted() {
        let event = ServerEvent::parse("[1,2,3]").unwrap();
        assert!(event.message_type().is_none());
        assert!(event.message().is_none());
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let err = ServerEvent::parse("{not json").unwrap_err();
        assert!(matches!(err, ChannelError::InvalidMessage(_)));
    }
}
