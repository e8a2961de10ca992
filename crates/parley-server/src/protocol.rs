//! JSON envelopes exchanged over the WebSocket.
//!
//! Every frame is `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CHAT_EVENT: &str = "ai-message";
pub const REPLY_EVENT: &str = "ai-message:reply";
pub const ERROR_EVENT: &str = "ai-message:error";

/// An inbound frame from the browser.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ClientEvent {
    pub event: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ClientEvent {
    /// Parse a text frame. Anything that is not an envelope is taken as the
    /// payload of a chat event: parsed JSON when it is JSON, the raw text
    /// otherwise.
    pub fn parse(raw: &str) -> Self {
        if let Ok(event) = serde_json::from_str::<Self>(raw) {
            return event;
        }
        let data = serde_json::from_str::<Value>(raw)
            .unwrap_or_else(|_| Value::String(raw.to_owned()));
        Self {
            event: CHAT_EVENT.to_owned(),
            data: Some(data),
        }
    }

    pub fn is_chat(&self) -> bool {
        self.event == CHAT_EVENT
    }
}

/// An outbound frame, delivered to the sender only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "ai-message:reply")]
    Reply(String),
    #[serde(rename = "ai-message:error")]
    Error(String),
}

impl ServerEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"event":"ai-message:error","data":"Failed to generate AI response."}"#.to_owned()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_object_payload() {
        let event = ClientEvent::parse(r#"{"event":"ai-message","data":{"prompt":"hello"}}"#);
        assert!(event.is_chat());
        assert_eq!(event.data, Some(json!({"prompt": "hello"})));
    }

    #[test]
    fn parse_missing_data() {
        let event = ClientEvent::parse(r#"{"event":"ai-message"}"#);
        assert!(event.is_chat());
        assert_eq!(event.data, None);
    }

    #[test]
    fn parse_other_event() {
        let event = ClientEvent::parse(r#"{"event":"message","data":"hi all"}"#);
        assert!(!event.is_chat());
    }

    #[test]
    fn non_envelope_is_raw_prompt() {
        let event = ClientEvent::parse("just text");
        assert!(event.is_chat());
        assert_eq!(event.data, Some(json!("just text")));

        let event = ClientEvent::parse(r#"{"prompt":"no envelope"}"#);
        assert!(event.is_chat());
        assert_eq!(event.data, Some(json!({"prompt": "no envelope"})));
    }

    #[test]
    fn reply_wire_shape() {
        let json: Value = serde_json::from_str(&ServerEvent::Reply("hi".into()).to_json()).unwrap();
        assert_eq!(json, json!({"event": REPLY_EVENT, "data": "hi"}));
    }

    #[test]
    fn error_wire_shape() {
        let json: Value =
            serde_json::from_str(&ServerEvent::Error("nope".into()).to_json()).unwrap();
        assert_eq!(json, json!({"event": ERROR_EVENT, "data": "nope"}));
    }
}
