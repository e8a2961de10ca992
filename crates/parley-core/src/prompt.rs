//! Reduces inbound chat payloads to a plain-text prompt.
//!
//! Clients send either a bare string or an object such as `{"prompt": "..."}`.
//! Older clients spell the key `promt`; both are accepted.

use serde_json::Value;

use crate::errors::ChatError;

/// Object keys that carry the prompt text, in priority order.
pub const PROMPT_KEYS: [&str; 2] = ["prompt", "promt"];

/// The recognized shapes of an inbound chat payload.
#[derive(Clone, Debug, PartialEq)]
pub enum PromptPayload {
    /// The event carried no payload.
    Absent,
    /// A bare string.
    Text(String),
    /// An object with a string under one of [`PROMPT_KEYS`].
    Field { key: &'static str, text: String },
    /// Anything else, kept so it can be serialized verbatim.
    Other(Value),
}

impl PromptPayload {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            Value::String(text) => Self::Text(text),
            Value::Object(mut map) => {
                for key in PROMPT_KEYS {
                    if matches!(map.get(key), Some(Value::String(_))) {
                        if let Some(Value::String(text)) = map.remove(key) {
                            return Self::Field { key, text };
                        }
                    }
                }
                Self::Other(Value::Object(map))
            }
            other => Self::Other(other),
        }
    }
}

impl From<Option<Value>> for PromptPayload {
    fn from(value: Option<Value>) -> Self {
        value.map_or(Self::Absent, Self::from_value)
    }
}

impl From<Value> for PromptPayload {
    fn from(value: Value) -> Self {
        Self::from_value(value)
    }
}

impl From<&str> for PromptPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Map a payload to prompt text without trimming.
///
/// Unrecognized payloads become their compact JSON encoding. Object keys are
/// emitted in sorted order, so the result is deterministic.
pub fn normalize(payload: PromptPayload) -> String {
    match payload {
        PromptPayload::Absent => String::new(),
        PromptPayload::Text(text) | PromptPayload::Field { text, .. } => text,
        PromptPayload::Other(value) => value.to_string(),
    }
}

/// Normalize and trim. Fails with [`ChatError::EmptyPrompt`] if nothing is left.
pub fn prompt_from(payload: impl Into<PromptPayload>) -> Result<String, ChatError> {
    let text = normalize(payload.into());
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ChatError::EmptyPrompt);
    }
    Ok(trimmed.to_owned())
}
