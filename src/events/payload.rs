//! Schema-free event payloads with typed accessors.
//!
//! Payloads stay an open key→value map at the transport boundary; handlers
//! validate the keys they care about through the accessors here rather than
//! through a per-event schema.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default delivery channel stamped on payloads that don't carry one.
pub const DEFAULT_CHANNEL: &str = "chat";

/// Untyped key→value payload carried by every event envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPayload(Map<String, Value>);

impl EventPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert for envelope constructors.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// String-valued field, if present and actually a string.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Integer-valued field, if present and actually a number.
    pub fn i64_field(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    /// Object-valued field, if present and actually a map.
    pub fn object_field(&self, key: &str) -> Option<&Map<String, Value>> {
        self.0.get(key).and_then(Value::as_object)
    }

    /// Free-text body of the event (`""` when absent).
    pub fn text(&self) -> &str {
        self.str_field("text").unwrap_or("")
    }

    /// Delivery channel the event arrived on, falling back to the default.
    pub fn channel(&self) -> &str {
        self.str_field("channel").unwrap_or(DEFAULT_CHANNEL)
    }
}

impl From<Map<String, Value>> for EventPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_accessors() {
        let payload = EventPayload::new()
            .with("text", "hello")
            .with("channel", "sms")
            .with("days_since_anchor", 14);

        assert_eq!(payload.text(), "hello");
        assert_eq!(payload.channel(), "sms");
        assert_eq!(payload.i64_field("days_since_anchor"), Some(14));
        assert_eq!(payload.str_field("missing"), None);
    }

    #[test]
    fn test_channel_default() {
        let payload = EventPayload::new();
        assert_eq!(payload.channel(), DEFAULT_CHANNEL);
        assert_eq!(payload.text(), "");
    }

    #[test]
    fn test_transparent_serde() {
        let payload = EventPayload::new().with("text", "hi");
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"text": "hi"}));
    }
}
