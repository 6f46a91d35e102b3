use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

use super::utils::now_ms;

/// Kind tag of an [`Envelope`], carried on the wire as `"type"`.
///
/// The control kinds are closed; everything else is application data routed
/// by topic, so unknown tags are kept verbatim in [`EnvelopeKind::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EnvelopeKind {
    Ping,
    Pong,
    Auth,
    Subscribe,
    Unsubscribe,
    Error,
    Data,
    Other(String),
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &str {
        match self {
            EnvelopeKind::Ping => "ping",
            EnvelopeKind::Pong => "pong",
            EnvelopeKind::Auth => "auth",
            EnvelopeKind::Subscribe => "subscribe",
            EnvelopeKind::Unsubscribe => "unsubscribe",
            EnvelopeKind::Error => "error",
            EnvelopeKind::Data => "data",
            EnvelopeKind::Other(tag) => tag.as_str(),
        }
    }

    /// `true` for the kinds the client itself produces or consumes
    /// (heartbeat, auth, subscription management, errors).
    pub fn is_control(&self) -> bool {
        !matches!(self, EnvelopeKind::Data | EnvelopeKind::Other(_))
    }
}

impl From<String> for EnvelopeKind {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "ping" => EnvelopeKind::Ping,
            "pong" => EnvelopeKind::Pong,
            "auth" => EnvelopeKind::Auth,
            "subscribe" => EnvelopeKind::Subscribe,
            "unsubscribe" => EnvelopeKind::Unsubscribe,
            "error" => EnvelopeKind::Error,
            "data" => EnvelopeKind::Data,
            _ => EnvelopeKind::Other(tag),
        }
    }
}

impl From<&str> for EnvelopeKind {
    fn from(tag: &str) -> Self {
        EnvelopeKind::from(tag.to_string())
    }
}

impl From<EnvelopeKind> for String {
    fn from(kind: EnvelopeKind) -> Self {
        match kind {
            EnvelopeKind::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of wire exchange.
///
/// A reply to a correlated request echoes the request's `id` unchanged; a
/// topic push sets `topic` and leaves `id` empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Correlation identifier (request/response traffic and heartbeats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Kind tag.
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Logical topic for subscription traffic and pushes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    /// Send time in milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: u64,

    /// Application payload. Opaque to the client.
    #[serde(default)]
    pub payload: JsonValue,

    /// Error text for `error` envelopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Create an envelope of the given kind, stamped with the current time.
    pub fn new(kind: impl Into<EnvelopeKind>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            topic: None,
            timestamp: now_ms(),
            payload: JsonValue::Null,
            error: None,
        }
    }

    /// A `data` push addressed to `topic`.
    pub fn data(topic: impl Into<String>, payload: JsonValue) -> Self {
        Self::new(EnvelopeKind::Data)
            .with_topic(topic)
            .with_payload(payload)
    }

    pub fn ping(id: impl Into<String>) -> Self {
        Self::new(EnvelopeKind::Ping).with_id(id)
    }

    pub fn pong(id: Option<String>) -> Self {
        let mut env = Self::new(EnvelopeKind::Pong);
        env.id = id;
        env
    }

    pub fn auth(token: &str) -> Self {
        Self::new(EnvelopeKind::Auth).with_payload(serde_json::json!({ "token": token }))
    }

    pub fn subscribe(topic: impl Into<String>, params: Option<JsonValue>) -> Self {
        Self::new(EnvelopeKind::Subscribe)
            .with_topic(topic)
            .with_payload(params.unwrap_or(JsonValue::Null))
    }

    pub fn unsubscribe(topic: impl Into<String>, params: Option<JsonValue>) -> Self {
        Self::new(EnvelopeKind::Unsubscribe)
            .with_topic(topic)
            .with_payload(params.unwrap_or(JsonValue::Null))
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut env = Self::new(EnvelopeKind::Error);
        env.error = Some(message.into());
        env
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = payload;
        self
    }

    /// Build a reply to this envelope: same correlation id, new kind.
    pub fn reply(&self, kind: impl Into<EnvelopeKind>, payload: JsonValue) -> Self {
        let mut env = Self::new(kind).with_payload(payload);
        env.id = self.id.clone();
        env
    }

    /// Token carried by an `auth` envelope, if any.
    pub fn auth_token(&self) -> Option<&str> {
        match self.kind {
            EnvelopeKind::Auth => self.payload.get("token").and_then(JsonValue::as_str),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_tags_round_trip_through_strings() {
        assert_eq!(EnvelopeKind::from("ping"), EnvelopeKind::Ping);
        assert_eq!(EnvelopeKind::from("unsubscribe"), EnvelopeKind::Unsubscribe);
        assert_eq!(
            EnvelopeKind::from("nav_update"),
            EnvelopeKind::Other("nav_update".to_string())
        );
        assert_eq!(String::from(EnvelopeKind::Other("x".into())), "x");
        assert!(EnvelopeKind::Subscribe.is_control());
        assert!(!EnvelopeKind::Other("nav".into()).is_control());
    }

    #[test]
    fn test_topic_push_omits_correlation_id() {
        let env = Envelope::data("fund:nav", json!({"nav": 101.5}));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "data");
        assert_eq!(value["topic"], "fund:nav");
        assert!(value.get("id").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_decode_minimal_frame_uses_defaults() {
        let env: Envelope = serde_json::from_str(r#"{"type":"pong","id":"hb-1"}"#).unwrap();
        assert_eq!(env.kind, EnvelopeKind::Pong);
        assert_eq!(env.id.as_deref(), Some("hb-1"));
        assert_eq!(env.payload, JsonValue::Null);
        assert_eq!(env.timestamp, 0);
    }

    #[test]
    fn test_decode_rejects_frame_without_kind() {
        assert!(serde_json::from_str::<Envelope>(r#"{"topic":"fund:nav"}"#).is_err());
    }

    #[test]
    fn test_reply_echoes_correlation_id() {
        let request = Envelope::new("get_balance").with_id("req-42");
        let reply = request.reply("balance", json!({"amount": 10}));
        assert_eq!(reply.id.as_deref(), Some("req-42"));
        assert_eq!(reply.kind, EnvelopeKind::Other("balance".into()));
    }

    #[test]
    fn test_auth_envelope_carries_token() {
        let env = Envelope::auth("abc123");
        assert_eq!(env.auth_token(), Some("abc123"));
        assert_eq!(Envelope::new("data").auth_token(), None);
    }
}
