//! Decoded AMI messages

use crate::constants::EVENTS_TO_FOLLOW;
use crate::event::AmiEvent;
use crate::headers::AmiHeader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Key/value payload of a stanza. Keys are unique; the last occurrence of a
/// key within one stanza wins.
pub type Fields = HashMap<String, String>;

fn lookup<'a>(fields: &'a Fields, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .map(|s| s.as_str())
}

/// Reply to an action (`Response: Success`, `Response: Follows`, `Response: Goodbye`).
///
/// `text_body` is only set for the follows framing, `events` only for an
/// action whose reply was `Message: Events to follow`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiResponse {
    fields: Fields,
    text_body: Option<String>,
    events: Vec<AmiEvent>,
}

impl AmiResponse {
    /// Create a response from a field map.
    pub fn new(fields: Fields) -> Self {
        Self {
            fields,
            text_body: None,
            events: Vec::new(),
        }
    }

    /// Attach the free-text body of a follows response.
    pub fn with_text_body(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    /// Attach the events aggregated for a causal action.
    pub fn with_events(mut self, events: Vec<AmiEvent>) -> Self {
        self.events = events;
        self
    }

    /// Look up a field by its exact (case-sensitive) name.
    pub fn field(&self, name: impl AsRef<str>) -> Option<&str> {
        lookup(&self.fields, name.as_ref())
    }

    /// All fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// `ActionID` echoed by the server.
    pub fn action_id(&self) -> Option<&str> {
        self.field(AmiHeader::ActionId)
    }

    /// Server `Message` field.
    pub fn message(&self) -> Option<&str> {
        self.field(AmiHeader::Message)
    }

    /// Body of a `Response: Follows`, without the `--END COMMAND--` sentinel.
    pub fn text_body(&self) -> Option<&str> {
        self.text_body
            .as_deref()
    }

    /// Events collected for a causal action, in arrival order.
    pub fn events(&self) -> &[AmiEvent] {
        &self.events
    }

    /// `true` if this is the placeholder reply of a causal action.
    pub fn is_events_to_follow(&self) -> bool {
        self.message()
            .is_some_and(|m| m.eq_ignore_ascii_case(EVENTS_TO_FOLLOW))
    }
}

/// `Response: Error` reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiErrorResponse {
    fields: Fields,
}

impl AmiErrorResponse {
    /// Create an error response from a field map.
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// Look up a field by its exact (case-sensitive) name.
    pub fn field(&self, name: impl AsRef<str>) -> Option<&str> {
        lookup(&self.fields, name.as_ref())
    }

    /// All fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// `ActionID` echoed by the server.
    pub fn action_id(&self) -> Option<&str> {
        self.field(AmiHeader::ActionId)
    }

    /// Server-supplied failure reason.
    pub fn message(&self) -> Option<&str> {
        self.field(AmiHeader::Message)
    }
}

/// `Response: Pong` keepalive reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiPong {
    fields: Fields,
}

impl AmiPong {
    /// Create a pong from a field map.
    pub fn new(fields: Fields) -> Self {
        Self { fields }
    }

    /// Look up a field by its exact (case-sensitive) name.
    pub fn field(&self, name: impl AsRef<str>) -> Option<&str> {
        lookup(&self.fields, name.as_ref())
    }

    /// All fields.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// `ActionID` echoed by the server.
    pub fn action_id(&self) -> Option<&str> {
        self.field(AmiHeader::ActionId)
    }
}

impl From<AmiPong> for AmiResponse {
    fn from(pong: AmiPong) -> Self {
        AmiResponse::new(pong.fields)
    }
}

/// Everything delivered to an [`AmiDelegate`](crate::AmiDelegate), in wire order.
///
/// `Connected` and `Disconnected` are synthetic lifecycle markers; they never
/// appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AmiMessage {
    /// The transport connected. Emitted before the banner arrives.
    Connected,
    /// The transport closed. Always the last message of a stream.
    Disconnected,
    /// `Event: <name>` stanza.
    Event(AmiEvent),
    /// Successful reply.
    Response(AmiResponse),
    /// `Response: Error` reply.
    Error(AmiErrorResponse),
    /// `Response: Pong` reply.
    Pong(AmiPong),
}

impl AmiMessage {
    /// Variant name (`Connected`, `Disconnected`, `Event`, `Response`, `Error`, `Pong`).
    pub fn name(&self) -> &'static str {
        match self {
            AmiMessage::Connected => "Connected",
            AmiMessage::Disconnected => "Disconnected",
            AmiMessage::Event(_) => "Event",
            AmiMessage::Response(_) => "Response",
            AmiMessage::Error(_) => "Error",
            AmiMessage::Pong(_) => "Pong",
        }
    }

    /// `ActionID` of a wire message, `None` for the lifecycle markers.
    pub fn action_id(&self) -> Option<&str> {
        match self {
            AmiMessage::Connected | AmiMessage::Disconnected => None,
            AmiMessage::Event(e) => e.action_id(),
            AmiMessage::Response(r) => r.action_id(),
            AmiMessage::Error(e) => e.action_id(),
            AmiMessage::Pong(p) => p.action_id(),
        }
    }

    /// `true` for the synthetic `Connected`/`Disconnected` markers.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, AmiMessage::Connected | AmiMessage::Disconnected)
    }
}

impl fmt::Display for AmiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmiMessage::Event(e) => write!(f, "Event({})", e.name()),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_response_accessors() {
        let resp = AmiResponse::new(fields(&[
            ("ActionID", "abc"),
            ("Message", "Recording started"),
        ]));
        assert_eq!(resp.action_id(), Some("abc"));
        assert_eq!(resp.message(), Some("Recording started"));
        assert_eq!(resp.text_body(), None);
        assert!(resp
            .events()
            .is_empty());
        assert!(!resp.is_events_to_follow());
    }

    #[test]
    fn test_response_equality_includes_body_and_events() {
        let base = AmiResponse::new(fields(&[("ActionID", "abc")]));
        assert_eq!(base.clone(), AmiResponse::new(fields(&[("ActionID", "abc")])));
        assert_ne!(base.clone(), base.clone().with_text_body("x"));
        assert_ne!(
            base.clone(),
            base.clone()
                .with_events(vec![AmiEvent::new("PeerEntry")])
        );
    }

    #[test]
    fn test_events_to_follow() {
        let resp = AmiResponse::new(fields(&[("Message", "Events to follow")]));
        assert!(resp.is_events_to_follow());
    }

    #[test]
    fn test_pong_into_response() {
        let pong = AmiPong::new(fields(&[("ActionID", "p1")]));
        let resp: AmiResponse = pong.into();
        assert_eq!(resp.action_id(), Some("p1"));
    }

    #[test]
    fn test_message_names() {
        assert_eq!(AmiMessage::Connected.name(), "Connected");
        assert_eq!(AmiMessage::Disconnected.name(), "Disconnected");
        assert_eq!(AmiMessage::Connected, AmiMessage::Connected);
        assert_ne!(AmiMessage::Connected, AmiMessage::Disconnected);
        assert!(AmiMessage::Disconnected.is_lifecycle());
        assert_eq!(
            AmiMessage::Event(AmiEvent::new("Hangup")).to_string(),
            "Event(Hangup)"
        );
    }

    #[test]
    fn test_message_action_id() {
        let err = AmiMessage::Error(AmiErrorResponse::new(fields(&[
            ("ActionID", "e1"),
            ("Message", "Action failed"),
        ])));
        assert_eq!(err.action_id(), Some("e1"));
        assert_eq!(AmiMessage::Connected.action_id(), None);
    }
}
