//! Event envelope spoken over the text phase of a room connection.
//!
//! Decoding happens in two stages: [`EventKind::peek`] reads only the `type`
//! tag, then [`Event::decode`] parses the companion fields for that kind.
//! Frames that are forwarded keep their original bytes; only events the
//! server originates ([`ServerEvent`]) are ever serialized here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const STATUS_DISCONNECTED: &str = "disconnected";

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("malformed event: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Message,
    Presence,
    Command,
    Ack,
    Other(String),
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type", borrow)]
    kind: std::borrow::Cow<'a, str>,
}

impl EventKind {
    /// Reads the `type` discriminant without looking at anything else.
    pub fn peek(raw: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        Ok(Self::from_tag(&envelope.kind))
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "message" | "MSG" => EventKind::Message,
            "status" | "STATUS" | "user" | "presence" => EventKind::Presence,
            "command" => EventKind::Command,
            "ack" => EventKind::Ack,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            EventKind::Message => "message",
            EventKind::Presence => "presence",
            EventKind::Command => "command",
            EventKind::Ack => "ack",
            EventKind::Other(tag) => tag,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub user_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PresenceUpdate {
    pub status: String,
    #[serde(alias = "user")]
    pub user_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Command {
    pub command: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Acknowledgement {
    pub payload: String,
}

/// A fully decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Message(ChatMessage),
    Presence(PresenceUpdate),
    Command(Command),
    Ack(Acknowledgement),
    Other(String),
}

impl Event {
    /// Second decode stage: parses the fields required by `kind`.
    pub fn decode(kind: EventKind, raw: &str) -> Result<Self, DecodeError> {
        Ok(match kind {
            EventKind::Message => Event::Message(serde_json::from_str(raw)?),
            EventKind::Presence => Event::Presence(serde_json::from_str(raw)?),
            EventKind::Command => Event::Command(serde_json::from_str(raw)?),
            EventKind::Ack => Event::Ack(serde_json::from_str(raw)?),
            EventKind::Other(tag) => Event::Other(tag),
        })
    }

    pub fn parse(raw: &str) -> Result<Self, DecodeError> {
        Self::decode(EventKind::peek(raw)?, raw)
    }

    /// The self-reported user id carried by the event, if any.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Event::Message(msg) => Some(&msg.user_id),
            Event::Presence(update) => Some(&update.user_id),
            _ => None,
        }
    }
}

/// Events the server manufactures itself.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "presence")]
    Presence {
        status: String,
        user: String,
        timestamp: i64,
    },
    #[serde(rename = "ack")]
    Ack { payload: String },
}

impl ServerEvent {
    pub fn disconnected(user: &str) -> Self {
        ServerEvent::Presence {
            status: STATUS_DISCONNECTED.to_string(),
            user: user.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Receipt for the sender, quoting the frame it sent.
    pub fn acknowledge(raw: &str) -> Self {
        ServerEvent::Ack {
            payload: format!("Server received your event: {raw}"),
        }
    }

    pub fn to_json(&self) -> String {
        // Both variants hold only strings and integers.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peek_accepts_every_alias() {
        for (raw, expected) in [
            (r#"{"type":"message"}"#, EventKind::Message),
            (r#"{"type":"MSG"}"#, EventKind::Message),
            (r#"{"type":"status"}"#, EventKind::Presence),
            (r#"{"type":"STATUS"}"#, EventKind::Presence),
            (r#"{"type":"user"}"#, EventKind::Presence),
            (r#"{"type":"presence"}"#, EventKind::Presence),
            (r#"{"type":"command"}"#, EventKind::Command),
            (r#"{"type":"typing","x":1}"#, EventKind::Other("typing".into())),
        ] {
            assert_eq!(EventKind::peek(raw).unwrap(), expected, "{raw}");
        }
    }

    #[test]
    fn peek_rejects_missing_or_garbled_type() {
        assert!(EventKind::peek("not json").is_err());
        assert!(EventKind::peek(r#"{"content":"hi"}"#).is_err());
        assert!(EventKind::peek(r#"{"type":7}"#).is_err());
    }

    #[test]
    fn message_needs_companion_fields() {
        let event =
            Event::parse(r#"{"type":"message","content":"hi","user_id":"u1","timestamp":1}"#).unwrap();
        assert_eq!(
            event,
            Event::Message(ChatMessage {
                content: "hi".into(),
                user_id: "u1".into(),
                timestamp: 1,
            })
        );
        assert_eq!(event.user_id(), Some("u1"));

        assert!(Event::parse(r#"{"type":"message","content":"hi","timestamp":1}"#).is_err());
    }

    #[test]
    fn presence_reads_user_or_user_id() {
        let a = Event::parse(r#"{"type":"STATUS","status":"away","user_id":"u1","timestamp":5}"#)
            .unwrap();
        let b = Event::parse(r#"{"type":"presence","status":"away","user":"u1","timestamp":5}"#)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn command_data_is_opaque_and_optional() {
        let event = Event::parse(r#"{"type":"command","command":"kick","data":{"who":[1,2]}}"#)
            .unwrap();
        let Event::Command(cmd) = event else {
            panic!("expected a command");
        };
        assert_eq!(cmd.command, "kick");
        assert_eq!(cmd.data["who"][1], 2);

        let bare = Event::parse(r#"{"type":"command","command":"ping"}"#).unwrap();
        assert_eq!(
            bare,
            Event::Command(Command {
                command: "ping".into(),
                data: Value::Null,
            })
        );
    }

    #[test]
    fn disconnect_event_round_trips_through_the_presence_decoder() {
        let json = ServerEvent::disconnected("u1").to_json();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "presence");
        assert_eq!(value["status"], "disconnected");
        assert_eq!(value["user"], "u1");

        let Event::Presence(update) = Event::parse(&json).unwrap() else {
            panic!("expected presence");
        };
        assert_eq!(update.user_id, "u1");
        assert_eq!(update.status, STATUS_DISCONNECTED);
    }

    #[test]
    fn acknowledgement_quotes_the_received_frame() {
        let json = ServerEvent::acknowledge(r#"{"type":"typing"}"#).to_json();
        assert_eq!(
            json,
            r#"{"type":"ack","payload":"Server received your event: {\"type\":\"typing\"}"}"#
        );
    }
}
