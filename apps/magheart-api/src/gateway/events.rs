//! Meeting socket event types and wire-format messages.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::meeting::Participant;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

/// `type` tags used on the meeting socket.
pub struct EventName;

impl EventName {
    pub const JOIN_MEETING: &'static str = "join_meeting";
    pub const HEARTBEAT: &'static str = "heartbeat";
    pub const PRESENCE: &'static str = "presence";
    pub const LEAVE_MEETING: &'static str = "leave_meeting";
    pub const UPDATE_PHASE: &'static str = "update_phase";
    pub const UPDATE_SHARED_CONTEXT: &'static str = "update_shared_context";

    pub const PARTICIPANTS_STATE: &'static str = "participants_state";
    pub const PHASE_CHANGED: &'static str = "phase_changed";
    pub const SHARED_CONTEXT_UPDATED: &'static str = "shared_context_updated";
    pub const STATUS: &'static str = "status";
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

/// What an inbound message asks the server to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientCommand {
    Join(Map<String, Value>),
    Heartbeat(Map<String, Value>),
    Leave,
    UpdatePhase(String),
    UpdateSharedContext(Map<String, Value>),
    /// Unrecognised type: forwarded to the whole meeting as-is.
    Relay { kind: String, payload: Map<String, Value> },
}

impl ClientMessage {
    /// Parse a text frame. `None` for anything that isn't a JSON object with
    /// a string `type` and an object (or absent) `payload`.
    pub fn parse(text: &str) -> Option<Self> {
        let msg: ClientMessage = serde_json::from_str(text).ok()?;
        match msg.payload {
            Value::Object(_) | Value::Null => Some(msg),
            _ => None,
        }
    }

    /// Stamp the sender into `payload.userId` and resolve the command.
    /// `None` when a known type is missing its required field.
    pub fn into_command(self, user_id: &str) -> Option<ClientCommand> {
        let mut payload = match self.payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        payload.insert("userId".to_string(), Value::String(user_id.to_string()));

        let command = match self.kind.as_str() {
            EventName::JOIN_MEETING => ClientCommand::Join(payload),
            EventName::HEARTBEAT | EventName::PRESENCE => ClientCommand::Heartbeat(payload),
            EventName::LEAVE_MEETING => ClientCommand::Leave,
            EventName::UPDATE_PHASE => {
                let phase = payload.get("phase")?.as_str()?;
                ClientCommand::UpdatePhase(phase.to_string())
            }
            EventName::UPDATE_SHARED_CONTEXT => {
                let ctx = payload.get("sharedContext")?.as_object()?;
                ClientCommand::UpdateSharedContext(ctx.clone())
            }
            _ => ClientCommand::Relay {
                kind: self.kind,
                payload,
            },
        };
        Some(command)
    }
}

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to every connection of a meeting.
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantsStatePayload<'a> {
    participants: &'a BTreeMap<String, Participant>,
    phase: &'a str,
    shared_context: &'a Map<String, Value>,
    timestamp: DateTime<Utc>,
}

impl ServerMessage {
    /// Full snapshot: enough for a client to rebuild its whole view.
    pub fn participants_state(
        participants: &BTreeMap<String, Participant>,
        phase: &str,
        shared_context: &Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let payload = ParticipantsStatePayload {
            participants,
            phase,
            shared_context,
            timestamp,
        };
        Self {
            kind: EventName::PARTICIPANTS_STATE.to_string(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
        }
    }

    pub fn phase_changed(
        meeting_id: &str,
        phase: &str,
        updated_by: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EventName::PHASE_CHANGED.to_string(),
            payload: serde_json::json!({
                "meetingId": meeting_id,
                "phase": phase,
                "updatedBy": updated_by,
                "timestamp": timestamp,
            }),
        }
    }

    pub fn shared_context_updated(
        meeting_id: &str,
        shared_context: &Map<String, Value>,
        updated_by: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EventName::SHARED_CONTEXT_UPDATED.to_string(),
            payload: serde_json::json!({
                "meetingId": meeting_id,
                "sharedContext": shared_context,
                "updatedBy": updated_by,
                "timestamp": timestamp,
            }),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Self {
            kind: EventName::STATUS.to_string(),
            payload: serde_json::json!({ "message": message.into() }),
        }
    }

    pub fn relay(kind: String, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            payload: Value::Object(payload),
        }
    }

    pub fn to_json(&self) -> String {
        // Only maps with string keys and plain values live in here.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rejects_garbage_and_non_object_payloads() {
        assert!(ClientMessage::parse("not json").is_none());
        assert!(ClientMessage::parse(r#"{"payload":{}}"#).is_none());
        assert!(ClientMessage::parse(r#"{"type":"heartbeat","payload":[1]}"#).is_none());
        assert!(ClientMessage::parse(r#"{"type":"leave_meeting"}"#).is_some());
    }

    #[test]
    fn into_command_injects_sender() {
        let msg = ClientMessage::parse(r#"{"type":"join_meeting","payload":{"userId":"spoof","name":"A"}}"#)
            .unwrap();
        match msg.into_command("alice").unwrap() {
            ClientCommand::Join(attrs) => {
                assert_eq!(attrs["userId"], "alice");
                assert_eq!(attrs["name"], "A");
            }
            other => panic!("expected join, got {other:?}"),
        }
    }

    #[test]
    fn presence_is_an_alias_for_heartbeat() {
        let msg = ClientMessage::parse(r#"{"type":"presence","payload":{}}"#).unwrap();
        assert!(matches!(msg.into_command("u"), Some(ClientCommand::Heartbeat(_))));
    }

    #[test]
    fn update_phase_requires_string_phase() {
        let ok = ClientMessage::parse(r#"{"type":"update_phase","payload":{"phase":"voting"}}"#).unwrap();
        assert_eq!(ok.into_command("u"), Some(ClientCommand::UpdatePhase("voting".into())));

        let bad = ClientMessage::parse(r#"{"type":"update_phase","payload":{"phase":3}}"#).unwrap();
        assert_eq!(bad.into_command("u"), None);
    }

    #[test]
    fn update_shared_context_requires_mapping() {
        let ok = ClientMessage::parse(
            r#"{"type":"update_shared_context","payload":{"sharedContext":{"style":"ink"}}}"#,
        )
        .unwrap();
        match ok.into_command("u").unwrap() {
            ClientCommand::UpdateSharedContext(ctx) => assert_eq!(ctx["style"], "ink"),
            other => panic!("unexpected {other:?}"),
        }

        let bad = ClientMessage::parse(r#"{"type":"update_shared_context","payload":{}}"#).unwrap();
        assert_eq!(bad.into_command("u"), None);
    }

    #[test]
    fn unknown_type_is_relayed_with_sender() {
        let msg = ClientMessage::parse(r#"{"type":"card_flip","payload":{"card":7}}"#).unwrap();
        match msg.into_command("bob").unwrap() {
            ClientCommand::Relay { kind, payload } => {
                assert_eq!(kind, "card_flip");
                assert_eq!(payload["card"], 7);
                assert_eq!(payload["userId"], "bob");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn participants_state_wire_shape() {
        let now = Utc::now();
        let mut participants = BTreeMap::new();
        participants.insert("alice".to_string(), Participant::new("room1", "alice", now));
        let mut ctx = Map::new();
        ctx.insert("a".into(), json!(1));

        let v: Value =
            serde_json::from_str(&ServerMessage::participants_state(&participants, "lobby", &ctx, now).to_json())
                .unwrap();
        assert_eq!(v["type"], "participants_state");
        assert_eq!(v["payload"]["phase"], "lobby");
        assert_eq!(v["payload"]["sharedContext"]["a"], 1);
        assert_eq!(v["payload"]["participants"]["alice"]["status"], "online");
        assert!(v["payload"]["timestamp"].is_string());
    }
}
