use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Phase every meeting starts in.
pub const DEFAULT_PHASE: &str = "lobby";

/// Participant fields owned by the server. Client attributes never
/// overwrite these.
const RESERVED_FIELDS: &[&str] = &["meetingId", "userId", "status", "joinedAt", "lastHeartbeat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantStatus {
    Online,
    Offline,
}

/// One user's presence record within a meeting.
///
/// Typed fields are maintained by the server; anything else the client sends
/// on join/heartbeat lands in `attributes` and is flattened back out on the
/// wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub meeting_id: String,
    pub user_id: String,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Participant {
    pub fn new(meeting_id: &str, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            meeting_id: meeting_id.to_string(),
            user_id: user_id.to_string(),
            status: ParticipantStatus::Online,
            joined_at: now,
            last_heartbeat: now,
            attributes: Map::new(),
        }
    }

    /// Record a sign of life: back online, heartbeat stamped.
    pub fn mark_seen(&mut self, now: DateTime<Utc>) {
        self.status = ParticipantStatus::Online;
        self.last_heartbeat = self.last_heartbeat.max(now);
    }

    /// Shallow-merge client attributes, skipping server-owned fields.
    pub fn merge_attributes(&mut self, attrs: &Map<String, Value>) {
        for (key, value) in attrs {
            if RESERVED_FIELDS.contains(&key.as_str()) {
                continue;
            }
            self.attributes.insert(key.clone(), value.clone());
        }
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_heartbeat)
    }
}

/// Meeting-level metadata shared by all participants.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingMeta {
    pub phase: String,
    pub phase_updated_by: Option<String>,
    pub phase_updated_at: Option<DateTime<Utc>>,
    pub shared_context: Map<String, Value>,
    pub shared_context_updated_by: Option<String>,
    pub shared_context_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MeetingMeta {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            phase: DEFAULT_PHASE.to_string(),
            phase_updated_by: None,
            phase_updated_at: None,
            shared_context: Map::new(),
            shared_context_updated_by: None,
            shared_context_updated_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance `updated_at`; never moves it backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = self.updated_at.max(now);
    }

    pub fn set_phase(&mut self, phase: &str, updated_by: &str, now: DateTime<Utc>) {
        self.phase = phase.to_string();
        self.phase_updated_by = Some(updated_by.to_string());
        self.phase_updated_at = Some(now);
        self.touch(now);
    }

    /// Shallow union into the shared context; later keys win.
    /// Returns false (and changes nothing) for an empty patch.
    pub fn merge_shared_context(
        &mut self,
        patch: &Map<String, Value>,
        updated_by: &str,
        now: DateTime<Utc>,
    ) -> bool {
        if patch.is_empty() {
            return false;
        }
        for (key, value) in patch {
            self.shared_context.insert(key.clone(), value.clone());
        }
        self.shared_context_updated_by = Some(updated_by.to_string());
        self.shared_context_updated_at = Some(now);
        self.touch(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn participant_serializes_camel_case_with_flattened_attributes() {
        let now = Utc::now();
        let mut p = Participant::new("room1", "alice", now);
        p.merge_attributes(&obj(json!({ "displayName": "Alice", "color": "red" })));

        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["meetingId"], "room1");
        assert_eq!(v["userId"], "alice");
        assert_eq!(v["status"], "online");
        assert_eq!(v["displayName"], "Alice");
        assert!(v["lastHeartbeat"].is_string());
    }

    #[test]
    fn client_attributes_cannot_override_server_fields() {
        let now = Utc::now();
        let mut p = Participant::new("room1", "alice", now);
        p.merge_attributes(&obj(json!({ "status": "offline", "userId": "mallory", "mood": 3 })));

        assert_eq!(p.status, ParticipantStatus::Online);
        assert_eq!(p.user_id, "alice");
        assert_eq!(p.attributes.get("mood"), Some(&json!(3)));
        assert!(!p.attributes.contains_key("status"));
    }

    #[test]
    fn shared_context_merge_is_shallow_union() {
        let now = Utc::now();
        let mut meta = MeetingMeta::new(now);

        assert!(meta.merge_shared_context(&obj(json!({ "a": 1 })), "alice", now));
        assert!(meta.merge_shared_context(&obj(json!({ "b": 2 })), "bob", now));
        assert_eq!(Value::Object(meta.shared_context.clone()), json!({ "a": 1, "b": 2 }));

        meta.merge_shared_context(&obj(json!({ "a": 3 })), "alice", now);
        assert_eq!(meta.shared_context.get("a"), Some(&json!(3)));
        assert_eq!(meta.shared_context_updated_by.as_deref(), Some("alice"));
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        let now = Utc::now();
        let mut meta = MeetingMeta::new(now);
        assert!(!meta.merge_shared_context(&Map::new(), "alice", now));
        assert!(meta.shared_context_updated_by.is_none());
    }

    #[test]
    fn touch_is_monotonic() {
        let now = Utc::now();
        let mut meta = MeetingMeta::new(now);
        meta.touch(now - chrono::Duration::seconds(10));
        assert_eq!(meta.updated_at, now);
    }
}
