//! Authoritative in-memory meeting table.
//!
//! One `tokio::sync::Mutex` per meeting serializes every read-modify-write
//! (and the broadcast that follows it) on that meeting, while meetings on
//! different keys never contend. The outer `DashMap` is only touched
//! briefly to look up or retire a slot and is never held across an await.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::events::ServerMessage;
use super::registry::ConnectionRegistry;
use crate::models::meeting::{MeetingMeta, Participant, ParticipantStatus};

/// Heartbeat-age thresholds for the staleness sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub offline_after: Duration,
    pub remove_after: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            offline_after: Duration::from_secs(30),
            remove_after: Duration::from_secs(300),
        }
    }
}

/// What one sweep of a meeting changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub marked_offline: Vec<String>,
    pub removed: Vec<String>,
}

/// State of a single meeting.
#[derive(Debug)]
pub struct MeetingSession {
    pub meeting_id: String,
    pub meta: MeetingMeta,
    pub participants: BTreeMap<String, Participant>,
    pub connections: ConnectionRegistry,
    /// Set once the slot has been retired from the table.
    closed: bool,
}

impl MeetingSession {
    fn new(meeting_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            meeting_id: meeting_id.to_string(),
            meta: MeetingMeta::new(now),
            participants: BTreeMap::new(),
            connections: ConnectionRegistry::new(),
            closed: false,
        }
    }

    /// Create or reactivate a participant and merge its attributes.
    pub fn upsert_participant(
        &mut self,
        user_id: &str,
        attrs: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> &Participant {
        let participant = self
            .participants
            .entry(user_id.to_string())
            .or_insert_with(|| Participant::new(&self.meeting_id, user_id, now));
        participant.mark_seen(now);
        participant.merge_attributes(attrs);
        self.meta.touch(now);
        participant
    }

    pub fn remove_participant(&mut self, user_id: &str, now: DateTime<Utc>) -> bool {
        let removed = self.participants.remove(user_id).is_some();
        if removed {
            self.meta.touch(now);
        }
        removed
    }

    /// Mark or evict participants by heartbeat age.
    pub fn sweep(&mut self, policy: StalenessPolicy, now: DateTime<Utc>) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for (user_id, participant) in self.participants.iter_mut() {
            // A heartbeat stamped in the future counts as fresh.
            let age = participant.heartbeat_age(now).to_std().unwrap_or_default();
            if age > policy.remove_after {
                outcome.removed.push(user_id.clone());
            } else if age > policy.offline_after
                && participant.status != ParticipantStatus::Offline
            {
                participant.status = ParticipantStatus::Offline;
                outcome.marked_offline.push(user_id.clone());
            }
        }

        for user_id in &outcome.removed {
            self.participants.remove(user_id);
        }
        self.meta.touch(now);
        outcome
    }

    pub fn has_participants(&self) -> bool {
        !self.participants.is_empty()
    }

    /// Nothing left to keep the slot alive for.
    pub fn is_vacant(&self) -> bool {
        self.participants.is_empty() && self.connections.is_empty()
    }

    pub fn state_message(&self, now: DateTime<Utc>) -> ServerMessage {
        ServerMessage::participants_state(
            &self.participants,
            &self.meta.phase,
            &self.meta.shared_context,
            now,
        )
    }
}

/// Exclusive access to one meeting, plus the slot it came from.
pub struct MeetingGuard {
    slot: Arc<Mutex<MeetingSession>>,
    guard: OwnedMutexGuard<MeetingSession>,
}

impl Deref for MeetingGuard {
    type Target = MeetingSession;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl DerefMut for MeetingGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Table of live meetings, constructed explicitly and shared by `Arc`.
#[derive(Default)]
pub struct SessionStateStore {
    sessions: DashMap<String, Arc<Mutex<MeetingSession>>>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the meeting, creating it if it does not exist.
    pub async fn lock_or_create(&self, meeting_id: &str) -> MeetingGuard {
        loop {
            let slot = self
                .sessions
                .entry(meeting_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(MeetingSession::new(meeting_id, Utc::now()))))
                .value()
                .clone();
            let guard = slot.clone().lock_owned().await;
            // Lost a race with `retire`: the slot we waited on is dead.
            if !guard.closed {
                return MeetingGuard { slot, guard };
            }
        }
    }

    /// Lock the meeting only if it exists.
    pub async fn lock_existing(&self, meeting_id: &str) -> Option<MeetingGuard> {
        let slot = self.sessions.get(meeting_id)?.value().clone();
        let guard = slot.clone().lock_owned().await;
        if guard.closed {
            return None;
        }
        Some(MeetingGuard { slot, guard })
    }

    /// Delete the meeting with all its participants and connections.
    pub fn retire(&self, meeting: &mut MeetingGuard) {
        meeting.closed = true;
        meeting.participants.clear();
        meeting.connections.clear();
        let slot = meeting.slot.clone();
        self.sessions
            .remove_if(&meeting.meeting_id, |_, current| Arc::ptr_eq(current, &slot));
    }

    pub fn meeting_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn contains(&self, meeting_id: &str) -> bool {
        self.sessions.contains_key(meeting_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn lock_or_create_makes_lobby_meeting() {
        let store = SessionStateStore::new();
        let meeting = store.lock_or_create("room1").await;
        assert_eq!(meeting.meta.phase, "lobby");
        assert!(!meeting.has_participants());
        drop(meeting);
        assert!(store.contains("room1"));
    }

    #[tokio::test]
    async fn lock_existing_does_not_create() {
        let store = SessionStateStore::new();
        assert!(store.lock_existing("ghost").await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn retire_removes_slot_and_contents() {
        let store = SessionStateStore::new();
        let mut meeting = store.lock_or_create("room1").await;
        meeting.upsert_participant("alice", &Map::new(), Utc::now());
        store.retire(&mut meeting);
        drop(meeting);

        assert!(!store.contains("room1"));
        assert!(store.lock_existing("room1").await.is_none());
    }

    #[tokio::test]
    async fn waiter_on_retired_slot_gets_a_fresh_meeting() {
        let store = Arc::new(SessionStateStore::new());
        let mut first = store.lock_or_create("room1").await;
        first.meta.phase = "voting".to_string();

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let meeting = store.lock_or_create("room1").await;
                meeting.meta.phase.clone()
            })
        };
        tokio::task::yield_now().await;

        store.retire(&mut first);
        drop(first);

        assert_eq!(waiter.await.unwrap(), "lobby");
        assert!(store.contains("room1"));
    }

    #[test]
    fn upsert_reactivates_and_merges() {
        let now = Utc::now();
        let mut session = MeetingSession::new("room1", now);
        session.upsert_participant("alice", &attrs(json!({ "name": "A" })), now);
        session.participants.get_mut("alice").unwrap().status = ParticipantStatus::Offline;

        let later = now + chrono::Duration::seconds(5);
        let p = session.upsert_participant("alice", &attrs(json!({ "seat": 2 })), later);
        assert_eq!(p.status, ParticipantStatus::Online);
        assert_eq!(p.last_heartbeat, later);
        assert_eq!(p.joined_at, now);
        assert_eq!(p.attributes["name"], "A");
        assert_eq!(p.attributes["seat"], 2);
    }

    #[test]
    fn sweep_applies_both_thresholds() {
        let now = Utc::now();
        let mut session = MeetingSession::new("room1", now);
        for user in ["fresh", "quiet", "gone"] {
            session.upsert_participant(user, &Map::new(), now);
        }
        session.participants.get_mut("quiet").unwrap().last_heartbeat =
            now - chrono::Duration::seconds(60);
        session.participants.get_mut("gone").unwrap().last_heartbeat =
            now - chrono::Duration::seconds(600);

        let outcome = session.sweep(StalenessPolicy::default(), now);
        assert_eq!(outcome.marked_offline, vec!["quiet".to_string()]);
        assert_eq!(outcome.removed, vec!["gone".to_string()]);
        assert_eq!(session.participants["fresh"].status, ParticipantStatus::Online);
        assert_eq!(session.participants["quiet"].status, ParticipantStatus::Offline);
        assert!(!session.participants.contains_key("gone"));
    }

    #[test]
    fn sweep_does_not_report_already_offline_twice() {
        let now = Utc::now();
        let mut session = MeetingSession::new("room1", now);
        session.upsert_participant("quiet", &Map::new(), now);
        session.participants.get_mut("quiet").unwrap().last_heartbeat =
            now - chrono::Duration::seconds(60);

        assert_eq!(session.sweep(StalenessPolicy::default(), now).marked_offline.len(), 1);
        assert!(session.sweep(StalenessPolicy::default(), now).marked_offline.is_empty());
        assert!(session.participants.contains_key("quiet"));
    }
}
