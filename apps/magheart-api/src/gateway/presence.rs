//! Meeting presence: join, heartbeat, leave, phase and shared context.
//!
//! Presence is best-effort and self-healing. Unknown meetings and users are
//! created on first touch, nothing here returns an error, and online/offline
//! is derived only from heartbeat age, never from socket liveness. Every
//! mutation ends with a full `participants_state` snapshot broadcast while
//! the meeting lock is still held, so all connections of a meeting observe
//! snapshots in the order they were produced.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};

use super::events::ServerMessage;
use super::fanout::BroadcastDispatcher;
use super::registry::ConnectionHandle;
use super::session::{MeetingGuard, SessionStateStore, StalenessPolicy, SweepOutcome};
use crate::models::meeting::{MeetingMeta, Participant};

/// Read-only copy of a meeting's state.
#[derive(Debug, Clone)]
pub struct MeetingSnapshot {
    pub meta: MeetingMeta,
    pub participants: BTreeMap<String, Participant>,
    pub connections: usize,
}

/// Totals from one pass of the background sweeper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub meetings: usize,
    pub marked_offline: usize,
    pub removed: usize,
}

pub struct PresenceEngine {
    store: SessionStateStore,
    dispatcher: BroadcastDispatcher,
    policy: StalenessPolicy,
}

impl PresenceEngine {
    pub fn new(send_timeout: Duration, policy: StalenessPolicy) -> Self {
        Self {
            store: SessionStateStore::new(),
            dispatcher: BroadcastDispatcher::new(send_timeout),
            policy,
        }
    }

    pub fn store(&self) -> &SessionStateStore {
        &self.store
    }

    // ---- Connections -----------------------------------------------------

    /// Attach a socket to a meeting. Does not join the user.
    pub async fn register(&self, meeting_id: &str, handle: ConnectionHandle) {
        let mut meeting = self.store.lock_or_create(meeting_id).await;
        tracing::debug!(meeting_id, conn_id = %handle.id, user_id = %handle.user_id, "connection registered");
        meeting.connections.register(handle);
        meeting.meta.touch(Utc::now());
    }

    /// Detach exactly one socket. The participant record is left alone; a
    /// meeting with neither participants nor connections is dropped.
    pub async fn unregister(&self, meeting_id: &str, user_id: &str, conn_id: &str) {
        let Some(mut meeting) = self.store.lock_existing(meeting_id).await else {
            return;
        };
        meeting.connections.unregister(user_id, conn_id);
        if meeting.is_vacant() {
            tracing::debug!(meeting_id, "dropping vacant meeting");
            self.store.retire(&mut meeting);
        }
    }

    // ---- Participants ----------------------------------------------------

    pub async fn join(&self, meeting_id: &str, user_id: &str, attrs: &Map<String, Value>) {
        let mut meeting = self.store.lock_or_create(meeting_id).await;
        meeting.upsert_participant(user_id, attrs, Utc::now());
        tracing::info!(meeting_id, user_id, "participant joined");
        self.broadcast_state(&mut meeting).await;
    }

    /// Liveness ping. The first heartbeat from an unknown user joins them.
    pub async fn heartbeat(&self, meeting_id: &str, user_id: &str, attrs: &Map<String, Value>) {
        let mut meeting = self.store.lock_or_create(meeting_id).await;
        meeting.upsert_participant(user_id, attrs, Utc::now());
        self.broadcast_state(&mut meeting).await;
    }

    pub async fn leave(&self, meeting_id: &str, user_id: &str) {
        let Some(mut meeting) = self.store.lock_existing(meeting_id).await else {
            return;
        };
        // Leaving a meeting one never joined changes nothing.
        if !meeting.remove_participant(user_id, Utc::now()) {
            return;
        }
        tracing::info!(meeting_id, user_id, "participant left");
        if !meeting.has_participants() {
            self.close_meeting(&mut meeting);
            return;
        }
        self.broadcast_state(&mut meeting).await;
    }

    // ---- Meeting metadata ------------------------------------------------

    pub async fn update_phase(&self, meeting_id: &str, phase: &str, updated_by: &str) {
        let mut meeting = self.store.lock_or_create(meeting_id).await;
        let now = Utc::now();
        meeting.meta.set_phase(phase, updated_by, now);
        tracing::info!(meeting_id, phase, updated_by, "phase changed");

        let event = ServerMessage::phase_changed(meeting_id, phase, updated_by, now);
        self.send(&mut meeting, &event).await;
        self.broadcast_state(&mut meeting).await;
    }

    /// Shallow-merge `patch` into the shared context. Empty patches are
    /// ignored entirely.
    pub async fn update_shared_context(
        &self,
        meeting_id: &str,
        patch: &Map<String, Value>,
        updated_by: &str,
    ) {
        if patch.is_empty() {
            return;
        }
        let mut meeting = self.store.lock_or_create(meeting_id).await;
        let now = Utc::now();
        meeting.meta.merge_shared_context(patch, updated_by, now);

        let event = ServerMessage::shared_context_updated(
            meeting_id,
            &meeting.meta.shared_context,
            updated_by,
            now,
        );
        self.send(&mut meeting, &event).await;
        self.broadcast_state(&mut meeting).await;
    }

    // ---- Staleness -------------------------------------------------------

    /// Sweep one meeting with the engine's configured thresholds.
    pub async fn cleanup_stale(&self, meeting_id: &str) -> SweepOutcome {
        self.cleanup_stale_with(meeting_id, self.policy).await
    }

    /// Mark quiet participants offline, evict long-gone ones, and drop the
    /// meeting if the eviction emptied it. Always rebroadcasts the snapshot.
    pub async fn cleanup_stale_with(
        &self,
        meeting_id: &str,
        policy: StalenessPolicy,
    ) -> SweepOutcome {
        let Some(mut meeting) = self.store.lock_existing(meeting_id).await else {
            return SweepOutcome::default();
        };
        let outcome = meeting.sweep(policy, Utc::now());

        if !outcome.marked_offline.is_empty() || !outcome.removed.is_empty() {
            tracing::debug!(
                meeting_id,
                offline = outcome.marked_offline.len(),
                removed = outcome.removed.len(),
                "stale participants swept"
            );
        }

        let emptied = !outcome.removed.is_empty() && !meeting.has_participants();
        if emptied || meeting.is_vacant() {
            self.close_meeting(&mut meeting);
            return outcome;
        }
        self.broadcast_state(&mut meeting).await;
        outcome
    }

    /// Sweep every live meeting.
    pub async fn sweep_all(&self) -> SweepSummary {
        let mut summary = SweepSummary::default();
        for meeting_id in self.store.meeting_ids() {
            let outcome = self.cleanup_stale(&meeting_id).await;
            summary.meetings += 1;
            summary.marked_offline += outcome.marked_offline.len();
            summary.removed += outcome.removed.len();
        }
        summary
    }

    // ---- Broadcast -------------------------------------------------------

    /// Send an arbitrary message to an existing meeting (status notices,
    /// relayed client events). Never creates the meeting.
    pub async fn announce(&self, meeting_id: &str, message: &ServerMessage) {
        if let Some(mut meeting) = self.store.lock_existing(meeting_id).await {
            self.send(&mut meeting, message).await;
        }
    }

    pub async fn snapshot(&self, meeting_id: &str) -> Option<MeetingSnapshot> {
        let meeting = self.store.lock_existing(meeting_id).await?;
        Some(MeetingSnapshot {
            meta: meeting.meta.clone(),
            participants: meeting.participants.clone(),
            connections: meeting.connections.len(),
        })
    }

    async fn broadcast_state(&self, meeting: &mut MeetingGuard) {
        let message = meeting.state_message(Utc::now());
        self.send(meeting, &message).await;
    }

    async fn send(&self, meeting: &mut MeetingGuard, message: &ServerMessage) {
        let meeting = &mut **meeting;
        let report = self
            .dispatcher
            .dispatch(&meeting.meeting_id, &mut meeting.connections, message)
            .await;
        if report.pruned > 0 {
            tracing::debug!(
                meeting_id = %meeting.meeting_id,
                pruned = report.pruned,
                "connections dropped during broadcast"
            );
        }
    }

    fn close_meeting(&self, meeting: &mut MeetingGuard) {
        tracing::info!(meeting_id = %meeting.meeting_id, "meeting closed");
        self.store.retire(meeting);
    }
}
