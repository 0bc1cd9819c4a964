//! Fan-out of meeting events to every registered connection.
//!
//! A message is serialized once and handed to each connection's writer queue
//! concurrently. Every hand-off is bounded by `send_timeout`, so one stuck
//! peer delays a broadcast by at most that long and never blocks the others.
//! Failed connections are pruned after the pass over the snapshot completes.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use super::events::ServerMessage;
use super::registry::{ConnectionRegistry, Outbound};

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub pruned: usize,
}

#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    send_timeout: Duration,
}

impl BroadcastDispatcher {
    pub fn new(send_timeout: Duration) -> Self {
        Self { send_timeout }
    }

    /// Send `message` to every connection in `registry`, dropping the ones
    /// that fail.
    pub async fn dispatch(
        &self,
        meeting_id: &str,
        registry: &mut ConnectionRegistry,
        message: &ServerMessage,
    ) -> DispatchReport {
        if registry.is_empty() {
            return DispatchReport::default();
        }

        let frame: Outbound = Arc::from(message.to_json());
        let targets = registry.snapshot();
        let results = join_all(
            targets
                .iter()
                .map(|conn| conn.send(frame.clone(), self.send_timeout)),
        )
        .await;

        let mut failed = Vec::new();
        for (conn, result) in targets.iter().zip(results) {
            if let Err(reason) = result {
                tracing::debug!(
                    meeting_id,
                    conn_id = %conn.id,
                    user_id = %conn.user_id,
                    ?reason,
                    "pruning connection after failed send"
                );
                failed.push(conn.id.clone());
            }
        }

        let pruned = registry.prune(&failed);
        DispatchReport {
            delivered: targets.len() - failed.len(),
            pruned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::ConnectionHandle;

    #[tokio::test]
    async fn each_live_connection_gets_exactly_one_copy() {
        let dispatcher = BroadcastDispatcher::new(Duration::from_millis(50));
        let mut reg = ConnectionRegistry::new();
        let mut receivers = Vec::new();
        for user in ["a", "b", "c"] {
            let (h, rx) = ConnectionHandle::new(user, 8);
            reg.register(h);
            receivers.push(rx);
        }

        let report = dispatcher
            .dispatch("room", &mut reg, &ServerMessage::status("hello"))
            .await;
        assert_eq!(report, DispatchReport { delivered: 3, pruned: 0 });

        for rx in receivers.iter_mut() {
            let frame = rx.try_recv().unwrap();
            assert!(frame.contains("hello"));
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn failed_connection_is_pruned_without_affecting_others() {
        let dispatcher = BroadcastDispatcher::new(Duration::from_millis(50));
        let mut reg = ConnectionRegistry::new();
        let (alive, mut alive_rx) = ConnectionHandle::new("alive", 8);
        let (dead, dead_rx) = ConnectionHandle::new("dead", 8);
        reg.register(dead.clone());
        reg.register(alive.clone());
        drop(dead_rx);

        let report = dispatcher
            .dispatch("room", &mut reg, &ServerMessage::status("one"))
            .await;
        assert_eq!(report, DispatchReport { delivered: 1, pruned: 1 });
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.snapshot()[0].id, alive.id);

        dispatcher
            .dispatch("room", &mut reg, &ServerMessage::status("two"))
            .await;
        assert!(alive_rx.try_recv().unwrap().contains("one"));
        assert!(alive_rx.try_recv().unwrap().contains("two"));
    }

    #[tokio::test]
    async fn stalled_connection_times_out_and_is_pruned() {
        let dispatcher = BroadcastDispatcher::new(Duration::from_millis(20));
        let mut reg = ConnectionRegistry::new();
        let (stalled, _stalled_rx) = ConnectionHandle::new("slow", 1);
        let (fast, mut fast_rx) = ConnectionHandle::new("fast", 8);
        reg.register(stalled);
        reg.register(fast);

        dispatcher.dispatch("room", &mut reg, &ServerMessage::status("fill")).await;
        let report = dispatcher.dispatch("room", &mut reg, &ServerMessage::status("overflow")).await;

        assert_eq!(report.pruned, 1);
        assert_eq!(reg.connections_for("slow"), 0);
        assert!(fast_rx.try_recv().unwrap().contains("fill"));
        assert!(fast_rx.try_recv().unwrap().contains("overflow"));
    }

    #[tokio::test]
    async fn empty_registry_is_a_no_op() {
        let dispatcher = BroadcastDispatcher::new(Duration::from_millis(20));
        let mut reg = ConnectionRegistry::new();
        let report = dispatcher.dispatch("room", &mut reg, &ServerMessage::status("x")).await;
        assert_eq!(report, DispatchReport::default());
    }
}
