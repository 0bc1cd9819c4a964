//! Background staleness sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::db::kv::KeyValueStore;

use super::presence::PresenceEngine;

/// Periodically run `cleanup_stale` over every live meeting and purge
/// expired cache keys. Runs until the returned task is aborted.
pub fn spawn(
    presence: Arc<PresenceEngine>,
    kv: Arc<dyn KeyValueStore>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // First tick fires immediately; skip it.

        loop {
            ticker.tick().await;

            let summary = presence.sweep_all().await;
            if summary.marked_offline > 0 || summary.removed > 0 {
                tracing::info!(
                    meetings = summary.meetings,
                    marked_offline = summary.marked_offline,
                    removed = summary.removed,
                    "presence sweep"
                );
            }

            match kv.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!(purged = n, "expired cache keys dropped"),
                Err(e) => tracing::warn!(error = %e, "cache purge failed"),
            }
        }
    })
}
