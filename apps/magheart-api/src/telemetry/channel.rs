//! Latest-value cache plus publish/subscribe fan-out per telemetry key.
//!
//! The latest value lives in the `KeyValueStore` with a TTL, so a stale
//! reading reads as absent. Live events go to per-subscriber bounded queues:
//! a full queue drops the event for that subscriber only and the publisher
//! never waits.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use magheart_common::id::{prefix, PrefixedId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::db::kv::KeyValueStore;
use crate::error::ApiError;
use crate::models::heart_rate::HeartRateReading;

const LATEST_KEY_PREFIX: &str = "latest_heart_rate:";

/// One record of the push feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}

impl TelemetryEvent {
    pub const HEART_RATE: &'static str = "hr";

    pub fn heart_rate(reading: &HeartRateReading) -> Result<Self, ApiError> {
        Ok(Self {
            id: reading.ts.to_string(),
            event_type: Self::HEART_RATE.to_string(),
            data: serde_json::to_value(reading)?,
        })
    }
}

struct Subscriber {
    id: String,
    tx: mpsc::Sender<TelemetryEvent>,
}

type SubscriberMap = DashMap<String, Vec<Subscriber>>;

pub struct TelemetryChannel {
    kv: Arc<dyn KeyValueStore>,
    subscribers: Arc<SubscriberMap>,
    queue_capacity: usize,
}

impl TelemetryChannel {
    pub fn new(kv: Arc<dyn KeyValueStore>, queue_capacity: usize) -> Self {
        Self {
            kv,
            subscribers: Arc::new(DashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub async fn set_latest(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), ApiError> {
        let raw = serde_json::to_string(value)?;
        self.kv.set_ex(&latest_key(key), &raw, ttl).await
    }

    /// Most recent value for `key`, or `None` once it has expired.
    pub async fn get_latest(&self, key: &str) -> Result<Option<Value>, ApiError> {
        match self.kv.get(&latest_key(key)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Hand `event` to every current subscriber of `key`. Returns how many
    /// queues accepted it.
    pub fn publish(&self, key: &str, event: TelemetryEvent) -> usize {
        // Held for the whole pass so events of one key stay ordered.
        let Some(mut subs) = self.subscribers.get_mut(key) else {
            return 0;
        };

        let mut delivered = 0;
        subs.retain(|sub| match sub.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(key, sub_id = %sub.id, "subscriber queue full, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        let empty = subs.is_empty();
        drop(subs);
        if empty {
            self.subscribers.remove_if(key, |_, v| v.is_empty());
        }
        delivered
    }

    /// Start receiving events published to `key` from now on.
    pub fn subscribe(&self, key: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let id = Subscription::generate();
        self.subscribers
            .entry(key.to_string())
            .or_default()
            .push(Subscriber { id: id.clone(), tx });
        tracing::debug!(key, sub_id = %id, "feed subscriber added");

        Subscription {
            id,
            key: key.to_string(),
            rx,
            registry: self.subscribers.clone(),
            cancelled: false,
        }
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.subscribers.get(key).map(|s| s.len()).unwrap_or(0)
    }
}

fn latest_key(key: &str) -> String {
    format!("{LATEST_KEY_PREFIX}{key}")
}

/// A live subscription. Dropping it cancels.
pub struct Subscription {
    pub id: String,
    key: String,
    rx: mpsc::Receiver<TelemetryEvent>,
    registry: Arc<SubscriberMap>,
    cancelled: bool,
}

impl PrefixedId for Subscription {
    const PREFIX: &'static str = prefix::SUBSCRIPTION;
}

impl Subscription {
    /// Next event, or `None` after cancellation.
    pub async fn recv(&mut self) -> Option<TelemetryEvent> {
        if self.cancelled {
            return None;
        }
        self.rx.recv().await
    }

    /// Stop delivery immediately. Anything still queued is discarded.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.rx.close();

        if let Some(mut subs) = self.registry.get_mut(&self.key) {
            subs.retain(|s| s.id != self.id);
        }
        self.registry.remove_if(&self.key, |_, v| v.is_empty());
        tracing::debug!(key = %self.key, sub_id = %self.id, "feed subscriber removed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
