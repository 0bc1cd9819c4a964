use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::ApiError;

/// Abstraction over a key-value store with per-key expiry.
///
/// Holds the cached latest telemetry reading. Only an in-process map is
/// shipped; the trait is the seam for an external cache.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ApiError>;
    async fn get(&self, key: &str) -> Result<Option<String>, ApiError>;

    /// Drop every expired key. Returns how many were removed.
    async fn purge_expired(&self) -> Result<usize, ApiError> {
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Slot {
    value: String,
    expires_at: Instant,
}

pub struct MemoryStore {
    data: Mutex<HashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), ApiError> {
        self.data.lock().insert(
            key.to_string(),
            Slot {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        let mut data = self.data.lock();
        match data.get(key) {
            Some(slot) if slot.expires_at > Instant::now() => Ok(Some(slot.value.clone())),
            Some(_) => {
                // Expired: evict lazily.
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn purge_expired(&self) -> Result<usize, ApiError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|_, slot| slot.expires_at > now);
        Ok(before - data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_returns_value_before_expiry() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn get_returns_none_after_expiry() {
        let store = MemoryStore::new();
        store.set_ex("k", "v", Duration::from_millis(20)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites_and_refreshes_ttl() {
        let store = MemoryStore::new();
        store.set_ex("k", "old", Duration::from_millis(20)).await.unwrap();
        store.set_ex("k", "new", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn purge_expired_drops_only_stale_keys() {
        let store = MemoryStore::new();
        store.set_ex("stale", "1", Duration::from_millis(10)).await.unwrap();
        store.set_ex("fresh", "2", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());
    }
}
