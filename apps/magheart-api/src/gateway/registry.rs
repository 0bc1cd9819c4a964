//! Live connection bookkeeping for one meeting.

use std::sync::Arc;
use std::time::Duration;

use magheart_common::id::{prefix, PrefixedId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;

/// Serialized frame queued for a connection's writer.
pub type Outbound = Arc<str>;

/// Outbound frames buffered per connection before sends start timing out.
pub const CONNECTION_QUEUE_CAPACITY: usize = 256;

/// Why a frame could not be handed to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The writer side is gone (socket closed or task ended).
    Closed,
    /// The writer did not drain its queue in time.
    TimedOut,
}

/// Transport handle for one socket: the sending half of its writer queue.
///
/// Dropping every clone ends the writer, which closes the socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: String,
    pub user_id: String,
    tx: mpsc::Sender<Outbound>,
}

impl PrefixedId for ConnectionHandle {
    const PREFIX: &'static str = prefix::CONNECTION;
}

impl ConnectionHandle {
    /// Create a handle plus the receiver its writer task drains.
    pub fn new(user_id: &str, capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Self::generate(),
            user_id: user_id.to_string(),
            tx,
        };
        (handle, rx)
    }

    pub async fn send(&self, frame: Outbound, timeout: Duration) -> Result<(), SendFailure> {
        match self.tx.send_timeout(frame, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(SendFailure::Closed),
            Err(SendTimeoutError::Timeout(_)) => Err(SendFailure::TimedOut),
        }
    }
}

/// Connections of one meeting, kept in registration order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    conns: Vec<ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Presence is untouched.
    pub fn register(&mut self, handle: ConnectionHandle) {
        self.conns.push(handle);
    }

    /// Remove exactly the connection `conn_id` of `user_id`.
    /// Returns false if it was already gone.
    pub fn unregister(&mut self, user_id: &str, conn_id: &str) -> bool {
        let before = self.conns.len();
        self.conns.retain(|c| !(c.id == conn_id && c.user_id == user_id));
        self.conns.len() != before
    }

    /// Copy of the current handles, safe to iterate while the registry is
    /// modified.
    pub fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.conns.clone()
    }

    /// Drop every connection whose id is listed. Returns how many went.
    pub fn prune(&mut self, conn_ids: &[String]) -> usize {
        if conn_ids.is_empty() {
            return 0;
        }
        let before = self.conns.len();
        self.conns.retain(|c| !conn_ids.contains(&c.id));
        before - self.conns.len()
    }

    /// Drop all connections (their writers observe a closed queue).
    pub fn clear(&mut self) {
        self.conns.clear();
    }

    pub fn connections_for(&self, user_id: &str) -> usize {
        self.conns.iter().filter(|c| c.user_id == user_id).count()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}
