//! Live-connection registry.
//!
//! The registry belongs to the accept loop and is only ever touched from it:
//! an entry is inserted before the connection's supervisor is spawned and
//! removed when the supervisor reports back. Being single-owner, it needs no
//! synchronisation.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::task::AbortHandle;

use crate::connection::ConnectionId;

/// Bookkeeping for one live connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    /// Client address as reported by `accept`.
    pub peer: SocketAddr,
    /// When the client was accepted.
    pub accepted_at: Instant,
    abort: Option<AbortHandle>,
}

impl ConnectionEntry {
    /// Time since the client was accepted.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.accepted_at.elapsed()
    }

    /// [`age`](Self::age) in whole milliseconds, saturating at `u64::MAX`.
    #[must_use]
    pub fn age_ms(&self) -> u64 {
        u64::try_from(self.age().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Map of connection id to live connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<ConnectionId, ConnectionEntry>,
    next_id: u64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next connection id and record the client.
    pub fn register(&mut self, peer: SocketAddr) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            ConnectionEntry {
                peer,
                accepted_at: Instant::now(),
                abort: None,
            },
        );
        id
    }

    /// Attach the supervisor task so a forced shutdown can abort it.
    pub fn attach(&mut self, id: ConnectionId, abort: AbortHandle) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.abort = Some(abort);
        }
    }

    /// Remove a finished connection.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
        self.entries.remove(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total ids handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next_id
    }

    /// Abort every remaining supervisor and empty the registry.
    ///
    /// Returns the number of connections that were aborted.
    pub fn abort_all(&mut self) -> usize {
        let aborted = self.entries.len();
        for (id, entry) in self.entries.drain() {
            tracing::warn!(
                conn_id = %id,
                peer = %entry.peer,
                age_ms = entry.age_ms(),
                "aborting connection"
            );
            if let Some(abort) = entry.abort {
                abort.abort();
            }
        }
        aborted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[test]
    fn test_ids_are_unique_and_sequential() {
        let mut registry = ConnectionRegistry::new();
        let a = registry.register(peer());
        let b = registry.register(peer());
        assert_eq!(a, ConnectionId(0));
        assert_eq!(b, ConnectionId(1));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.issued(), 2);
    }

    #[test]
    fn test_remove_is_exactly_once() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.register(peer());
        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    /// Ids are never reused after removal.
    #[test]
    fn test_ids_not_reused() {
        let mut registry = ConnectionRegistry::new();
        let first = registry.register(peer());
        registry.remove(first);
        let second = registry.register(peer());
        assert_ne!(first, second);
        assert_eq!(registry.remove(second).unwrap().peer, peer());
    }

    #[test]
    fn test_age_ms_reports_elapsed_millis() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.register(peer());
        let entry = registry.remove(id).unwrap();
        assert!(entry.age_ms() < 60_000);

        // An hour-old entry reports the full hour.
        let Some(accepted_at) = Instant::now().checked_sub(Duration::from_secs(3600)) else {
            return;
        };
        let old = ConnectionEntry {
            accepted_at,
            ..entry
        };
        assert!(old.age_ms() >= 3_600_000);
    }

    #[tokio::test]
    async fn test_abort_all_cancels_supervisors() {
        let mut registry = ConnectionRegistry::new();
        let id = registry.register(peer());
        let handle = tokio::spawn(std::future::pending::<()>());
        registry.attach(id, handle.abort_handle());

        assert_eq!(registry.abort_all(), 1);
        assert!(registry.is_empty());
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
