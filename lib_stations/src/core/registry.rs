//! # Connection Registry
//!
//! The set of currently open connections. A connection is present from the moment it
//! is accepted until its teardown runs; the liveness monitor sweeps it and the
//! shutdown coordinator closes it.
//!
//! The registry is an owned value living inside the server context, never a static.
//! It also publishes its size on a `watch` channel so shutdown can wait for the last
//! connection to leave, and it can be *sealed* so late upgrades are refused while
//! sockets are being closed.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::core::connection::{ConnectionId, ConnectionState};

pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<ConnectionState>>>,
    next_id: AtomicU64,
    count: watch::Sender<usize>,
    sealed: AtomicBool,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            count,
            sealed: AtomicBool::new(false),
        }
    }

    /// Hands out the next connection id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers an accepted connection. Refused once the registry is sealed.
    pub fn insert(&self, conn: Arc<ConnectionState>) -> bool {
        let mut connections = self.lock();
        if self.is_sealed() {
            return false;
        }
        connections.insert(conn.id(), conn);
        self.count.send_replace(connections.len());
        true
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionState>> {
        let mut connections = self.lock();
        let removed = connections.remove(&id);
        self.count.send_replace(connections.len());
        removed
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionState>> {
        self.lock().get(&id).cloned()
    }

    /// A point-in-time copy of every registered connection, so callers never hold the
    /// registry lock while touching a connection.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionState>> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Stops accepting new connections.
    pub fn seal(&self) {
        let _connections = self.lock();
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Seals the registry and asks every connection to close. Returns how many were
    /// asked.
    pub fn close_all(&self) -> usize {
        self.seal();
        let connections = self.snapshot();
        for conn in &connections {
            conn.request_close();
        }
        connections.len()
    }

    /// Resolves once no connection is registered.
    pub async fn wait_empty(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|count| *count == 0).await;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<ConnectionState>>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::Outbound;
    use std::time::Duration;

    fn connection(registry: &ConnectionRegistry) -> Arc<ConnectionState> {
        let (conn, _rx) = ConnectionState::new(registry.next_id(), None);
        Arc::new(conn)
    }

    #[test]
    fn ids_are_unique() {
        let registry = ConnectionRegistry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn insert_remove_and_snapshot() {
        let registry = ConnectionRegistry::new();
        let a = connection(&registry);
        let b = connection(&registry);
        assert!(registry.insert(Arc::clone(&a)));
        assert!(registry.insert(Arc::clone(&b)));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.snapshot().len(), 2);

        assert!(registry.remove(a.id()).is_some());
        assert!(registry.remove(a.id()).is_none());
        assert!(registry.get(b.id()).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn sealed_registry_refuses_inserts() {
        let registry = ConnectionRegistry::new();
        registry.seal();
        assert!(!registry.insert(connection(&registry)));
        assert!(registry.is_empty());
    }

    #[test]
    fn close_all_asks_everyone_to_close() {
        let registry = ConnectionRegistry::new();
        let (conn, mut rx) = ConnectionState::new(registry.next_id(), None);
        registry.insert(Arc::new(conn));

        assert_eq!(registry.close_all(), 1);
        assert!(registry.is_sealed());
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[tokio::test]
    async fn wait_empty_resolves_after_last_removal() {
        let registry = Arc::new(ConnectionRegistry::new());
        let conn = connection(&registry);
        registry.insert(Arc::clone(&conn));

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_empty().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        registry.remove(conn.id());
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("wait_empty should resolve")
            .unwrap();
    }

    #[tokio::test]
    async fn wait_empty_on_empty_registry_is_immediate() {
        let registry = ConnectionRegistry::new();
        tokio::time::timeout(Duration::from_millis(100), registry.wait_empty())
            .await
            .unwrap();
    }
}
