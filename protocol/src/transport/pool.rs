//! # Connection Pool
//!
//! Single-owner registry of open connections, indexed by connection id and
//! by peer. The manager's sweep task uses [`ConnectionPool::idle`] to find
//! links past the idle deadline and closes them; closed connections are
//! purged here.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use super::connection::{Connection, ReconnectPhase};

/// The pool.
#[derive(Debug, Default)]
pub struct ConnectionPool {
    by_id: DashMap<String, Arc<Connection>>,
    by_peer: DashMap<String, String>,
    reconnect: DashMap<String, ReconnectPhase>,
}

impl ConnectionPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection, indexing it by peer when the peer is known.
    pub fn insert(&self, connection: Arc<Connection>) {
        if let Some(peer) = &connection.peer_id {
            self.by_peer.insert(peer.clone(), connection.id.clone());
            self.reconnect
                .insert(peer.clone(), ReconnectPhase::Connected);
        }
        self.by_id.insert(connection.id.clone(), connection);
    }

    /// Connection by id.
    pub fn get(&self, connection_id: &str) -> Option<Arc<Connection>> {
        self.by_id.get(connection_id).map(|c| Arc::clone(&c))
    }

    /// Open connection for a peer, if pooled.
    pub fn for_peer(&self, peer_id: &str) -> Option<Arc<Connection>> {
        let connection_id = self.by_peer.get(peer_id)?.clone();
        let connection = self.get(&connection_id)?;
        if connection.is_open() {
            Some(connection)
        } else {
            None
        }
    }

    /// Removes a connection by id, cleaning the peer index.
    pub fn remove(&self, connection_id: &str) -> Option<Arc<Connection>> {
        let (_, connection) = self.by_id.remove(connection_id)?;
        if let Some(peer) = &connection.peer_id {
            self.by_peer
                .remove_if(peer, |_, mapped| mapped == connection_id);
        }
        Some(connection)
    }

    /// Every pooled connection.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.by_id.iter().map(|c| Arc::clone(&c)).collect()
    }

    /// Open connections idle beyond `timeout`.
    pub fn idle(&self, timeout: Duration) -> Vec<Arc<Connection>> {
        self.by_id
            .iter()
            .filter(|c| c.is_open() && c.idle_for() > timeout)
            .map(|c| Arc::clone(&c))
            .collect()
    }

    /// Reconnection phase for a peer. `Idle` when never linked.
    pub fn reconnect_phase(&self, peer_id: &str) -> ReconnectPhase {
        self.reconnect
            .get(peer_id)
            .map(|p| *p)
            .unwrap_or(ReconnectPhase::Idle)
    }

    /// Updates a peer's reconnection phase.
    pub fn set_reconnect_phase(&self, peer_id: &str, phase: ReconnectPhase) {
        self.reconnect.insert(peer_id.to_string(), phase);
    }

    /// Number of pooled connections.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Drops every connection handle.
    pub fn clear(&self) {
        self.by_id.clear();
        self.by_peer.clear();
        self.reconnect.clear();
    }
}
