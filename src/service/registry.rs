use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::service::connection::Connection;

/// Identified connections keyed by public id.
///
/// One live connection per peer: registering a public id that is already
/// present displaces the earlier connection, which the caller closes.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identified connection. Returns the connection it displaced.
    pub fn insert(&self, connection: Arc<Connection>) -> Option<Arc<Connection>> {
        let public_id = connection.public_id()?.to_owned();
        let displaced = self.connections.insert(public_id.clone(), connection)?;
        info!(public_id = %public_id, old = displaced.id(), "Peer reconnected; replacing connection");
        Some(displaced)
    }

    /// Unregister `connection` unless a newer one already took its public id
    pub fn remove(&self, connection: &Connection) -> bool {
        let Some(public_id) = connection.public_id() else {
            return false;
        };
        self.connections
            .remove_if(public_id, |_, current| current.id() == connection.id())
            .is_some()
    }

    pub fn get(&self, public_id: &str) -> Option<Arc<Connection>> {
        self.connections.get(public_id).map(|entry| entry.value().clone())
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Expire outstanding requests past their deadline on every connection
    pub fn sweep_requests(&self, now: Instant) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().ledger().sweep_expired(now))
            .sum()
    }
}
