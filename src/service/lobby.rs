//! Holding area for accepted sockets that have not identified yet.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::constants;
use crate::service::connection::{Connection, ConnectionId};

#[derive(Debug, Default)]
pub struct Lobby {
    waiting: DashMap<ConnectionId, Arc<Connection>>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, connection: Arc<Connection>) {
        debug!(conn = connection.id(), peer = %connection.peer_addr(), "Connection entered lobby");
        self.waiting.insert(connection.id(), connection);
    }

    /// Take a connection out of the lobby, on identification or close
    pub fn release(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.waiting.remove(&id).map(|(_, connection)| connection)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.waiting.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Remove every connection waiting longer than `grace` at `now`
    pub fn evict_stale(&self, grace: Duration, now: Instant) -> Vec<Arc<Connection>> {
        let stale: Vec<ConnectionId> = self
            .waiting
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.value().accepted_at()) > grace)
            .map(|entry| *entry.key())
            .collect();

        stale.into_iter().filter_map(|id| self.release(id)).collect()
    }

    /// Close every connection that overstayed `grace`. Returns how many.
    pub async fn sweep(&self, grace: Duration) -> usize {
        let evicted = self.evict_stale(grace, Instant::now());
        for connection in &evicted {
            info!(conn = connection.id(), peer = %connection.peer_addr(), "Evicting unidentified connection");
            connection.send_error(constants::ERR_LOBBY_EXPIRED).await;
            connection.close(constants::ERR_LOBBY_EXPIRED).await;
        }
        evicted.len()
    }

    /// Close everything still waiting
    pub async fn close_all(&self, reason: &str) {
        let ids: Vec<ConnectionId> = self.waiting.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some(connection) = self.release(id) {
                connection.close(reason).await;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::core::codec::FrameCodec;
    use crate::core::serialization::ContentEncoding;
    use crate::service::connection::{ConnectionSettings, Role};
    use crate::transport::socket;
    use crate::utils::metrics::Metrics;

    fn accepted(id: ConnectionId) -> Arc<Connection> {
        let (near, _far) = tokio::io::duplex(1024);
        let (_reader, writer) = socket::split(near, FrameCodec::default(), Duration::from_secs(1));
        let settings = ConnectionSettings {
            response_timeout: Duration::from_secs(1),
            reply_grace: Duration::from_millis(10),
            content_encoding: ContentEncoding::Text,
        };
        Arc::new(Connection::new(id, Role::Accepting, format!("peer-{id}"), writer, settings, Arc::new(Metrics::new())))
    }

    #[tokio::test]
    async fn test_only_overdue_entries_are_evicted() {
        let lobby = Lobby::new();
        let older = accepted(1);
        lobby.admit(older.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        let younger = accepted(2);
        lobby.admit(younger.clone());

        let grace = Duration::from_millis(20);
        let now = younger.accepted_at() + Duration::from_millis(5);
        let evicted = lobby.evict_stale(grace, now);

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id(), older.id());
        assert!(!lobby.contains(older.id()));
        assert!(lobby.contains(younger.id()));
        assert_eq!(lobby.len(), 1);
    }

    #[tokio::test]
    async fn test_released_entry_is_not_evicted_again() {
        let lobby = Lobby::new();
        let connection = accepted(7);
        lobby.admit(connection.clone());

        assert!(lobby.release(connection.id()).is_some());
        assert!(lobby.release(connection.id()).is_none());

        let later = connection.accepted_at() + Duration::from_secs(60);
        assert!(lobby.evict_stale(Duration::from_millis(1), later).is_empty());
        assert!(lobby.is_empty());
    }
}
