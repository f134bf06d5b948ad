//! Per-socket connection state machine.
//!
//! ```text
//! accepting:   Lobby ──identify──▶ Identified ──handshake──▶ HandshakeSent ──initialize ok──▶ Ready
//! initiating:  Lobby ──identification sent──▶ Identified ──handshake──▶ HandshakeSent ──initialize──▶ Ready
//! ```
//!
//! Any state moves to `Closed` on a fatal fault or an explicit close, and
//! `Closed` is terminal. Closing cancels the read loop, shuts the write half
//! and fails every outstanding request with `ConnectionClosed`.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, instrument, warn};

use crate::core::serialization::{self, ContentEncoding};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::ledger::Ledger;
use crate::protocol::mailbox::Taken;
use crate::protocol::message::{MessageType, Request, Response};
use crate::service::peer::PeerIdentity;
use crate::transport::socket::SocketWriter;
use crate::utils::crypto::Encryption;
use crate::utils::metrics::Metrics;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Accepted, no identification seen yet
    Lobby,
    /// Keyed; handshake not yet exchanged
    Identified,
    /// Offsets rotated (accepting) or adopted (initiating)
    HandshakeSent,
    /// `initialize` completed; application traffic flows
    Ready,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Lobby => "lobby",
            ConnectionState::Identified => "identified",
            ConnectionState::HandshakeSent => "handshake-sent",
            ConnectionState::Ready => "ready",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Which end of the session this connection is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Orchestrator side: resolves peers and rotates offsets
    Accepting,
    /// Game-server side: identifies itself and adopts offsets
    Initiating,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ConnectionSettings {
    /// Ledger deadline of each outstanding request
    pub response_timeout: Duration,
    /// Extra time a waiting caller gives the request overseer
    pub reply_grace: Duration,
    pub content_encoding: ContentEncoding,
}

pub struct Connection {
    id: ConnectionId,
    role: Role,
    peer_addr: String,
    state: watch::Sender<ConnectionState>,
    identity: OnceLock<PeerIdentity>,
    encryption: OnceLock<Encryption>,
    ledger: Ledger,
    writer: SocketWriter,
    cancel: CancellationToken,
    accepted_at: Instant,
    settings: ConnectionSettings,
    metrics: Arc<Metrics>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        role: Role,
        peer_addr: String,
        writer: SocketWriter,
        settings: ConnectionSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Lobby);
        Self {
            id,
            role,
            peer_addr,
            state,
            identity: OnceLock::new(),
            encryption: OnceLock::new(),
            ledger: Ledger::new(),
            writer,
            cancel: CancellationToken::new(),
            accepted_at: Instant::now(),
            settings,
            metrics,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// The resolved peer (accepting side) or our own credentials (initiating side)
    pub fn identity(&self) -> Option<&PeerIdentity> {
        self.identity.get()
    }

    pub fn public_id(&self) -> Option<&str> {
        self.identity.get().map(PeerIdentity::public_id)
    }

    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Key material for this session
    ///
    /// # Errors
    /// `ProtocolViolation` before identification completed.
    pub fn encryption(&self) -> Result<&Encryption> {
        self.encryption
            .get()
            .ok_or_else(|| ProtocolError::ProtocolViolation(constants::ERR_NOT_IDENTIFIED.into()))
    }

    pub fn is_keyed(&self) -> bool {
        self.encryption.get().is_some()
    }

    /// Key the connection with `identity`'s shared secret and leave the lobby
    pub(crate) fn identify(&self, identity: PeerIdentity) -> Result<()> {
        let encryption = Encryption::new(identity.shared_secret())?;
        self.encryption.set(encryption).map_err(|_| {
            ProtocolError::ProtocolViolation("Connection is already identified".into())
        })?;
        let _ = self.identity.set(identity);

        if !self.transition(ConnectionState::Lobby, ConnectionState::Identified) {
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(())
    }

    /// Move `from` → `to`. Fails if the connection is in any other state.
    pub(crate) fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let moved = self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });
        if moved {
            debug!(conn = self.id, %from, %to, "State changed");
        }
        moved
    }

    /// Wait until the connection reaches `target`
    ///
    /// # Errors
    /// `ConnectionClosed` if it closes first, `Timeout` after `timeout`.
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> Result<()> {
        let mut updates = self.state.subscribe();
        let reached = tokio::time::timeout(
            timeout,
            updates.wait_for(|state| *state == target || *state == ConnectionState::Closed),
        )
        .await;

        match reached {
            Err(_) => Err(ProtocolError::Timeout),
            Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
            Ok(Ok(state)) if *state == target => Ok(()),
            Ok(Ok(_)) => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        self.wait_for_state(ConnectionState::Ready, timeout).await
    }

    /// Build and send a request of `kind` carrying `content`.
    ///
    /// With `wait_for_response` the call resolves with the correlated reply,
    /// otherwise with `None` once the frame is written.
    pub async fn send_request(
        &self,
        kind: MessageType,
        content: impl Into<String>,
        wait_for_response: bool,
    ) -> Result<Option<Response>> {
        self.send(Request::new(kind, content), wait_for_response).await
    }

    /// Encrypt and send `request`.
    ///
    /// # Errors
    /// - `ConnectionClosed` if the connection is closed, or closes while waiting
    /// - `DuplicateRequestId` if the id is already outstanding
    /// - `Timeout` if no reply arrives before the deadline
    /// - `RemoteError` if the peer answered with an `error` frame
    #[instrument(skip(self, request), fields(conn = self.id, id = %request.id(), kind = %request.kind()))]
    pub async fn send(&self, request: Request, wait_for_response: bool) -> Result<Option<Response>> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }

        if !wait_for_response {
            self.write_request(&request).await?;
            return Ok(None);
        }

        let mailbox = self.ledger.add(&request, self.settings.response_timeout)?;
        // A close racing the insert above has already drained the ledger
        if self.is_closed() {
            self.ledger.reject(request.id(), ProtocolError::ConnectionClosed);
        }

        if let Err(e) = self.write_request(&request).await {
            self.ledger.remove(request.id());
            return Err(e);
        }

        let wait = self.settings.response_timeout + self.settings.reply_grace;
        match mailbox.take(wait).await {
            Taken::Value(Ok(response)) => Ok(Some(response)),
            Taken::Value(Err(e)) => Err(e),
            Taken::TimedOut => {
                if self.ledger.remove(request.id()) {
                    self.metrics.requests_expired(1);
                }
                Err(ProtocolError::Timeout)
            }
        }
    }

    /// Answer the peer request `to` with a `message` frame carrying the same id.
    ///
    /// On the initiating side, answering `initialize` is what makes the
    /// connection ready: the reply is on the wire before any request a
    /// ready-waiter sends afterwards.
    pub async fn reply(&self, to: &Response, content: impl Into<String>) -> Result<()> {
        let answer = Request::with_id(to.id().clone(), MessageType::Message, content);
        self.send(answer, false).await?;

        if self.role == Role::Initiating
            && to.kind() == MessageType::Initialize
            && self.transition(ConnectionState::HandshakeSent, ConnectionState::Ready)
        {
            info!(conn = self.id, public_id = self.public_id().unwrap_or("-"), "Connection ready");
        }
        Ok(())
    }

    /// Decrypt and decode one inbound frame body
    pub(crate) fn open(&self, body: &[u8]) -> Result<Response> {
        let plaintext = self.encryption()?.decrypt(body)?;
        serialization::decode(&plaintext)
    }

    pub(crate) async fn write_request(&self, request: &Request) -> Result<()> {
        let plaintext = serialization::encode_with(request, self.settings.content_encoding)?;
        let body = self.encryption()?.encrypt(&plaintext)?;
        self.write_raw(&body).await
    }

    /// Send `request` as a plain, unencrypted envelope
    pub(crate) async fn write_plain(&self, request: &Request) -> Result<()> {
        let body = serialization::encode(request)?;
        self.write_raw(&body).await
    }

    /// Write an already framed body. A stalled writer closes the connection.
    pub(crate) async fn write_raw(&self, body: &[u8]) -> Result<()> {
        if let Err(e) = self.writer.write_frame(body).await {
            if self.writer.is_stalled() {
                self.close("frame write timed out").await;
            }
            return Err(e);
        }
        self.metrics.frame_sent(body.len() as u64);
        Ok(())
    }

    /// Best-effort `error` frame, encrypted once keyed and plain before
    pub async fn send_error(&self, message: &str) {
        let notice = Request::new(MessageType::Error, message);
        let sent = if self.is_keyed() {
            self.write_request(&notice).await
        } else {
            self.write_plain(&notice).await
        };

        if let Err(e) = sent {
            debug!(conn = self.id, error = %e, "Error frame not delivered");
        }
    }

    /// Report a fatal fault to the peer and close
    pub async fn fail(&self, error: ProtocolError) {
        if self.is_closed() {
            return;
        }

        warn!(conn = self.id, peer = %self.peer_addr, error = %error, "Connection fault");
        self.metrics.protocol_error();

        if !matches!(
            error,
            ProtocolError::ConnectionClosed | ProtocolError::Io(_) | ProtocolError::RemoteError(_)
        ) {
            self.send_error(&error.to_string()).await;
        }
        self.close(&error.to_string()).await;
    }

    /// Close the connection. Returns `false` if it was already closed.
    pub async fn close(&self, reason: &str) -> bool {
        if self.state.send_replace(ConnectionState::Closed) == ConnectionState::Closed {
            return false;
        }

        self.cancel.cancel();
        let rejected = self.ledger.drain(|| ProtocolError::ConnectionClosed);
        self.writer.shutdown().await;

        info!(
            conn = self.id,
            peer = %self.peer_addr,
            public_id = self.public_id().unwrap_or("-"),
            reason,
            rejected,
            "Connection closed"
        );
        true
    }

    /// Resolves once the connection is closed
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("public_id", &self.public_id())
            .field("outstanding", &self.ledger.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::core::codec::FrameCodec;
    use crate::transport::socket::{self, SocketReader};

    const SECRET: &[u8] = b"connection-test-secret-of-32-bytes!";

    fn settings() -> ConnectionSettings {
        ConnectionSettings {
            response_timeout: Duration::from_millis(100),
            reply_grace: Duration::from_millis(20),
            content_encoding: ContentEncoding::Text,
        }
    }

    fn pair() -> (Arc<Connection>, (SocketReader, SocketWriter)) {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (_near_reader, near_writer) = socket::split(near, FrameCodec::default(), Duration::from_secs(1));
        let far = socket::split(far, FrameCodec::default(), Duration::from_secs(1));
        let connection = Connection::new(
            1,
            Role::Accepting,
            "test".into(),
            near_writer,
            settings(),
            Arc::new(Metrics::new()),
        );
        (Arc::new(connection), far)
    }

    #[tokio::test]
    async fn test_starts_in_lobby_unkeyed() {
        let (connection, _far) = pair();
        assert_eq!(connection.state(), ConnectionState::Lobby);
        assert!(connection.encryption().is_err());
        assert!(connection.public_id().is_none());
    }

    #[tokio::test]
    async fn test_identify_keys_and_advances() {
        let (connection, _far) = pair();
        connection
            .identify(PeerIdentity::new("peer-1", SECRET.to_vec(), serde_json::Value::Null))
            .unwrap();

        assert_eq!(connection.state(), ConnectionState::Identified);
        assert_eq!(connection.public_id(), Some("peer-1"));
        assert!(connection.encryption().is_ok());

        // Second identification is refused
        assert!(connection
            .identify(PeerIdentity::new("peer-1", SECRET.to_vec(), serde_json::Value::Null))
            .is_err());
    }

    #[tokio::test]
    async fn test_short_secret_refused() {
        let (connection, _far) = pair();
        let result = connection.identify(PeerIdentity::new("peer-1", b"short".to_vec(), serde_json::Value::Null));
        assert!(matches!(result, Err(ProtocolError::InvalidKey(_))));
        assert_eq!(connection.state(), ConnectionState::Lobby);
    }

    #[tokio::test]
    async fn test_transition_requires_expected_state() {
        let (connection, _far) = pair();
        assert!(!connection.transition(ConnectionState::Identified, ConnectionState::Ready));
        assert!(connection.transition(ConnectionState::Lobby, ConnectionState::Identified));
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_idempotent() {
        let (connection, _far) = pair();
        assert!(connection.close("test").await);
        assert!(!connection.close("again").await);
        assert!(connection.is_closed());
        assert!(!connection.transition(ConnectionState::Lobby, ConnectionState::Identified));

        let sent = connection.send_request(MessageType::Message, "late", false).await;
        assert!(matches!(sent, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_fails_waiting_request() {
        let (connection, (mut far, _far_writer)) = pair();
        connection
            .identify(PeerIdentity::new("peer-1", SECRET.to_vec(), serde_json::Value::Null))
            .unwrap();

        let waiter = {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection.send_request(MessageType::Message, "ping", true).await
            })
        };

        // Request reached the wire
        far.read_frame(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(connection.ledger().len(), 1);

        connection.close("test").await;
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
        assert!(connection.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let (connection, _far) = pair();
        connection
            .identify(PeerIdentity::new("peer-1", SECRET.to_vec(), serde_json::Value::Null))
            .unwrap();

        let result = connection.send_request(MessageType::Message, "ping", true).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
        assert!(connection.ledger().is_empty());
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn test_write_timeout_closes_connection() {
        let (near, _far) = tokio::io::duplex(16);
        let (_reader, writer) = socket::split(near, FrameCodec::default(), Duration::from_millis(20));
        let connection = Connection::new(2, Role::Accepting, "test".into(), writer, settings(), Arc::new(Metrics::new()));
        connection
            .identify(PeerIdentity::new("peer-1", SECRET.to_vec(), serde_json::Value::Null))
            .unwrap();

        let result = connection.send_request(MessageType::Message, "x".repeat(4096), true).await;
        assert!(matches!(result, Err(ProtocolError::Io(_))));
        assert!(connection.is_closed());
        assert!(connection.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_state_sees_close() {
        let (connection, _far) = pair();
        let waiter = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.wait_ready(Duration::from_secs(2)).await })
        };
        tokio::task::yield_now().await;
        connection.close("test").await;
        assert!(matches!(waiter.await.unwrap(), Err(ProtocolError::ConnectionClosed)));
    }
}
