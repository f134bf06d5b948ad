//! Read loop and frame routing shared by both ends.
//!
//! Ordering-sensitive steps run inline in the read loop: identification on
//! the accepting side, handshake adoption on the initiating side, and
//! fulfilment of outstanding requests. Everything else is handed to the
//! [`Dispatcher`] so slow application handlers never stall reading.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::core::serialization;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake;
use crate::protocol::message::{MessageType, Response};
use crate::service::connection::{Connection, ConnectionId, ConnectionSettings, ConnectionState, Role};
use crate::service::handler::InboundHandler;
use crate::service::lobby::Lobby;
use crate::service::peer::{PeerIdentity, PeerResolver};
use crate::service::registry::ConnectionRegistry;
use crate::transport::socket::SocketReader;
use crate::utils::metrics::Metrics;

pub(crate) struct SessionContext {
    pub role: Role,
    pub dispatcher: Dispatcher,
    pub handler: Arc<dyn InboundHandler>,
    /// Accepting side only
    pub resolver: Option<Arc<dyn PeerResolver>>,
    pub registry: Arc<ConnectionRegistry>,
    /// Accepting side only
    pub lobby: Option<Arc<Lobby>>,
    pub metrics: Arc<Metrics>,
    pub settings: ConnectionSettings,
    pub read_poll_interval: Duration,
    next_id: AtomicU64,
}

impl SessionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: Role,
        dispatcher: Dispatcher,
        handler: Arc<dyn InboundHandler>,
        resolver: Option<Arc<dyn PeerResolver>>,
        registry: Arc<ConnectionRegistry>,
        lobby: Option<Arc<Lobby>>,
        metrics: Arc<Metrics>,
        settings: ConnectionSettings,
        read_poll_interval: Duration,
    ) -> Self {
        Self {
            role,
            dispatcher,
            handler,
            resolver,
            registry,
            lobby,
            metrics,
            settings,
            read_poll_interval,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drive `connection` until it closes, then unregister it
    #[instrument(skip_all, fields(conn = connection.id(), peer = %connection.peer_addr()))]
    pub async fn run(self: Arc<Self>, connection: Arc<Connection>, mut reader: SocketReader) {
        loop {
            let read = tokio::select! {
                _ = connection.closed() => break,
                read = reader.read_frame(self.read_poll_interval) => read,
            };

            match read {
                Ok(None) => continue,
                Ok(Some(body)) => {
                    self.metrics.frame_received(body.len() as u64);
                    if let Err(e) = self.on_frame(&connection, body).await {
                        connection.fail(e).await;
                        break;
                    }
                }
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("Peer closed the stream");
                    break;
                }
                Err(e) => {
                    connection.fail(e).await;
                    break;
                }
            }
        }

        connection.close("read loop ended").await;
        self.forget(&connection);
        self.metrics.connection_closed();
    }

    fn forget(&self, connection: &Connection) {
        if let Some(lobby) = &self.lobby {
            lobby.release(connection.id());
        }
        self.registry.remove(connection);
    }

    /// Inline handling of one frame body. An error here is fatal.
    async fn on_frame(self: &Arc<Self>, connection: &Arc<Connection>, body: Bytes) -> Result<()> {
        if self.role == Role::Accepting && connection.state() == ConnectionState::Lobby {
            return self.identify(connection, &body).await;
        }

        let frame = self.open(connection, &body)?;

        if self.role == Role::Initiating && frame.kind() == MessageType::Handshake {
            handshake::client_apply_handshake(connection.encryption()?, &frame)?;
            connection.transition(ConnectionState::Identified, ConnectionState::HandshakeSent);
            info!(public_id = connection.public_id().unwrap_or("-"), "Nonce offsets adopted");
            return Ok(());
        }

        let frame = match frame.kind() {
            MessageType::Message | MessageType::Handshake | MessageType::Initialize => {
                match connection.ledger().fulfill(frame) {
                    Ok(answered) => {
                        self.metrics.request_fulfilled();
                        if answered == MessageType::Initialize {
                            self.mark_ready(connection);
                        }
                        return Ok(());
                    }
                    Err(unmatched) => unmatched,
                }
            }
            _ => frame,
        };

        match (frame.kind(), self.role) {
            (MessageType::Identification, _) => Err(ProtocolError::ProtocolViolation(
                constants::ERR_IDENTIFICATION_AFTER_LOBBY.into(),
            )),
            (MessageType::Error, _) => {
                let message = frame.content().to_owned();
                connection
                    .ledger()
                    .reject(frame.id(), ProtocolError::RemoteError(message.clone()));
                Err(ProtocolError::RemoteError(message))
            }
            (MessageType::Handshake, Role::Accepting) => {
                debug!(id = %frame.id(), "Unsolicited handshake dropped");
                Ok(())
            }
            (MessageType::Initialize, Role::Accepting) => Err(ProtocolError::ProtocolViolation(
                constants::ERR_UNSOLICITED_INITIALIZE.into(),
            )),
            // Ready once the handler's reply is written, see `Connection::reply`
            (MessageType::Initialize, Role::Initiating) => self.dispatch(connection, frame).await,
            (MessageType::Message, _) if self.accepts_application_frames(connection) => {
                self.dispatch(connection, frame).await
            }
            (MessageType::Message, _) => {
                warn!(id = %frame.id(), state = %connection.state(), "Message before ready dropped");
                Ok(())
            }
            (MessageType::Handshake, Role::Initiating) => Ok(()),
        }
    }

    /// Decrypt a frame body.
    ///
    /// Before the handshake the initiating side may receive a plain `error`
    /// frame from a peer that refused its identification.
    fn open(&self, connection: &Connection, body: &[u8]) -> Result<Response> {
        match connection.open(body) {
            Ok(frame) => Ok(frame),
            Err(e) if e.is_cryptographic() && self.role == Role::Initiating => {
                let rotated = connection.encryption().map(|enc| enc.is_rotated()).unwrap_or(false);
                if !rotated {
                    if let Ok(frame) = serialization::decode(body) {
                        if frame.kind() == MessageType::Error {
                            return Err(ProtocolError::RemoteError(frame.into_content()));
                        }
                    }
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Hand `frame` to the application handler on the worker pool
    async fn dispatch(&self, connection: &Arc<Connection>, frame: Response) -> Result<()> {
        let handler = self.handler.clone();
        let connection = connection.clone();
        self.dispatcher
            .submit(async move {
                let id = frame.id().clone();
                if let Err(e) = handler.handle(connection.clone(), frame).await {
                    if e.is_fatal() {
                        connection.fail(e).await;
                    } else {
                        warn!(conn = connection.id(), id = %id, error = %e, "Inbound handler failed");
                    }
                }
            })
            .await
    }

    /// Accepting side: resolve the first frame's public id, key the
    /// connection, announce rotated offsets and start `initialize`.
    async fn identify(self: &Arc<Self>, connection: &Arc<Connection>, body: &[u8]) -> Result<()> {
        let identified = self.resolve(connection, body);
        let identity = match identified {
            Ok(identity) => identity,
            Err(e) => {
                self.metrics.identification_failed();
                return Err(e);
            }
        };

        // Whoever takes the connection out of the lobby owns it; a sweep
        // that got there first is already closing it
        if let Some(lobby) = &self.lobby {
            if lobby.release(connection.id()).is_none() {
                debug!(conn = connection.id(), "Identification lost to the lobby sweep");
                return Err(ProtocolError::ConnectionClosed);
            }
        }

        let descriptor = identity.descriptor().to_string();
        connection.identify(identity)?;
        self.metrics.identification_success();

        if let Some(displaced) = self.registry.insert(connection.clone()) {
            displaced.close("replaced by a newer connection").await;
        }
        info!(public_id = connection.public_id().unwrap_or("-"), "Peer identified");

        let body = handshake::server_handshake(connection.encryption()?)?;
        connection.write_raw(&body).await?;
        connection.transition(ConnectionState::Identified, ConnectionState::HandshakeSent);

        // Runs off the read loop: its reply is fulfilled by this very loop,
        // which also marks the connection ready
        let connection = connection.clone();
        tokio::spawn(async move {
            if let Err(e) = connection.send_request(MessageType::Initialize, descriptor, true).await {
                connection.fail(e).await;
            }
        });

        Ok(())
    }

    /// The accepting side only sends application frames once our
    /// `initialize` reply reached it, which can overtake our own move to ready.
    fn accepts_application_frames(&self, connection: &Connection) -> bool {
        matches!(
            (self.role, connection.state()),
            (_, ConnectionState::Ready) | (Role::Initiating, ConnectionState::HandshakeSent)
        )
    }

    fn mark_ready(&self, connection: &Connection) {
        if connection.transition(ConnectionState::HandshakeSent, ConnectionState::Ready) {
            info!(public_id = connection.public_id().unwrap_or("-"), "Connection ready");
        }
    }

    fn resolve(&self, connection: &Connection, body: &[u8]) -> Result<PeerIdentity> {
        let public_id = handshake::parse_identification(body)?;
        let resolver = self.resolver.as_ref().ok_or_else(|| {
            ProtocolError::ProtocolViolation("No peer resolver configured".into())
        })?;

        resolver.resolve(&public_id).ok_or_else(|| {
            warn!(conn = connection.id(), public_id = %public_id, "Unknown public id");
            ProtocolError::InvalidAccessKey(public_id)
        })
    }
}
