//! Initiating side (game server).
//!
//! Dials the orchestrator, identifies with its public id in a plain frame,
//! adopts the nonce offsets announced by the handshake and becomes ready on
//! `initialize`, which is passed to the [`InboundHandler`] like any other
//! inbound request.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{info, instrument, warn};

use crate::config::BridgeConfig;
use crate::core::codec::FrameCodec;
use crate::core::serialization::ContentEncoding;
use crate::error::Result;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake;
use crate::protocol::message::{MessageType, Response};
use crate::service::connection::{Connection, ConnectionSettings, ConnectionState, Role};
use crate::service::handler::InboundHandler;
use crate::service::overseer::Overseer;
use crate::service::peer::PeerIdentity;
use crate::service::registry::ConnectionRegistry;
use crate::service::session::SessionContext;
use crate::transport::socket;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout_error;

pub struct Client {
    connection: Arc<Connection>,
    context: Arc<SessionContext>,
    overseer: Overseer,
}

impl Client {
    /// Dial `config.client.address` and identify as `credentials`
    ///
    /// # Errors
    /// `Timeout` if the dial exceeds the connection timeout, I/O errors from
    /// the dial, or `InvalidKey` for a too-short shared secret.
    #[instrument(skip_all, fields(address = %config.client.address, public_id = %credentials.public_id()))]
    pub async fn connect(
        config: &BridgeConfig,
        credentials: PeerIdentity,
        handler: impl InboundHandler,
    ) -> Result<Self> {
        let stream = with_timeout_error(
            async { Ok(TcpStream::connect(&config.client.address).await?) },
            config.client.connection_timeout,
        )
        .await?;

        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        let peer_addr = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| config.client.address.clone());

        Self::from_stream(config, stream, peer_addr, credentials, handler).await
    }

    /// Run the initiating side over an already connected stream
    pub async fn from_stream<S>(
        config: &BridgeConfig,
        stream: S,
        peer_addr: String,
        credentials: PeerIdentity,
        handler: impl InboundHandler,
    ) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let settings = ConnectionSettings {
            response_timeout: config.transport.response_timeout,
            reply_grace: config.overseer.request_sweep_interval,
            content_encoding: ContentEncoding::CodePoints,
        };
        let context = Arc::new(SessionContext::new(
            Role::Initiating,
            Dispatcher::new(config.server.worker_limit),
            Arc::new(handler),
            None,
            Arc::new(ConnectionRegistry::new()),
            None,
            Arc::new(Metrics::new()),
            settings,
            config.transport.read_poll_interval,
        ));

        let (reader, writer) = socket::split(
            stream,
            FrameCodec::new(config.transport.max_frame_size),
            config.transport.write_timeout,
        );
        let connection = Arc::new(Connection::new(
            context.next_connection_id(),
            Role::Initiating,
            peer_addr,
            writer,
            settings,
            context.metrics.clone(),
        ));
        context.metrics.connection_opened();

        let public_id = credentials.public_id().to_owned();
        connection.identify(credentials)?;
        connection
            .write_raw(&handshake::identification_frame(&public_id)?)
            .await?;
        info!(public_id = %public_id, "Identification sent");

        context.registry.insert(connection.clone());
        let overseer = Overseer::requests(
            context.registry.clone(),
            config.overseer.request_sweep_interval,
            context.metrics.clone(),
        );
        tokio::spawn(context.clone().run(connection.clone(), reader));

        Ok(Self {
            connection,
            context,
            overseer,
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.context.metrics
    }

    /// Wait for the peer's `initialize`
    pub async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        self.connection.wait_ready(timeout).await
    }

    pub async fn send_request(
        &self,
        kind: MessageType,
        content: impl Into<String>,
        wait_for_response: bool,
    ) -> Result<Option<Response>> {
        self.connection.send_request(kind, content, wait_for_response).await
    }

    pub async fn close(&self) {
        self.connection.close("client closed").await;
        self.overseer.stop().await;
        self.context.dispatcher.close();
    }
}
