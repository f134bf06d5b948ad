//! Accepting side (orchestrator).
//!
//! Every accepted socket enters the [`Lobby`] and gets its own read loop.
//! Its first frame must identify a peer known to the [`PeerResolver`]; the
//! connection then moves to the [`ConnectionRegistry`], rotates its nonce
//! offsets and sends `initialize`. Two overseers run alongside the accept
//! loop: one expires overdue requests, the other evicts sockets that never
//! identified.

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::config::BridgeConfig;
use crate::core::codec::FrameCodec;
use crate::core::serialization::ContentEncoding;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::message::{MessageType, Response};
use crate::service::connection::{Connection, ConnectionSettings, Role};
use crate::service::handler::InboundHandler;
use crate::service::lobby::Lobby;
use crate::service::overseer::Overseer;
use crate::service::peer::PeerResolver;
use crate::service::registry::ConnectionRegistry;
use crate::service::session::SessionContext;
use crate::transport::socket;
use crate::utils::metrics::Metrics;

pub struct Server {
    config: BridgeConfig,
    context: Arc<SessionContext>,
    lobby: Arc<Lobby>,
}

impl Server {
    pub fn new(config: BridgeConfig, resolver: impl PeerResolver, handler: impl InboundHandler) -> Self {
        let lobby = Arc::new(Lobby::new());
        let settings = ConnectionSettings {
            response_timeout: config.transport.response_timeout,
            reply_grace: config.overseer.request_sweep_interval,
            content_encoding: ContentEncoding::Text,
        };
        let context = Arc::new(SessionContext::new(
            Role::Accepting,
            Dispatcher::new(config.server.worker_limit),
            Arc::new(handler),
            Some(Arc::new(resolver)),
            Arc::new(ConnectionRegistry::new()),
            Some(lobby.clone()),
            Arc::new(Metrics::new()),
            settings,
            config.transport.read_poll_interval,
        ));

        Self {
            config,
            context,
            lobby,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.context.registry
    }

    pub fn lobby(&self) -> &Arc<Lobby> {
        &self.lobby
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.context.metrics
    }

    /// The live connection of `public_id`, if it is identified
    pub fn connection(&self, public_id: &str) -> Option<Arc<Connection>> {
        self.context.registry.get(public_id)
    }

    /// Send a request to an identified peer
    ///
    /// # Errors
    /// `ConnectionClosed` if `public_id` has no live connection, otherwise
    /// whatever [`Connection::send_request`] reports.
    pub async fn send_to(
        &self,
        public_id: &str,
        kind: MessageType,
        content: impl Into<String>,
        wait_for_response: bool,
    ) -> Result<Option<Response>> {
        let connection = self.connection(public_id).ok_or(ProtocolError::ConnectionClosed)?;
        connection.send_request(kind, content, wait_for_response).await
    }

    /// Bind the configured address and serve until CTRL+C
    #[instrument(skip(self), fields(address = %self.config.server.address))]
    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.server.address).await?;

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run(listener, shutdown_rx).await
    }

    /// Serve `listener` until `shutdown_rx` fires or its sender is dropped
    #[instrument(skip_all)]
    pub async fn run(&self, listener: TcpListener, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let local = listener.local_addr()?;
        info!(address = %local, "Listening");

        let requests = Overseer::requests(
            self.context.registry.clone(),
            self.config.overseer.request_sweep_interval,
            self.context.metrics.clone(),
        );
        let lobby = Overseer::lobby(
            self.lobby.clone(),
            self.config.server.lobby_grace_period,
            self.config.overseer.lobby_sweep_interval,
            self.context.metrics.clone(),
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Shutting down server. Closing connections...");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(error = %e, "Failed to set TCP_NODELAY");
                            }
                            if self.live_connections() >= self.config.server.max_connections {
                                warn!(peer = %addr, limit = self.config.server.max_connections, "Connection limit reached; refusing");
                                continue;
                            }
                            self.accept(stream, addr.to_string());
                        }
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }

        requests.stop().await;
        lobby.stop().await;
        self.shutdown().await;
        Ok(())
    }

    /// Adopt an already connected stream as an accepted connection
    pub fn accept<S>(&self, stream: S, peer_addr: String) -> Arc<Connection>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = socket::split(
            stream,
            FrameCodec::new(self.config.transport.max_frame_size),
            self.config.transport.write_timeout,
        );
        let connection = Arc::new(Connection::new(
            self.context.next_connection_id(),
            Role::Accepting,
            peer_addr,
            writer,
            self.context.settings,
            self.context.metrics.clone(),
        ));

        self.context.metrics.connection_opened();
        self.lobby.admit(connection.clone());
        tokio::spawn(self.context.clone().run(connection.clone(), reader));
        connection
    }

    pub fn live_connections(&self) -> usize {
        self.lobby.len() + self.context.registry.len()
    }

    /// Close every connection and refuse further frame handling
    pub async fn shutdown(&self) {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let closing = async {
            self.lobby.close_all("server shutting down").await;
            for connection in self.context.registry.connections() {
                connection.close("server shutting down").await;
            }
        };

        if tokio::time::timeout(shutdown_timeout, closing).await.is_err() {
            warn!("Shutdown timeout reached, forcing exit");
        }
        self.context.dispatcher.close();
        self.context.metrics.log_metrics();
        info!("Server stopped");
    }
}
