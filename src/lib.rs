//! # Bridge Protocol
//!
//! Encrypted request/response bridge between an orchestrator (the accepting
//! side) and remote game-server agents (the initiating side).
//!
//! Each session is a TCP stream of length-prefixed frames. Every frame after
//! the plain identification frame is ChaCha20-Poly1305 ciphertext, base64
//! encoded, with its 12 nonce bytes spliced in at offsets that the accepting
//! side rotates once per session during the handshake. Inside the ciphertext
//! is a small JSON envelope (`{"i": id, "t": type, "c": content}`); replies
//! carry the id of the request they answer.
//!
//! ## Layers
//! - [`core`]: stream framing and the JSON envelope
//! - [`protocol`]: message types, handshake, request ledger, worker pool
//! - [`service`]: connections, lobby, overseers, server and client
//! - [`transport`]: framed socket halves
//! - [`utils`]: cryptography, logging, metrics, timeouts
//!
//! ## Example
//! ```no_run
//! use bridge_protocol::config::BridgeConfig;
//! use bridge_protocol::protocol::message::Response;
//! use bridge_protocol::service::connection::Connection;
//! use bridge_protocol::service::peer::{PeerIdentity, StaticPeerDirectory};
//! use bridge_protocol::service::server::Server;
//! use std::sync::Arc;
//!
//! # async fn run() -> bridge_protocol::error::Result<()> {
//! let directory = StaticPeerDirectory::new();
//! directory.insert(PeerIdentity::new(
//!     "server-7f3a",
//!     vec![7u8; 32],
//!     serde_json::json!({"name": "EU #1"}),
//! ));
//!
//! let server = Server::new(
//!     BridgeConfig::default(),
//!     directory,
//!     |connection: Arc<Connection>, frame: Response| async move {
//!         connection.reply(&frame, "ack").await
//!     },
//! );
//! server.start().await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use error::{ProtocolError, Result};
pub use protocol::message::{MessageType, Request, RequestId, Response};
pub use service::client::Client;
pub use service::connection::{Connection, ConnectionState};
pub use service::server::Server;
