//! # Service Layer
//!
//! Both ends of a bridge session on top of the protocol layer.
//!
//! ## Components
//! - **Connection**: per-socket state machine, send/reply/close
//! - **Session**: read loop and frame routing
//! - **Lobby / Registry**: unidentified and identified connections
//! - **Overseer**: request-deadline and lobby-grace sweepers
//! - **Server / Client**: accepting and initiating ends
//! - **Peer / Handler**: collaborators supplied by the embedding process

pub mod client;
pub mod connection;
pub mod handler;
pub mod lobby;
pub mod overseer;
pub mod peer;
pub mod registry;
pub mod server;
mod session;
