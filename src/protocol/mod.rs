//! # Protocol Layer
//!
//! Frame types, identification/handshake, and request correlation.
//!
//! ## Components
//! - **Message**: `Request` / `Response` records and the type-code table
//! - **Handshake**: identification frames and one-shot nonce-offset rotation
//! - **Mailbox**: single-slot handoff between a waiting caller and the reader
//! - **Ledger**: outstanding request id → mailbox
//! - **Dispatcher**: bounded pool running per-frame handling

pub mod dispatcher;
pub mod handshake;
pub mod ledger;
pub mod mailbox;
pub mod message;
