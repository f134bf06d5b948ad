//! # Error Types
//!
//! Error handling for the bridge protocol.
//!
//! This module defines every error variant that can occur while framing,
//! encrypting, identifying and correlating traffic between the orchestrator
//! and its game-server agents.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures and closed streams
//! - **Framing Errors**: malformed envelopes, oversized frames
//! - **Cryptographic Errors**: tag mismatch, malformed base64 body, bad nonce offsets
//! - **Identification Errors**: unknown public ids
//! - **Correlation Errors**: request timeouts, duplicate request ids
//!
//! Timeouts are local to one outstanding request. Everything classified by
//! [`ProtocolError::is_fatal`] closes the connection it happened on.
//!
//! ## Example Usage
//! ```rust
//! use bridge_protocol::error::{ProtocolError, Result};
//!
//! fn parse_code(code: u8) -> Result<u8> {
//!     if code > 4 {
//!         return Err(ProtocolError::InvalidMessage(format!("unknown type code {code}")));
//!     }
//!     Ok(code)
//! }
//!
//! assert!(parse_code(9).is_err());
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_MISSING_FIELD: &str = "Envelope is missing a required field";
    pub const ERR_INVALID_REQUEST_ID: &str = "Request id must be 16 lowercase hex characters";
    pub const ERR_INVALID_CODE_POINT: &str = "Content contains an invalid code point";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_NOT_IDENTIFIED: &str = "Connection has not completed identification";
    pub const ERR_LOBBY_EXPIRED: &str = "Identification grace period elapsed";

    /// Protocol state errors
    pub const ERR_IDENTIFICATION_AFTER_LOBBY: &str = "Identification received after the lobby stage";
    pub const ERR_EXPECTED_IDENTIFICATION: &str = "First frame must be an identification frame";
    pub const ERR_UNSOLICITED_INITIALIZE: &str = "Initialize frame does not answer a pending request";
    pub const ERR_INVALID_HANDSHAKE: &str = "Handshake payload is malformed";

    /// Cryptographic errors
    pub const ERR_KEY_TOO_SHORT: &str = "Key material must be at least 32 bytes";
    pub const ERR_NONCE_INDEX_COUNT: &str = "Exactly 12 nonce offsets are required";
    pub const ERR_NONCE_INDEX_RANGE: &str = "Nonce offset out of range";
    pub const ERR_NONCE_INDEX_DUPLICATE: &str = "Nonce offsets must be distinct";
}

/// ProtocolError is the primary error type for all bridge operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Invalid access key: {0}")]
    InvalidAccessKey(String),

    #[error("Decryption failed")]
    DecryptionError,

    #[error("Encryption failed")]
    EncryptionError,

    #[error("Invalid base64 body")]
    InvalidBase64,

    #[error("Invalid nonce: {0}")]
    InvalidNonce(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Duplicate request id: {0}")]
    DuplicateRequestId(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Remote peer reported an error: {0}")]
    RemoteError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error must close the connection it occurred on.
    ///
    /// Timeouts and id collisions only fail the one request involved.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProtocolError::Timeout
                | ProtocolError::DuplicateRequestId(_)
                | ProtocolError::ConfigError(_)
        )
    }

    /// Whether the error originates from the cryptographic framing layer
    pub fn is_cryptographic(&self) -> bool {
        matches!(
            self,
            ProtocolError::DecryptionError
                | ProtocolError::EncryptionError
                | ProtocolError::InvalidBase64
                | ProtocolError::InvalidNonce(_)
                | ProtocolError::InvalidKey(_)
        )
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        ProtocolError::InvalidMessage(err.to_string())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_local() {
        assert!(!ProtocolError::Timeout.is_fatal());
        assert!(!ProtocolError::DuplicateRequestId("abc".into()).is_fatal());
    }

    #[test]
    fn test_crypto_and_identification_are_fatal() {
        assert!(ProtocolError::DecryptionError.is_fatal());
        assert!(ProtocolError::InvalidBase64.is_fatal());
        assert!(ProtocolError::InvalidAccessKey("nope".into()).is_fatal());
        assert!(ProtocolError::ProtocolViolation("x".into()).is_fatal());
        assert!(ProtocolError::InvalidBase64.is_cryptographic());
        assert!(!ProtocolError::Timeout.is_cryptographic());
    }
}
