//! Identification and nonce-offset handshake.
//!
//! The session opens with one plain `identification` frame from the
//! initiating side whose content is its public id. Once the accepting side
//! has resolved the id to a shared secret it rotates its nonce offsets and
//! announces them in a `handshake` frame encrypted under the session-start
//! offsets. From then on both sides use the announced offsets.
//!
//! Both halves are plain functions over an [`Encryption`] so the flow can be
//! exercised without sockets.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::core::serialization;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{MessageType, Request, Response};
use crate::utils::crypto::{Encryption, NonceIndices};

/// Content of a `handshake` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub indices: NonceIndices,
}

/// Plain identification frame body sent by the initiating side
pub fn identification_frame(public_id: &str) -> Result<Vec<u8>> {
    serialization::encode(&Request::new(MessageType::Identification, public_id))
}

/// Extract the public id from the first frame of a session
///
/// # Errors
/// `InvalidMessage` for undecodable bytes, `ProtocolViolation` if the frame
/// is not an identification frame.
pub fn parse_identification(body: &[u8]) -> Result<String> {
    let frame = serialization::decode(body)?;
    if frame.kind() != MessageType::Identification {
        return Err(ProtocolError::ProtocolViolation(
            constants::ERR_EXPECTED_IDENTIFICATION.into(),
        ));
    }
    Ok(frame.into_content().trim().to_owned())
}

/// Rotate the accepting side's offsets and build the handshake frame body.
///
/// The body is encrypted under the offsets in force *before* the rotation,
/// since the peer does not know the new ones yet.
///
/// # Errors
/// Returns `ProtocolError::ProtocolViolation` if this engine was already rotated.
#[instrument(skip(encryption))]
pub fn server_handshake(encryption: &Encryption) -> Result<Vec<u8>> {
    let previous = encryption.regenerate_nonce_indices().ok_or_else(|| {
        ProtocolError::ProtocolViolation("Nonce offsets were already rotated".into())
    })?;

    let payload = HandshakePayload {
        indices: encryption.nonce_indices(),
    };
    let request = Request::new(MessageType::Handshake, serde_json::to_string(&payload)?);
    let plaintext = serialization::encode(&request)?;

    debug!(id = %request.id(), "Handshake prepared");
    encryption.encrypt_with(&plaintext, &previous)
}

/// Install the offsets announced by a decrypted handshake frame.
///
/// # Errors
/// `ProtocolViolation` for a non-handshake frame, a malformed payload, or a
/// second handshake on the same session.
#[instrument(skip(encryption, frame), fields(id = %frame.id()))]
pub fn client_apply_handshake(encryption: &Encryption, frame: &Response) -> Result<NonceIndices> {
    if frame.kind() != MessageType::Handshake {
        return Err(ProtocolError::ProtocolViolation(format!(
            "Expected handshake, got {}",
            frame.kind()
        )));
    }

    let payload: HandshakePayload = serde_json::from_str(frame.content()).map_err(|e| {
        ProtocolError::ProtocolViolation(format!("{}: {e}", constants::ERR_INVALID_HANDSHAKE))
    })?;

    if !encryption.adopt_nonce_indices(payload.indices.clone()) {
        return Err(ProtocolError::ProtocolViolation(
            "Handshake received twice".into(),
        ));
    }

    debug!("Handshake applied");
    Ok(payload.indices)
}
