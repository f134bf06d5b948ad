//! Request and response value types exchanged over the bridge.
//!
//! Both types are immutable records. A [`Request`] is built locally and
//! encoded for the wire; a [`Response`] only ever comes out of
//! [`crate::core::serialization::decode`].

use crate::error::{constants, ProtocolError, Result};
use std::fmt;
use uuid::Uuid;

/// Length of a request id in hex characters
pub const REQUEST_ID_LEN: usize = 16;

/// Frame type with its fixed wire code.
///
/// The numeric table is a versioned contract shared by both peers
/// (see [`crate::config::WIRE_VERSION`]); it is never negotiated at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Identification,
    Handshake,
    Message,
    Initialize,
    Error,
}

impl MessageType {
    /// Wire code for this type
    pub fn code(self) -> u8 {
        match self {
            MessageType::Identification => 0,
            MessageType::Handshake => 1,
            MessageType::Message => 2,
            MessageType::Initialize => 3,
            MessageType::Error => 4,
        }
    }

    /// Look up a type by wire code
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(MessageType::Identification),
            1 => Some(MessageType::Handshake),
            2 => Some(MessageType::Message),
            3 => Some(MessageType::Initialize),
            4 => Some(MessageType::Error),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Identification => "identification",
            MessageType::Handshake => "handshake",
            MessageType::Message => "message",
            MessageType::Initialize => "initialize",
            MessageType::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 16 lowercase hex character request id
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(String);

impl RequestId {
    /// Fresh id taken from a random UUID with the separators stripped
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(REQUEST_ID_LEN);
        Self(id)
    }

    /// Validate a caller-supplied or wire id
    pub fn parse(value: &str) -> Result<Self> {
        let valid = value.len() == REQUEST_ID_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));

        if !valid {
            return Err(ProtocolError::InvalidMessage(
                constants::ERR_INVALID_REQUEST_ID.into(),
            ));
        }
        Ok(Self(value.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    id: RequestId,
    kind: MessageType,
    content: String,
}

impl Request {
    /// Build a request with a freshly generated id
    pub fn new(kind: MessageType, content: impl Into<String>) -> Self {
        Self {
            id: RequestId::generate(),
            kind,
            content: content.into(),
        }
    }

    /// Build a request with a caller-chosen id
    pub fn with_id(id: RequestId, kind: MessageType, content: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            content: content.into(),
        }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// Inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    id: RequestId,
    kind: MessageType,
    content: String,
}

impl Response {
    pub(crate) fn new(id: RequestId, kind: MessageType, content: String) -> Self {
        Self { id, kind, content }
    }

    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn kind(&self) -> MessageType {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Consume the response and keep only its content
    pub fn into_content(self) -> String {
        self.content
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_hex() {
        for _ in 0..64 {
            let id = RequestId::generate();
            assert_eq!(id.as_str().len(), REQUEST_ID_LEN);
            assert!(RequestId::parse(id.as_str()).is_ok());
        }
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(RequestId::generate(), RequestId::generate());
    }

    #[test]
    fn test_rejects_malformed_ids() {
        assert!(RequestId::parse("").is_err());
        assert!(RequestId::parse("0123456789ABCDEF").is_err());
        assert!(RequestId::parse("0123456789abcde").is_err());
        assert!(RequestId::parse("0123456789abcdefa").is_err());
        assert!(RequestId::parse("0123456789abcdeg").is_err());
    }

    #[test]
    fn test_type_code_table() {
        let all = [
            MessageType::Identification,
            MessageType::Handshake,
            MessageType::Message,
            MessageType::Initialize,
            MessageType::Error,
        ];
        for (expected, kind) in all.iter().enumerate() {
            assert_eq!(kind.code() as usize, expected);
            assert_eq!(MessageType::from_code(expected as u64), Some(*kind));
        }
        assert_eq!(MessageType::from_code(5), None);
    }

    #[test]
    fn test_caller_supplied_id_is_kept() {
        let id = RequestId::parse("00000000deadbeef").unwrap();
        let request = Request::with_id(id.clone(), MessageType::Message, "{}");
        assert_eq!(request.id(), &id);
        assert_eq!(request.kind(), MessageType::Message);
        assert_eq!(request.content(), "{}");
    }
}
