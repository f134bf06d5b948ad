//! # Wire Codec
//!
//! Converts [`Request`] values into the JSON envelope carried inside every
//! frame, and inbound envelopes back into [`Response`] values.
//!
//! ## Envelope
//! ```text
//! {"i": "<16 hex id>", "t": <type code>, "c": <content>}
//! ```
//!
//! `c` is either a JSON string or an array of Unicode code points. Agents
//! written against the original wire format send the code-point form, so
//! decoding accepts both and the initiating side encodes with
//! [`ContentEncoding::CodePoints`].

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::message::{MessageType, Request, RequestId, Response};
use serde::{Deserialize, Serialize};

/// How the `c` field is written on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentEncoding {
    /// Plain JSON string (default)
    #[default]
    Text,
    /// Array of Unicode scalar values
    CodePoints,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    i: &'a str,
    t: u8,
    c: OutboundContent<'a>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum OutboundContent<'a> {
    Text(&'a str),
    CodePoints(Vec<u32>),
}

#[derive(Deserialize)]
struct InboundEnvelope {
    i: Option<String>,
    t: Option<u64>,
    c: Option<InboundContent>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InboundContent {
    Text(String),
    CodePoints(Vec<u32>),
}

impl InboundContent {
    fn into_string(self) -> Result<String> {
        match self {
            InboundContent::Text(text) => Ok(text),
            InboundContent::CodePoints(points) => points
                .into_iter()
                .map(|point| {
                    char::from_u32(point).ok_or_else(|| {
                        ProtocolError::InvalidMessage(constants::ERR_INVALID_CODE_POINT.into())
                    })
                })
                .collect(),
        }
    }
}

/// Serialize a request with plain string content
pub fn encode(request: &Request) -> Result<Vec<u8>> {
    encode_with(request, ContentEncoding::Text)
}

/// Serialize a request choosing how its content is represented
pub fn encode_with(request: &Request, encoding: ContentEncoding) -> Result<Vec<u8>> {
    let content = match encoding {
        ContentEncoding::Text => OutboundContent::Text(request.content()),
        ContentEncoding::CodePoints => {
            OutboundContent::CodePoints(request.content().chars().map(u32::from).collect())
        }
    };

    let envelope = OutboundEnvelope {
        i: request.id().as_str(),
        t: request.kind().code(),
        c: content,
    };

    Ok(serde_json::to_vec(&envelope)?)
}

/// Parse an inbound envelope
///
/// # Errors
/// Returns `ProtocolError::InvalidMessage` for malformed JSON, missing fields,
/// unknown type codes, invalid ids or invalid code points.
pub fn decode(bytes: &[u8]) -> Result<Response> {
    let envelope: InboundEnvelope = serde_json::from_slice(bytes)?;

    let missing = || ProtocolError::InvalidMessage(constants::ERR_MISSING_FIELD.into());
    let id = envelope.i.ok_or_else(missing)?;
    let code = envelope.t.ok_or_else(missing)?;
    let content = envelope.c.ok_or_else(missing)?;

    let kind = MessageType::from_code(code)
        .ok_or_else(|| ProtocolError::InvalidMessage(format!("Unknown type code: {code}")))?;

    Ok(Response::new(
        RequestId::parse(&id)?,
        kind,
        content.into_string()?,
    ))
}
