//! Length-delimited stream framing.
//!
//! ```text
//! [Length(4, big-endian)] [Body(N)]
//! ```
//!
//! The body is one wire envelope, encrypted or (for identification and
//! pre-encryption error frames) plain. A body never exceeds one read quota.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::MAX_FRAME_SIZE;
use crate::error::{ProtocolError, Result};

const LENGTH_PREFIX: usize = 4;

/// Tokio codec producing one `Bytes` body per frame
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        // Reject before buffering anything
        if len > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(len));
        }

        if src.len() < LENGTH_PREFIX + len {
            src.reserve(LENGTH_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, body: T, dst: &mut BytesMut) -> Result<()> {
        let body = body.as_ref();
        if body.len() > self.max_frame_size {
            return Err(ProtocolError::OversizedFrame(body.len()));
        }

        dst.reserve(LENGTH_PREFIX + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_partial_frames_wait_for_more_bytes() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(b"hello".as_slice(), &mut buf).unwrap();

        let mut partial = buf.split_to(6);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        let body = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(&body[..], b"hello");
        assert!(partial.is_empty());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_back_to_back_frames() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(b"one".as_slice(), &mut buf).unwrap();
        codec.encode(b"".as_slice(), &mut buf).unwrap();
        codec.encode(b"three".as_slice(), &mut buf).unwrap();

        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"one");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"");
        assert_eq!(&codec.decode(&mut buf).unwrap().unwrap()[..], b"three");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frames_rejected_both_ways() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(vec![0u8; 9], &mut buf),
            Err(ProtocolError::OversizedFrame(9))
        ));

        let mut incoming = BytesMut::new();
        incoming.put_u32(1_000_000);
        assert!(matches!(
            codec.decode(&mut incoming),
            Err(ProtocolError::OversizedFrame(1_000_000))
        ));
    }
}
