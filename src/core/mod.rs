//! # Core Wire Components
//!
//! Stream framing and the JSON envelope carried inside each frame.
//!
//! ## Components
//! - **Codec**: Tokio codec splitting a byte stream into frame bodies
//! - **Serialization**: `Request` → envelope bytes, envelope bytes → `Response`
//!
//! ## Wire Format
//! ```text
//! [Length(4)] [ nonce-interleaved base64( AEAD( {"i","t","c"} ) ) ]
//! ```
//!
//! ## Security
//! - Maximum frame size: 64 KiB (one read quota)
//! - Length validation before buffering

pub mod codec;
pub mod serialization;
