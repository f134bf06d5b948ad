//! # Transport Layer
//!
//! Framed, timeout-bounded access to the duplex byte stream underneath each
//! connection. TCP in production; any `AsyncRead + AsyncWrite` stream (such
//! as `tokio::io::duplex`) works the same way.

pub mod socket;
