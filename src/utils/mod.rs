//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: ChaCha20-Poly1305 AEAD with nonce bytes interleaved into the body
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Timeout defaults and async wrappers
//!
//! ## Security
//! - Nonces come from the operating system RNG (getrandom)
//! - Key copies are zeroed after the cipher is built (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;
