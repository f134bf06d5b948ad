//! # Encryption Engine
//!
//! ChaCha20-Poly1305 AEAD (256-bit key, 96-bit nonce, 128-bit tag) with the
//! nonce hidden inside the frame body instead of being sent as a header.
//!
//! ## Envelope
//! 1. Encrypt the plaintext under a fresh random nonce (ciphertext || tag).
//! 2. Base64-encode the result.
//! 3. Insert nonce byte `k` at offset `indices[k]`, in order. Every insertion
//!    shifts the bytes after it one place to the right.
//!
//! Decryption removes the bytes again in reverse order, which exactly undoes
//! the sequential insertion.
//!
//! Every session starts on the sequential offsets `0..12`. The accepting side
//! rotates to random offsets once, right after identification, and tells the
//! peer about them in a handshake frame still encrypted under the old ones.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::debug;
use zeroize::Zeroize;

use crate::error::{constants, ProtocolError, Result};

/// AEAD key size in bytes
pub const KEY_LEN: usize = 32;

/// AEAD nonce size in bytes, and the number of embedding offsets
pub const NONCE_LEN: usize = 12;

/// Poly1305 tag size in bytes
pub const TAG_LEN: usize = 16;

/// Lowest offset a rotated index may take
pub const NONCE_INDEX_LOW: usize = 0;

/// Exclusive upper bound for offsets. 24 is the base64 length of an empty
/// plaintext's ciphertext, so any offset below it fits every frame.
pub const NONCE_INDEX_HIGH: usize = 24;

/// The 12 ordered offsets nonce bytes are spliced into
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct NonceIndices([usize; NONCE_LEN]);

impl NonceIndices {
    /// Validate a caller- or peer-supplied offset list
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidNonce` unless there are exactly 12
    /// distinct offsets inside `[NONCE_INDEX_LOW, NONCE_INDEX_HIGH)`.
    pub fn new(indices: &[usize]) -> Result<Self> {
        if indices.len() != NONCE_LEN {
            return Err(ProtocolError::InvalidNonce(
                constants::ERR_NONCE_INDEX_COUNT.into(),
            ));
        }

        let mut seen = [false; NONCE_INDEX_HIGH];
        let mut out = [0usize; NONCE_LEN];
        for (slot, &index) in out.iter_mut().zip(indices) {
            if !(NONCE_INDEX_LOW..NONCE_INDEX_HIGH).contains(&index) {
                return Err(ProtocolError::InvalidNonce(format!(
                    "{}: {index}",
                    constants::ERR_NONCE_INDEX_RANGE
                )));
            }
            if std::mem::replace(&mut seen[index], true) {
                return Err(ProtocolError::InvalidNonce(
                    constants::ERR_NONCE_INDEX_DUPLICATE.into(),
                ));
            }
            *slot = index;
        }

        Ok(Self(out))
    }

    /// Session-start offsets: the nonce is a plain 12 byte prefix
    pub fn sequential() -> Self {
        Self(std::array::from_fn(|i| i))
    }

    /// 12 distinct offsets sampled from the rotation range
    pub fn random() -> Self {
        let mut rng = rand::rng();
        let sampled = rand::seq::index::sample(
            &mut rng,
            NONCE_INDEX_HIGH - NONCE_INDEX_LOW,
            NONCE_LEN,
        );

        let mut out = [0usize; NONCE_LEN];
        for (slot, offset) in out.iter_mut().zip(sampled.iter()) {
            *slot = NONCE_INDEX_LOW + offset;
        }
        Self(out)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    fn splice(&self, mut body: Vec<u8>, nonce: &[u8; NONCE_LEN]) -> Result<Vec<u8>> {
        body.reserve(NONCE_LEN);
        for (&index, &byte) in self.0.iter().zip(nonce) {
            if index > body.len() {
                return Err(ProtocolError::InvalidNonce(format!(
                    "{}: {index}",
                    constants::ERR_NONCE_INDEX_RANGE
                )));
            }
            body.insert(index, byte);
        }
        Ok(body)
    }

    fn extract(&self, framed: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
        let mut body = framed.to_vec();
        let mut nonce = [0u8; NONCE_LEN];

        for (slot, &index) in nonce.iter_mut().zip(self.0.iter()).rev() {
            if index >= body.len() {
                return Err(ProtocolError::InvalidNonce(format!(
                    "offset {index} outside a {} byte frame",
                    body.len()
                )));
            }
            *slot = body.remove(index);
        }

        Ok((nonce, body))
    }
}

impl Default for NonceIndices {
    fn default() -> Self {
        Self::sequential()
    }
}

impl TryFrom<Vec<usize>> for NonceIndices {
    type Error = ProtocolError;

    fn try_from(value: Vec<usize>) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<NonceIndices> for Vec<usize> {
    fn from(value: NonceIndices) -> Self {
        value.0.to_vec()
    }
}

/// Per-connection AEAD state
pub struct Encryption {
    cipher: ChaCha20Poly1305,
    nonce_indices: RwLock<NonceIndices>,
    rotated: AtomicBool,
}

impl Encryption {
    /// Build an engine keyed by the first 32 bytes of `key_material`
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidKey` if fewer than 32 bytes are supplied.
    pub fn new(key_material: &[u8]) -> Result<Self> {
        if key_material.len() < KEY_LEN {
            return Err(ProtocolError::InvalidKey(constants::ERR_KEY_TOO_SHORT.into()));
        }

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&key_material[..KEY_LEN]);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        key.zeroize();

        Ok(Self {
            cipher,
            nonce_indices: RwLock::new(NonceIndices::sequential()),
            rotated: AtomicBool::new(false),
        })
    }

    /// Offsets currently used by [`Self::encrypt`] and [`Self::decrypt`]
    pub fn nonce_indices(&self) -> NonceIndices {
        match self.nonce_indices.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether the one-shot rotation has already happened
    pub fn is_rotated(&self) -> bool {
        self.rotated.load(Ordering::Acquire)
    }

    /// Replace the session-start offsets with random ones, once.
    ///
    /// Returns the offsets in force before the rotation, or `None` when this
    /// instance was already rotated (the call is then a no-op).
    pub fn regenerate_nonce_indices(&self) -> Option<NonceIndices> {
        self.install(NonceIndices::random())
    }

    /// Install offsets announced by the peer, consuming the same one-shot guard
    ///
    /// Returns `false` if this instance was already rotated.
    pub fn adopt_nonce_indices(&self, indices: NonceIndices) -> bool {
        self.install(indices).is_some()
    }

    fn install(&self, indices: NonceIndices) -> Option<NonceIndices> {
        if self
            .rotated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        let mut guard = match self.nonce_indices.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        debug!(indices = ?indices.as_slice(), "Nonce offsets rotated");
        Some(std::mem::replace(&mut *guard, indices))
    }

    /// Encrypt under the current offsets
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.encrypt_with(plaintext, &self.nonce_indices())
    }

    /// Encrypt with explicit offsets
    pub fn encrypt_with(&self, plaintext: &[u8], indices: &NonceIndices) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        getrandom::fill(&mut nonce)
            .map_err(|_| ProtocolError::EncryptionError)?;

        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| ProtocolError::EncryptionError)?;

        let framed = indices.splice(STANDARD.encode(sealed).into_bytes(), &nonce);
        nonce.zeroize();
        framed
    }

    /// Decrypt under the current offsets
    pub fn decrypt(&self, framed: &[u8]) -> Result<Vec<u8>> {
        self.decrypt_with(framed, &self.nonce_indices())
    }

    /// Decrypt with explicit offsets
    ///
    /// # Errors
    /// `InvalidNonce` when an offset falls outside the frame, `InvalidBase64`
    /// for a malformed body, `DecryptionError` when authentication fails.
    pub fn decrypt_with(&self, framed: &[u8], indices: &NonceIndices) -> Result<Vec<u8>> {
        let (nonce, body) = indices.extract(framed)?;

        let sealed = STANDARD
            .decode(&body)
            .map_err(|_| ProtocolError::InvalidBase64)?;

        if sealed.len() < TAG_LEN {
            return Err(ProtocolError::DecryptionError);
        }

        self.cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|_| ProtocolError::DecryptionError)
    }
}

impl fmt::Debug for Encryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encryption")
            .field("key", &"[REDACTED]")
            .field("nonce_indices", &self.nonce_indices())
            .field("rotated", &self.is_rotated())
            .finish()
    }
}
