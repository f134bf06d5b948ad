//! Peer identities and the resolver collaborator.
//!
//! The accepting side never stores secrets itself: every identification
//! frame is resolved through a [`PeerResolver`] supplied by the embedding
//! process. [`StaticPeerDirectory`] is an in-memory resolver for tests and
//! small deployments.

use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// A resolved peer: its public id, the shared secret keying its traffic,
/// and an opaque descriptor sent to it as the `initialize` payload.
#[derive(Clone)]
pub struct PeerIdentity {
    public_id: String,
    shared_secret: Zeroizing<Vec<u8>>,
    descriptor: serde_json::Value,
}

impl PeerIdentity {
    pub fn new(
        public_id: impl Into<String>,
        shared_secret: impl Into<Vec<u8>>,
        descriptor: serde_json::Value,
    ) -> Self {
        Self {
            public_id: public_id.into(),
            shared_secret: Zeroizing::new(shared_secret.into()),
            descriptor,
        }
    }

    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    pub fn shared_secret(&self) -> &[u8] {
        &self.shared_secret
    }

    pub fn descriptor(&self) -> &serde_json::Value {
        &self.descriptor
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerIdentity")
            .field("public_id", &self.public_id)
            .field("shared_secret", &"[REDACTED]")
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

/// Resolves the public id presented during identification
pub trait PeerResolver: Send + Sync + 'static {
    fn resolve(&self, public_id: &str) -> Option<PeerIdentity>;
}

impl<F> PeerResolver for F
where
    F: Fn(&str) -> Option<PeerIdentity> + Send + Sync + 'static,
{
    fn resolve(&self, public_id: &str) -> Option<PeerIdentity> {
        self(public_id)
    }
}

/// In-memory resolver. Clones share the same entries.
#[derive(Clone, Default)]
pub struct StaticPeerDirectory {
    peers: Arc<DashMap<String, PeerIdentity>>,
}

impl StaticPeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identity: PeerIdentity) {
        self.peers.insert(identity.public_id().to_owned(), identity);
    }

    pub fn remove(&self, public_id: &str) -> Option<PeerIdentity> {
        self.peers.remove(public_id).map(|(_, identity)| identity)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl PeerResolver for StaticPeerDirectory {
    fn resolve(&self, public_id: &str) -> Option<PeerIdentity> {
        self.peers.get(public_id).map(|entry| entry.value().clone())
    }
}
