//! Pre-shared key lookup for the server side of the handshake.

use std::collections::HashMap;
use std::fmt;

use zeroize::Zeroizing;

/// Resolves the identity a client sent in ClientKeyExchange to a key.
///
/// Returning `None` aborts the handshake with `unknown_psk_identity`.
pub trait PskResolver: Send + Sync {
    /// Look up the key for `identity`.
    fn resolve(&self, identity: &[u8]) -> Option<Zeroizing<Vec<u8>>>;
}

/// A fixed table of identities and keys.
#[derive(Default, Clone)]
pub struct StaticPsk {
    keys: HashMap<Vec<u8>, Zeroizing<Vec<u8>>>,
}

impl StaticPsk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) an identity.
    pub fn with_key(mut self, identity: &[u8], key: &[u8]) -> Self {
        self.keys
            .insert(identity.to_vec(), Zeroizing::new(key.to_vec()));
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl PskResolver for StaticPsk {
    fn resolve(&self, identity: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        self.keys.get(identity).cloned()
    }
}

impl fmt::Debug for StaticPsk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPsk")
            .field("identities", &self.keys.len())
            .finish()
    }
}
