//! X25519 key exchange using `x25519-dalek`.

use x25519_dalek::{EphemeralSecret, PublicKey};

use crate::buffer::Buf;
use crate::crypto::provider::{ActiveKeyExchange, SupportedKxGroup};
use crate::types::NamedGroup;

struct X25519KeyExchange {
    secret: EphemeralSecret,
    public_key: Buf,
}

impl std::fmt::Debug for X25519KeyExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("X25519KeyExchange")
            .field("public_key_len", &self.public_key.len())
            .finish_non_exhaustive()
    }
}

impl ActiveKeyExchange for X25519KeyExchange {
    fn pub_key(&self) -> &[u8] {
        &self.public_key
    }

    fn complete(self: Box<Self>, peer_pub: &[u8], out: &mut Buf) -> Result<(), String> {
        let peer: [u8; 32] = peer_pub
            .try_into()
            .map_err(|_| "Invalid X25519 public key".to_string())?;
        let shared = self.secret.diffie_hellman(&PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err("X25519 shared secret is all zeros".to_string());
        }
        out.clear();
        out.extend_from_slice(shared.as_bytes());
        Ok(())
    }

    fn group(&self) -> NamedGroup {
        NamedGroup::X25519
    }
}

/// X25519 key exchange group.
#[derive(Debug)]
struct X25519;

impl SupportedKxGroup for X25519 {
    fn name(&self) -> NamedGroup {
        NamedGroup::X25519
    }

    fn start_exchange(&self, mut buf: Buf) -> Result<Box<dyn ActiveKeyExchange>, String> {
        let secret = EphemeralSecret::random();
        buf.clear();
        buf.extend_from_slice(PublicKey::from(&secret).as_bytes());
        Ok(Box::new(X25519KeyExchange {
            secret,
            public_key: buf,
        }))
    }
}

static KX_GROUP_X25519: X25519 = X25519;

/// All supported key exchange groups.
pub(super) static ALL_KX_GROUPS: &[&dyn SupportedKxGroup] = &[&KX_GROUP_X25519];
