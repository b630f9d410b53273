//! Peer identities and the table of live sessions.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use tinyvec::ArrayVec;

/// Identity of a remote endpoint.
///
/// Usually the socket address the datagram came from. Transports without IP
/// addressing can use a short opaque identifier instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerId {
    Addr(SocketAddr),
    Opaque(ArrayVec<[u8; 16]>),
}

impl PeerId {
    /// Longest accepted opaque identifier.
    pub const MAX_OPAQUE_LEN: usize = 16;

    /// Opaque identity from up to 16 bytes.
    pub fn opaque(id: &[u8]) -> Option<PeerId> {
        if id.len() > Self::MAX_OPAQUE_LEN {
            return None;
        }
        let mut v = ArrayVec::new();
        v.extend_from_slice(id);
        Some(PeerId::Opaque(v))
    }

    /// Canonical bytes, used as cookie input.
    pub(crate) fn to_bytes(self) -> ArrayVec<[u8; 24]> {
        let mut out = ArrayVec::new();
        match self {
            PeerId::Addr(SocketAddr::V4(a)) => {
                out.push(4);
                out.extend_from_slice(&a.ip().octets());
                out.extend_from_slice(&a.port().to_be_bytes());
            }
            PeerId::Addr(SocketAddr::V6(a)) => {
                out.push(6);
                out.extend_from_slice(&a.ip().octets());
                out.extend_from_slice(&a.port().to_be_bytes());
            }
            PeerId::Opaque(id) => {
                out.push(0);
                out.push(id.len() as u8);
                out.extend_from_slice(&id);
            }
        }
        out
    }
}

impl From<SocketAddr> for PeerId {
    fn from(value: SocketAddr) -> Self {
        PeerId::Addr(value)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerId::Addr(a) => write!(f, "{}", a),
            PeerId::Opaque(id) => {
                for b in id.iter() {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

/// What the table needs to know to pick an eviction victim.
pub(crate) trait Evictable {
    fn is_established(&self) -> bool;
    fn last_activity(&self) -> Instant;
}

/// Sessions keyed by peer, bounded in size.
///
/// When full, inserting evicts a session that has not finished its handshake
/// if there is one, otherwise the least recently active session.
pub(crate) struct PeerSessionTable<S> {
    sessions: HashMap<PeerId, S>,
    capacity: usize,
}

impl<S: Evictable> PeerSessionTable<S> {
    pub fn new(capacity: usize) -> Self {
        PeerSessionTable {
            sessions: HashMap::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn get(&self, peer: &PeerId) -> Option<&S> {
        self.sessions.get(peer)
    }

    pub fn get_mut(&mut self, peer: &PeerId) -> Option<&mut S> {
        self.sessions.get_mut(peer)
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.sessions.contains_key(peer)
    }

    /// Insert a session, returning the one evicted to make room.
    ///
    /// An existing session for the same peer is replaced and returned.
    pub fn insert(&mut self, peer: PeerId, session: S) -> Option<(PeerId, S)> {
        if let Some(old) = self.sessions.insert(peer, session) {
            return Some((peer, old));
        }

        if self.sessions.len() <= self.capacity {
            return None;
        }

        let victim = self
            .sessions
            .iter()
            .filter(|(p, _)| **p != peer)
            .min_by_key(|(_, s)| (s.is_established(), s.last_activity()))
            .map(|(p, _)| *p)?;

        self.sessions.remove(&victim).map(|s| (victim, s))
    }

    pub fn remove(&mut self, peer: &PeerId) -> Option<S> {
        self.sessions.remove(peer)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
