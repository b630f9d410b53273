//! Outgoing datagrams for all peers.
//!
//! Records for the same peer are packed into one datagram as long as it
//! stays within the MTU. The Debug output only shows counts, never payload.

use std::collections::VecDeque;
use std::fmt;

use crate::buffer::{Buf, BufferPool};
use crate::peers::PeerId;
use crate::Error;

pub(crate) struct QueueTx {
    datagrams: VecDeque<(PeerId, Buf)>,
    pool: BufferPool,
    max_datagrams: usize,
    mtu: usize,
}

impl QueueTx {
    pub fn new(max_datagrams: usize, mtu: usize) -> Self {
        QueueTx {
            datagrams: VecDeque::new(),
            pool: BufferPool::default(),
            max_datagrams,
            mtu,
        }
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Bytes left in the datagram being built for `peer`, zero if there is none.
    pub fn space_in_last(&self, peer: &PeerId) -> usize {
        match self.datagrams.back() {
            Some((p, b)) if p == peer => self.mtu.saturating_sub(b.len()),
            _ => 0,
        }
    }

    /// Append one serialized record for `peer`.
    pub fn push_record(&mut self, peer: PeerId, record: &[u8]) -> Result<(), Error> {
        let space = self.space_in_last(&peer);
        if space >= record.len() {
            if let Some((_, last)) = self.datagrams.back_mut() {
                last.extend_from_slice(record);
                return Ok(());
            }
        }

        if self.datagrams.len() >= self.max_datagrams {
            return Err(Error::TransmitQueueFull);
        }

        let mut datagram = self.pool.pop();
        datagram.extend_from_slice(record);
        self.datagrams.push_back((peer, datagram));
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<(PeerId, Buf)> {
        self.datagrams.pop_front()
    }

    pub fn recycle(&mut self, buf: Buf) {
        self.pool.push(buf);
    }

    /// Drop datagrams not yet polled for `peer`.
    pub fn discard(&mut self, peer: &PeerId) {
        let mut kept = VecDeque::with_capacity(self.datagrams.len());
        for (p, b) in self.datagrams.drain(..) {
            if p == *peer {
                self.pool.push(b);
            } else {
                kept.push_back((p, b));
            }
        }
        self.datagrams = kept;
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.datagrams.len()
    }
}

impl fmt::Debug for QueueTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_bytes: usize = self.datagrams.iter().map(|(_, b)| b.len()).sum();
        f.debug_struct("QueueTx")
            .field("datagrams", &self.datagrams.len())
            .field("total_bytes", &total_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::opaque(&[n]).unwrap()
    }

    #[test]
    fn packs_records_for_same_peer() {
        let mut q = QueueTx::new(4, 100);
        q.push_record(peer(1), &[0; 40]).unwrap();
        q.push_record(peer(1), &[0; 60]).unwrap();
        assert_eq!(q.len(), 1);
        assert_eq!(q.space_in_last(&peer(1)), 0);

        q.push_record(peer(1), &[0; 1]).unwrap();
        assert_eq!(q.len(), 2);

        q.push_record(peer(2), &[0; 1]).unwrap();
        assert_eq!(q.len(), 3);
        assert_eq!(q.space_in_last(&peer(1)), 0);
        assert_eq!(q.space_in_last(&peer(2)), 99);
    }

    #[test]
    fn full_queue_is_an_error() {
        let mut q = QueueTx::new(1, 10);
        q.push_record(peer(1), &[0; 10]).unwrap();
        assert_eq!(q.push_record(peer(1), &[0; 1]), Err(Error::TransmitQueueFull));
        assert_eq!(format!("{:?}", q), "QueueTx { datagrams: 1, total_bytes: 10 }");
    }

    #[test]
    fn discard_keeps_other_peers() {
        let mut q = QueueTx::new(4, 10);
        q.push_record(peer(1), &[1; 10]).unwrap();
        q.push_record(peer(2), &[2; 10]).unwrap();
        q.push_record(peer(1), &[1; 10]).unwrap();
        q.discard(&peer(1));
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_front().map(|(p, _)| p), Some(peer(2)));
    }
}
