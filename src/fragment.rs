//! Reassembly of fragmented handshake messages.
//!
//! Fragments may arrive in any order, overlap, or repeat. Each message in
//! progress keeps a buffer of its full length and the set of byte ranges
//! written so far. The message is complete once the ranges cover it.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::buffer::Buf;
use crate::message::{Header, MessageType};
use crate::Error;

/// Sorted, non-overlapping, non-adjacent byte ranges.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RangeSet {
    ranges: Vec<Range<u32>>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a range, merging it with any range it touches.
    pub fn insert(&mut self, range: Range<u32>) {
        if range.is_empty() {
            return;
        }

        // First range that ends at or after our start touches or follows us.
        let first = self.ranges.partition_point(|r| r.end < range.start);
        // First range that starts strictly after our end is untouched.
        let last = self.ranges.partition_point(|r| r.start <= range.end);

        let mut merged = range;
        if first < last {
            merged.start = merged.start.min(self.ranges[first].start);
            merged.end = merged.end.max(self.ranges[last - 1].end);
        }
        self.ranges.splice(first..last, std::iter::once(merged));
    }

    /// Whether every byte of `range` is already covered.
    #[cfg(test)]
    pub fn covers(&self, range: &Range<u32>) -> bool {
        if range.is_empty() {
            return true;
        }
        let idx = self.ranges.partition_point(|r| r.end < range.end);
        self.ranges
            .get(idx)
            .map(|r| r.start <= range.start && range.end <= r.end)
            .unwrap_or(false)
    }

    /// The covered parts of `range`.
    pub fn intersections<'a>(&'a self, range: &'a Range<u32>) -> impl Iterator<Item = Range<u32>> + 'a {
        self.ranges
            .iter()
            .filter(move |r| r.start < range.end && range.start < r.end)
            .map(move |r| r.start.max(range.start)..r.end.min(range.end))
    }

    /// Whether the set is exactly `[0, total)`.
    pub fn is_complete(&self, total: u32) -> bool {
        match self.ranges.as_slice() {
            [] => total == 0,
            [r] => r.start == 0 && r.end == total,
            _ => false,
        }
    }

    #[cfg(test)]
    pub fn as_slice(&self) -> &[Range<u32>] {
        &self.ranges
    }
}

/// A reassembled handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CompleteMessage {
    pub msg_type: MessageType,
    pub message_seq: u16,
    /// Epoch of the records that carried it.
    pub epoch: u16,
    pub body: Buf,
}

impl CompleteMessage {
    /// Handshake header of the unfragmented message.
    pub fn header(&self) -> Header {
        Header {
            msg_type: self.msg_type,
            length: self.body.len() as u32,
            message_seq: self.message_seq,
            fragment_offset: 0,
            fragment_length: self.body.len() as u32,
        }
    }

    /// The message as it goes into the transcript: header with offset 0 and
    /// fragment length equal to the full length, then the body.
    pub fn serialize(&self, output: &mut Buf) {
        self.header().serialize(output);
        output.extend_from_slice(&self.body);
    }
}

#[derive(Debug)]
pub(crate) enum Accept {
    Complete(CompleteMessage),
    Incomplete,
    /// Inconsistent with what we already hold. A later copy may still fit.
    Dropped,
}

#[derive(Debug)]
struct Partial {
    msg_type: MessageType,
    total_length: u32,
    epoch: u16,
    data: Buf,
    coverage: RangeSet,
    created: u64,
}

#[derive(Debug)]
pub(crate) struct FragmentReassembler {
    partials: BTreeMap<u16, Partial>,
    buffered: usize,
    max_bytes: usize,
    max_message_len: usize,
    counter: u64,
}

impl FragmentReassembler {
    pub fn new(max_bytes: usize, max_message_len: usize) -> Self {
        FragmentReassembler {
            partials: BTreeMap::new(),
            buffered: 0,
            max_bytes,
            max_message_len,
            counter: 0,
        }
    }

    pub fn accept(&mut self, epoch: u16, header: &Header, data: &[u8]) -> Result<Accept, Error> {
        if header.length as usize > self.max_message_len {
            return Err(Error::ProtocolViolation(format!(
                "handshake message of {} bytes exceeds limit",
                header.length
            )));
        }

        let end = header.fragment_offset as u64 + header.fragment_length as u64;
        if data.len() != header.fragment_length as usize || end > header.length as u64 {
            return Ok(Accept::Dropped);
        }

        let seq = header.message_seq;

        if !self.partials.contains_key(&seq) {
            if header.is_complete() {
                return Ok(Accept::Complete(CompleteMessage {
                    msg_type: header.msg_type,
                    message_seq: seq,
                    epoch,
                    body: Buf::from_slice(data),
                }));
            }
            self.start(epoch, header);
        }

        let Some(partial) = self.partials.get_mut(&seq) else {
            return Ok(Accept::Dropped);
        };

        if partial.msg_type != header.msg_type || partial.total_length != header.length {
            return Err(Error::ProtocolViolation(format!(
                "fragment of message {} disagrees on type or length",
                seq
            )));
        }
        if partial.epoch != epoch {
            return Ok(Accept::Dropped);
        }

        let range = header.fragment_offset..(end as u32);
        let conflict = partial.coverage.intersections(&range).any(|r| {
            let ours = &partial.data[r.start as usize..r.end as usize];
            let theirs = &data[(r.start - range.start) as usize..(r.end - range.start) as usize];
            ours != theirs
        });
        if conflict {
            return Ok(Accept::Dropped);
        }

        partial.data[range.start as usize..range.end as usize].copy_from_slice(data);
        partial.coverage.insert(range);

        if !partial.coverage.is_complete(partial.total_length) {
            return Ok(Accept::Incomplete);
        }

        let Some(partial) = self.partials.remove(&seq) else {
            return Ok(Accept::Dropped);
        };
        self.buffered -= partial.total_length as usize;

        Ok(Accept::Complete(CompleteMessage {
            msg_type: partial.msg_type,
            message_seq: seq,
            epoch,
            body: partial.data,
        }))
    }

    fn start(&mut self, epoch: u16, header: &Header) {
        let needed = header.length as usize;
        while self.buffered + needed > self.max_bytes {
            let Some(oldest) = self
                .partials
                .iter()
                .min_by_key(|(_, p)| p.created)
                .map(|(seq, _)| *seq)
            else {
                break;
            };
            self.discard(oldest);
        }

        self.counter += 1;
        let mut data = Buf::new();
        data.resize(needed, 0);
        self.partials.insert(
            header.message_seq,
            Partial {
                msg_type: header.msg_type,
                total_length: header.length,
                epoch,
                data,
                coverage: RangeSet::new(),
                created: self.counter,
            },
        );
        self.buffered += needed;
    }

    fn discard(&mut self, seq: u16) {
        if let Some(p) = self.partials.remove(&seq) {
            self.buffered -= p.total_length as usize;
        }
    }

    /// Forget partial messages with a sequence number below `seq`.
    pub fn discard_below(&mut self, seq: u16) {
        let keep = self.partials.split_off(&seq);
        for (_, p) in std::mem::replace(&mut self.partials, keep) {
            self.buffered -= p.total_length as usize;
        }
    }

    pub fn clear(&mut self) {
        self.partials.clear();
        self.buffered = 0;
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.partials.len()
    }

    #[cfg(test)]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }
}
