//! Per-session record protection.
//!
//! Decoding checks the epoch, consults the replay window, authenticates and
//! only then marks the sequence number as seen. Anything that fails is
//! dropped without telling the peer. Encoding assigns the next write
//! sequence number of the requested epoch.
//!
//! The read side keeps the previous epoch for a grace period so that
//! reordered retransmissions still decode. Records of the next epoch that
//! overtake the ChangeCipherSpec are held until the keys take effect.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::buffer::Buf;
use crate::crypto::{Aad, Cipher, Iv, Nonce, EXPLICIT_NONCE_LEN};
use crate::message::{Alert, DTLSRecord};
use crate::types::{ContentType, Sequence};
use crate::window::AntiReplayWindow;
use crate::Error;

/// Traffic key and implicit IV for one direction of one epoch.
pub(crate) struct EpochKeys {
    cipher: Box<dyn Cipher>,
    iv: Iv,
    tag_len: usize,
}

impl EpochKeys {
    pub fn new(cipher: Box<dyn Cipher>, iv: Iv, tag_len: usize) -> Self {
        EpochKeys {
            cipher,
            iv,
            tag_len,
        }
    }

    /// Explicit nonce plus tag.
    fn overhead(&self) -> usize {
        EXPLICIT_NONCE_LEN + self.tag_len
    }
}

/// Decoded record payload.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Content {
    Handshake(Buf),
    Alert(Alert),
    ApplicationData(Buf),
    /// A ChangeCipherSpec: the peer's next records use the next epoch.
    ChangeEpoch,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Plaintext {
    pub sequence: Sequence,
    pub content: Content,
    /// Decoded with the read state kept from before the last epoch change.
    pub stale: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Decoded {
    Record(Plaintext),
    /// Held until the next epoch takes effect.
    Deferred,
    Dropped(&'static str),
}

struct ReadEpoch {
    epoch: u16,
    keys: Option<EpochKeys>,
    window: AntiReplayWindow,
}

struct WriteEpoch {
    epoch: u16,
    keys: Option<EpochKeys>,
    next_seq: u64,
}

pub(crate) struct RecordLayer {
    read: ReadEpoch,
    /// Read state of the epoch before `read`, and when it stops being accepted.
    previous_read: Option<(ReadEpoch, Instant)>,
    pending_read: Option<EpochKeys>,

    write: WriteEpoch,
    /// Earlier write epoch, for retransmitting flights that started in it.
    previous_write: Option<WriteEpoch>,
    pending_write: Option<EpochKeys>,

    deferred: VecDeque<Buf>,
    max_deferred: usize,
    grace: Duration,

    auth_failures: u32,
    max_auth_failures: u32,
}

impl RecordLayer {
    pub fn new(max_deferred: usize, grace: Duration, max_auth_failures: u32) -> Self {
        RecordLayer {
            read: ReadEpoch {
                epoch: 0,
                keys: None,
                window: AntiReplayWindow::new(),
            },
            previous_read: None,
            pending_read: None,
            write: WriteEpoch {
                epoch: 0,
                keys: None,
                next_seq: 0,
            },
            previous_write: None,
            pending_write: None,
            deferred: VecDeque::new(),
            max_deferred,
            grace,
            auth_failures: 0,
            max_auth_failures,
        }
    }

    pub fn read_epoch(&self) -> u16 {
        self.read.epoch
    }

    pub fn write_epoch(&self) -> u16 {
        self.write.epoch
    }

    /// Continue the epoch 0 write counter from `seq`.
    ///
    /// A server answering a verified ClientHello mirrors the client's record
    /// sequence number, like the HelloVerifyRequest did.
    pub fn set_write_sequence(&mut self, seq: u64) {
        if self.write.epoch == 0 {
            self.write.next_seq = seq;
        }
    }

    /// Mark a record decoded outside the session as seen.
    pub fn mark_received(&mut self, sequence: Sequence) {
        if sequence.epoch == self.read.epoch {
            self.read.window.update(sequence.sequence_number);
        }
    }

    /// Keys for the next epoch in both directions. They take effect on
    /// [`activate_read`](Self::activate_read) and
    /// [`activate_write`](Self::activate_write).
    pub fn install_pending(&mut self, read: EpochKeys, write: EpochKeys) {
        self.pending_read = Some(read);
        self.pending_write = Some(write);
    }

    /// Switch the read side to the next epoch after the peer's
    /// ChangeCipherSpec. Returns `false` if there were no keys waiting.
    pub fn activate_read(&mut self, now: Instant) -> Result<bool, Error> {
        let Some(keys) = self.pending_read.take() else {
            return Ok(false);
        };
        let epoch = self.read.epoch.checked_add(1).ok_or(Error::WrappedEpoch)?;

        let next = ReadEpoch {
            epoch,
            keys: Some(keys),
            window: AntiReplayWindow::new(),
        };
        let old = std::mem::replace(&mut self.read, next);
        self.previous_read = Some((old, now + self.grace));
        Ok(true)
    }

    /// Switch the write side to the next epoch, right after sending our
    /// ChangeCipherSpec. The counter restarts at zero.
    pub fn activate_write(&mut self) -> Result<(), Error> {
        let Some(keys) = self.pending_write.take() else {
            return Err(Error::CryptoError("No pending write keys".to_string()));
        };
        let epoch = self.write.epoch.checked_add(1).ok_or(Error::WrappedEpoch)?;

        let next = WriteEpoch {
            epoch,
            keys: Some(keys),
            next_seq: 0,
        };
        let old = std::mem::replace(&mut self.write, next);
        self.previous_write = Some(old);
        Ok(())
    }

    /// Records held for the epoch that just took effect.
    pub fn take_deferred(&mut self) -> VecDeque<Buf> {
        std::mem::take(&mut self.deferred)
    }

    /// Bytes added to a payload when written in `epoch`.
    pub fn overhead(&self, epoch: u16) -> usize {
        let keys = match self.write_state(epoch) {
            Some(w) => w.keys.as_ref(),
            None => self.pending_write.as_ref(),
        };
        keys.map(EpochKeys::overhead).unwrap_or(0)
    }

    pub fn decode(&mut self, record: &DTLSRecord, now: Instant) -> Result<Decoded, Error> {
        let seq = record.sequence;
        let read_epoch = self.read.epoch;

        if let Some((_, expires)) = &self.previous_read {
            if now >= *expires {
                self.previous_read = None;
            }
        }

        let stale = seq.epoch != read_epoch;
        let state = if seq.epoch == read_epoch {
            &mut self.read
        } else if let Some((prev, _)) = self
            .previous_read
            .as_mut()
            .filter(|(p, _)| p.epoch == seq.epoch)
        {
            prev
        } else if Some(seq.epoch) == read_epoch.checked_add(1)
            && (self.pending_read.is_some() || read_epoch == 0)
        {
            // Either the keys are waiting for the ChangeCipherSpec, or the
            // first handshake has not derived them yet.
            if self.deferred.len() >= self.max_deferred {
                return Ok(Decoded::Dropped("deferred queue full"));
            }
            let mut raw = Buf::new();
            record.serialize(&mut raw);
            self.deferred.push_back(raw);
            return Ok(Decoded::Deferred);
        } else {
            return Ok(Decoded::Dropped("unexpected epoch"));
        };

        if !state.window.check(seq.sequence_number) {
            return Ok(Decoded::Dropped("replay"));
        }

        let payload = match &mut state.keys {
            None => Buf::from_slice(record.fragment),
            Some(keys) => {
                if record.fragment.len() < keys.overhead() {
                    return Ok(Decoded::Dropped("short protected record"));
                }
                let (explicit, ciphertext) = record.fragment.split_at(EXPLICIT_NONCE_LEN);
                let mut explicit_nonce = [0u8; EXPLICIT_NONCE_LEN];
                explicit_nonce.copy_from_slice(explicit);

                let plaintext_len = (ciphertext.len() - keys.tag_len) as u16;
                let aad = Aad::new(record.content_type, seq, plaintext_len);
                let nonce = Nonce::new(keys.iv, &explicit_nonce);

                let mut buf = Buf::from_slice(ciphertext);
                if keys.cipher.decrypt(&mut buf, aad, nonce).is_err() {
                    self.auth_failures += 1;
                    if self.auth_failures > self.max_auth_failures {
                        return Err(Error::TooManyAuthFailures);
                    }
                    return Ok(Decoded::Dropped("authentication failed"));
                }
                buf
            }
        };

        state.window.update(seq.sequence_number);
        let protected = state.keys.is_some();

        let content = match record.content_type {
            ContentType::Handshake => Content::Handshake(payload),
            ContentType::ApplicationData if protected => Content::ApplicationData(payload),
            ContentType::ApplicationData => return Ok(Decoded::Dropped("plaintext application data")),
            ContentType::ChangeCipherSpec if payload[..] == [1] => Content::ChangeEpoch,
            ContentType::Alert => match Alert::parse(&payload) {
                Ok((rest, alert)) if rest.is_empty() => Content::Alert(alert),
                _ => return Ok(Decoded::Dropped("malformed alert")),
            },
            _ => return Ok(Decoded::Dropped("unknown content")),
        };

        Ok(Decoded::Record(Plaintext {
            sequence: seq,
            content,
            stale,
        }))
    }

    /// Protect `plaintext` as one record of `epoch` and append it to `out`.
    pub fn encode(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        plaintext: &[u8],
        out: &mut Buf,
    ) -> Result<(), Error> {
        let Some(state) = self.write_state_mut(epoch) else {
            return Err(Error::CryptoError(format!("No write state for epoch {}", epoch)));
        };

        if state.next_seq > Sequence::MAX {
            return Err(Error::SequenceExhausted);
        }
        let sequence = Sequence::new(state.epoch, state.next_seq);
        state.next_seq += 1;

        let Some(keys) = &mut state.keys else {
            encode_plaintext(content_type, sequence, plaintext, out);
            return Ok(());
        };

        let explicit = sequence.to_explicit();
        let aad = Aad::new(content_type, sequence, plaintext.len() as u16);
        let nonce = Nonce::new(keys.iv, &explicit);

        let mut fragment = Buf::from_slice(plaintext);
        keys.cipher
            .encrypt(&mut fragment, aad, nonce)
            .map_err(Error::CryptoError)?;

        let length = (EXPLICIT_NONCE_LEN + fragment.len()) as u16;
        DTLSRecord::serialize_header(content_type, sequence, length, out);
        out.extend_from_slice(&explicit);
        out.extend_from_slice(&fragment);
        Ok(())
    }

    fn write_state(&self, epoch: u16) -> Option<&WriteEpoch> {
        if self.write.epoch == epoch {
            return Some(&self.write);
        }
        self.previous_write.as_ref().filter(|w| w.epoch == epoch)
    }

    fn write_state_mut(&mut self, epoch: u16) -> Option<&mut WriteEpoch> {
        if self.write.epoch == epoch {
            return Some(&mut self.write);
        }
        self.previous_write.as_mut().filter(|w| w.epoch == epoch)
    }
}

/// Write an unprotected record with an explicit sequence number.
///
/// Used for replies that happen outside any session, such as the
/// HelloVerifyRequest.
pub(crate) fn encode_plaintext(
    content_type: ContentType,
    sequence: Sequence,
    plaintext: &[u8],
    out: &mut Buf,
) {
    DTLSRecord::serialize_header(content_type, sequence, plaintext.len() as u16, out);
    out.extend_from_slice(plaintext);
}

impl std::fmt::Debug for RecordLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordLayer")
            .field("read_epoch", &self.read.epoch)
            .field("write_epoch", &self.write.epoch)
            .field("next_write_seq", &self.write.next_seq)
            .field("deferred", &self.deferred.len())
            .field("auth_failures", &self.auth_failures)
            .finish()
    }
}
