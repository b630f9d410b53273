//! State of one peer.
//!
//! A session owns its record layer, its reassembly buffers, the flight it
//! last sent and the negotiated secrets. Inbound datagrams are split into
//! records, handshake fragments are collected until the next expected
//! message is complete, and complete messages are handed to the role's
//! handshake logic in `handshake::client` or `handshake::server`.

use std::collections::{BTreeMap, VecDeque};
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::Buf;
use crate::crypto::{ActiveKeyExchange, MasterSecret};
use crate::diag::Diagnostics;
use crate::fragment::{Accept, CompleteMessage, FragmentReassembler};
use crate::handshake::{HandshakeState, Role, Step};
use crate::message::{Alert, AlertDescription, Body, CipherSuite, Cookie, DTLSRecord, Fragment};
use crate::message::{Header, Random};
use crate::peers::{Evictable, PeerId};
use crate::queue::QueueTx;
use crate::record_layer::{Content, Decoded, RecordLayer};
use crate::timer::RetransmissionScheduler;
use crate::types::ContentType;
use crate::{Config, Error};

/// Handshake messages further ahead than this are not buffered.
const MAX_AHEAD: u16 = 16;

/// Something the caller learns about through `poll_output`.
#[derive(Debug)]
pub(crate) enum Event {
    Connected(PeerId),
    ApplicationData(PeerId, Buf),
    Alert(PeerId, Alert),
    Closed(PeerId, Error),
}

/// Shared outputs a session writes to while handling input.
pub(crate) struct Outbox<'a> {
    pub queue: &'a mut QueueTx,
    pub events: &'a mut VecDeque<Event>,
    pub timers: &'a mut RetransmissionScheduler,
    pub now: Instant,
}

/// One record of the flight we last sent, kept for retransmission.
#[derive(Debug, Clone)]
struct FlightEntry {
    content_type: ContentType,
    epoch: u16,
    /// Whole handshake message (header and body), or the CCS byte.
    payload: Buf,
}

pub(crate) struct Session {
    pub(crate) peer: PeerId,
    pub(crate) role: Role,
    pub(crate) state: HandshakeState,
    pub(crate) step: Step,
    pub(crate) config: Arc<Config>,
    pub(crate) diag: Diagnostics,

    pub(crate) records: RecordLayer,
    reassembler: FragmentReassembler,

    next_send_seq: u16,
    next_recv_seq: u16,
    /// First message sequence number of the peer flight in progress.
    peer_flight_start: u16,
    /// The peer flight our saved flight answers. A repeat of it means our
    /// flight was lost.
    peer_flight: Range<u16>,
    ready: BTreeMap<u16, CompleteMessage>,
    flight: Vec<FlightEntry>,
    flight_no: u8,

    pub(crate) transcript: Buf,

    pub(crate) cipher_suite: Option<CipherSuite>,
    pub(crate) client_random: Option<Random>,
    pub(crate) server_random: Option<Random>,
    pub(crate) cookie: Cookie,
    pub(crate) master_secret: Option<MasterSecret>,
    pub(crate) key_exchange: Option<Box<dyn ActiveKeyExchange>>,
    pub(crate) server_public: Option<Vec<u8>>,
    pub(crate) identity_hint: Vec<u8>,

    last_activity: Instant,
}

impl Session {
    pub(crate) fn new(
        config: Arc<Config>,
        diag: Diagnostics,
        peer: PeerId,
        role: Role,
        now: Instant,
    ) -> Session {
        let records = RecordLayer::new(
            config.max_queue_rx(),
            config.epoch_grace_period(),
            config.max_auth_failures(),
        );
        let reassembler =
            FragmentReassembler::new(config.max_reassembly_bytes(), config.max_handshake_len());

        let (state, step) = match role {
            Role::Client => (HandshakeState::Init, Step::SendClientHello),
            Role::Server => (HandshakeState::WaitClientHello, Step::AwaitClientHello),
        };

        Session {
            peer,
            role,
            state,
            step,
            config,
            diag,
            records,
            reassembler,
            next_send_seq: 0,
            next_recv_seq: 0,
            peer_flight_start: 0,
            peer_flight: 0..0,
            ready: BTreeMap::new(),
            flight: Vec::new(),
            flight_no: 0,
            transcript: Buf::new(),
            cipher_suite: None,
            client_random: None,
            server_random: None,
            cookie: Cookie::empty(),
            master_secret: None,
            key_exchange: None,
            server_public: None,
            identity_hint: Vec::new(),
            last_activity: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == HandshakeState::Connected
    }

    /// Line the message sequence numbers up with a ClientHello consumed
    /// before this session existed.
    pub(crate) fn start_after(&mut self, message_seq: u16) {
        self.next_recv_seq = message_seq.wrapping_add(1);
        self.next_send_seq = message_seq;
        self.peer_flight_start = message_seq;
    }

    pub fn handle_datagram(&mut self, datagram: &[u8], out: &mut Outbox) -> Result<(), Error> {
        self.last_activity = out.now;
        let mut resent = false;
        let mut input = datagram;

        while !input.is_empty() {
            let Ok((rest, record)) = DTLSRecord::parse(input) else {
                diag!(
                    self.diag,
                    Debug,
                    "{}: malformed record, dropping {} bytes",
                    self.peer,
                    input.len()
                );
                break;
            };
            input = rest;
            self.handle_record(&record, out, &mut resent)?;
        }

        Ok(())
    }

    fn handle_record(
        &mut self,
        record: &DTLSRecord,
        out: &mut Outbox,
        resent: &mut bool,
    ) -> Result<(), Error> {
        let plaintext = match self.records.decode(record, out.now)? {
            Decoded::Record(p) => p,
            Decoded::Deferred => {
                diag!(self.diag, Trace, "{}: holding {:?} for next epoch", self.peer, record);
                return Ok(());
            }
            Decoded::Dropped(reason) => {
                diag!(self.diag, Debug, "{}: dropped {:?} ({})", self.peer, record, reason);
                return Ok(());
            }
        };

        let epoch = plaintext.sequence.epoch;
        if plaintext.stale {
            return self.handle_stale(plaintext.content, out, resent);
        }
        match plaintext.content {
            Content::Handshake(data) => self.handle_handshake(epoch, &data, out, resent),
            Content::ChangeEpoch => self.handle_change_epoch(out, resent),
            Content::Alert(alert) => self.handle_alert(alert, out),
            Content::ApplicationData(data) => {
                if self.is_connected() {
                    out.events.push_back(Event::ApplicationData(self.peer, data));
                } else {
                    diag!(self.diag, Debug, "{}: application data before Finished", self.peer);
                }
                Ok(())
            }
        }
    }

    /// Input from the epoch before the current read epoch. It can only be
    /// a repeat of a flight we already answered, so the only reaction is a
    /// retransmission of ours.
    fn handle_stale(
        &mut self,
        content: Content,
        out: &mut Outbox,
        resent: &mut bool,
    ) -> Result<(), Error> {
        let Content::Handshake(data) = content else {
            diag!(
                self.diag,
                Debug,
                "{}: dropped non-handshake record from old epoch",
                self.peer
            );
            return Ok(());
        };
        let Ok((_, fragments)) = Fragment::parse_all(&data) else {
            return Ok(());
        };
        for fragment in fragments {
            let seq = fragment.header.message_seq;
            if seq < self.next_recv_seq {
                self.on_repeat(seq, out, resent)?;
            } else {
                diag!(self.diag, Debug, "{}: new message_seq {} in old epoch", self.peer, seq);
            }
        }
        Ok(())
    }

    /// A fragment of a message we already processed. If it belongs to the
    /// flight our saved flight answers, ours was lost.
    fn on_repeat(&mut self, seq: u16, out: &mut Outbox, resent: &mut bool) -> Result<(), Error> {
        if self.peer_flight.contains(&seq) && !*resent {
            *resent = true;
            self.resend_flight(out, "peer repeated its flight")?;
        }
        Ok(())
    }

    fn handle_change_epoch(&mut self, out: &mut Outbox, resent: &mut bool) -> Result<(), Error> {
        if !self.records.activate_read(out.now)? {
            diag!(self.diag, Debug, "{}: ChangeCipherSpec without pending keys", self.peer);
            return Ok(());
        }
        diag!(
            self.diag,
            Debug,
            "{}: peer switched to epoch {}",
            self.peer,
            self.records.read_epoch()
        );

        for raw in self.records.take_deferred() {
            if let Ok((_, record)) = DTLSRecord::parse(&raw) {
                self.handle_record(&record, out, resent)?;
            }
        }
        Ok(())
    }

    fn handle_handshake(
        &mut self,
        epoch: u16,
        data: &[u8],
        out: &mut Outbox,
        resent: &mut bool,
    ) -> Result<(), Error> {
        let fragments = match Fragment::parse_all(data) {
            Ok((_, f)) => f,
            Err(_) => {
                diag!(self.diag, Debug, "{}: malformed handshake record", self.peer);
                return Ok(());
            }
        };

        for fragment in fragments {
            let seq = fragment.header.message_seq;

            if seq < self.next_recv_seq {
                self.on_repeat(seq, out, resent)?;
                continue;
            }

            if seq - self.next_recv_seq >= MAX_AHEAD {
                diag!(self.diag, Debug, "{}: message_seq {} too far ahead", self.peer, seq);
                continue;
            }
            if self.ready.contains_key(&seq) {
                continue;
            }

            match self.reassembler.accept(epoch, &fragment.header, fragment.body)? {
                Accept::Complete(m) => {
                    self.ready.insert(seq, m);
                }
                Accept::Incomplete => {}
                Accept::Dropped => {
                    diag!(self.diag, Debug, "{}: inconsistent fragment of {}", self.peer, seq);
                }
            }
        }

        while let Some(message) = self.ready.remove(&self.next_recv_seq) {
            self.next_recv_seq = self
                .next_recv_seq
                .checked_add(1)
                .ok_or_else(|| Error::ProtocolViolation("message_seq exhausted".to_string()))?;
            self.reassembler.discard_below(self.next_recv_seq);

            diag!(
                self.diag,
                Trace,
                "{}: {:?} seq {} in {:?}",
                self.peer,
                message.msg_type,
                message.message_seq,
                self.state
            );

            match self.role {
                Role::Client => self.client_message(message, out)?,
                Role::Server => self.server_message(message, out)?,
            }
        }

        Ok(())
    }

    fn handle_alert(&mut self, alert: Alert, out: &mut Outbox) -> Result<(), Error> {
        if alert.description == AlertDescription::CloseNotify {
            diag!(self.diag, Info, "{}: peer sent close_notify", self.peer);
            self.send_alert(Alert::warning(AlertDescription::CloseNotify), out)?;
            return Err(Error::PeerClosed);
        }
        if alert.is_fatal() {
            return Err(Error::PeerAlert(alert.description));
        }
        diag!(self.diag, Info, "{}: warning alert {:?}", self.peer, alert.description);
        out.events.push_back(Event::Alert(self.peer, alert));
        Ok(())
    }

    /// Parse a complete message. Finished must be protected, everything else
    /// belongs to epoch 0.
    pub(crate) fn parse_body(&self, message: &CompleteMessage) -> Result<Body, Error> {
        use crate::message::MessageType;

        let protected = message.epoch > 0;
        if protected != (message.msg_type == MessageType::Finished) {
            return Err(Error::UnexpectedMessage(format!(
                "{:?} in epoch {}",
                message.msg_type, message.epoch
            )));
        }

        let kx = self.cipher_suite.and_then(|s| s.key_exchange());
        let (_, body) = Body::parse(message.msg_type, &message.body, kx)?;
        Ok(body)
    }

    /// Add a received message to the transcript.
    pub(crate) fn record_message(&mut self, message: &CompleteMessage) {
        message.serialize(&mut self.transcript);
    }

    /// Start a new outgoing flight. The peer flight we just finished
    /// receiving is what a retransmission of ours answers.
    pub(crate) fn begin_flight(&mut self, number: u8) {
        diag!(self.diag, Debug, "{}: begin flight {}", self.peer, number);
        self.peer_flight = self.peer_flight_start..self.next_recv_seq;
        self.peer_flight_start = self.next_recv_seq;
        self.flight.clear();
        self.flight_no = number;
    }

    /// Serialize one handshake message in the current write epoch and add
    /// it to the flight. Nothing goes out before [`send_flight`](Self::send_flight).
    pub(crate) fn send_message(&mut self, body: &Body) -> Result<(), Error> {
        let mut serialized = Buf::new();
        body.serialize(&mut serialized);

        let header = Header {
            msg_type: body.msg_type(),
            length: serialized.len() as u32,
            message_seq: self.next_send_seq,
            fragment_offset: 0,
            fragment_length: serialized.len() as u32,
        };
        self.next_send_seq = self
            .next_send_seq
            .checked_add(1)
            .ok_or_else(|| Error::ProtocolViolation("message_seq exhausted".to_string()))?;

        let mut payload = Buf::new();
        header.serialize(&mut payload);
        payload.extend_from_slice(&serialized);
        self.transcript.extend_from_slice(&payload);

        self.flight.push(FlightEntry {
            content_type: ContentType::Handshake,
            epoch: self.records.write_epoch(),
            payload,
        });
        Ok(())
    }

    /// Add ChangeCipherSpec to the flight and switch our write side to the
    /// next epoch.
    pub(crate) fn send_change_cipher_spec(&mut self) -> Result<(), Error> {
        self.flight.push(FlightEntry {
            content_type: ContentType::ChangeCipherSpec,
            epoch: self.records.write_epoch(),
            payload: Buf::from_slice(&[1]),
        });
        self.records.activate_write()
    }

    /// Transmit the flight built since [`begin_flight`](Self::begin_flight).
    ///
    /// Called once the flight is complete and the state has moved on. If
    /// the queue fills up halfway, the saved flight is still whole and the
    /// next retransmission sends all of it.
    pub(crate) fn send_flight(&mut self, out: &mut Outbox) -> Result<(), Error> {
        diag!(
            self.diag,
            Trace,
            "{}: sending flight {} ({} records)",
            self.peer,
            self.flight_no,
            self.flight.len()
        );
        self.transmit_flight(out)
    }

    /// Send the saved flight again, with fresh record sequence numbers.
    pub fn resend_flight(&mut self, out: &mut Outbox, reason: &str) -> Result<(), Error> {
        diag!(
            self.diag,
            Debug,
            "{}: resending flight {} ({})",
            self.peer,
            self.flight_no,
            reason
        );
        self.transmit_flight(out)
    }

    fn transmit_flight(&mut self, out: &mut Outbox) -> Result<(), Error> {
        let entries = std::mem::take(&mut self.flight);
        let res = entries.iter().try_for_each(|e| self.transmit(e, out));
        self.flight = entries;
        res
    }

    fn transmit(&mut self, entry: &FlightEntry, out: &mut Outbox) -> Result<(), Error> {
        if entry.content_type != ContentType::Handshake {
            return self.send_record(entry.content_type, entry.epoch, &entry.payload, out);
        }

        let Ok((body, header)) = Header::parse(&entry.payload) else {
            return Err(Error::ProtocolViolation("corrupt saved flight".to_string()));
        };

        let fixed = DTLSRecord::HEADER_LEN + Header::LEN + self.records.overhead(entry.epoch);
        let total = body.len();
        let mut offset = 0;

        // At least one record, even for an empty body.
        loop {
            let space = out.queue.space_in_last(&self.peer);
            let available = if space > fixed {
                space - fixed
            } else {
                out.queue.mtu().saturating_sub(fixed)
            };
            let chunk = (total - offset).min(available);

            let fragment = Fragment {
                header: Header {
                    fragment_offset: offset as u32,
                    fragment_length: chunk as u32,
                    ..header
                },
                body: &body[offset..offset + chunk],
            };
            let mut plaintext = Buf::new();
            fragment.serialize(&mut plaintext);
            self.send_record(ContentType::Handshake, entry.epoch, &plaintext, out)?;

            offset += chunk;
            if offset >= total || chunk == 0 {
                break;
            }
        }

        Ok(())
    }

    fn send_record(
        &mut self,
        content_type: ContentType,
        epoch: u16,
        plaintext: &[u8],
        out: &mut Outbox,
    ) -> Result<(), Error> {
        let mut wire = Buf::new();
        self.records.encode(content_type, epoch, plaintext, &mut wire)?;
        out.queue.push_record(self.peer, &wire)
    }

    pub fn send_alert(&mut self, alert: Alert, out: &mut Outbox) -> Result<(), Error> {
        let mut payload = Buf::new();
        alert.serialize(&mut payload);
        let epoch = self.records.write_epoch();
        self.send_record(ContentType::Alert, epoch, &payload, out)
    }

    pub fn write(&mut self, data: &[u8], out: &mut Outbox) -> Result<(), Error> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        let epoch = self.records.write_epoch();
        let wire_len = DTLSRecord::HEADER_LEN + self.records.overhead(epoch) + data.len();
        if wire_len > out.queue.mtu() {
            return Err(Error::DataTooLarge(data.len()));
        }
        self.last_activity = out.now;
        self.send_record(ContentType::ApplicationData, epoch, data, out)
    }

    /// Tell the caller the handshake finished.
    pub(crate) fn complete(&mut self, out: &mut Outbox) {
        self.state = HandshakeState::Connected;
        self.step = Step::Done;
        self.reassembler.clear();
        out.timers.cancel(&self.peer);
        diag!(
            self.diag,
            Info,
            "{}: connected with {:?}",
            self.peer,
            self.cipher_suite
        );
        out.events.push_back(Event::Connected(self.peer));
    }
}

impl Evictable for Session {
    fn is_established(&self) -> bool {
        self.is_connected()
    }

    fn last_activity(&self) -> Instant {
        self.last_activity
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("cipher_suite", &self.cipher_suite)
            .field("records", &self.records)
            .field("flight", &self.flight_no)
            .finish()
    }
}
