//! The engine: one [`Context`] for all peers.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::buffer::Buf;
use crate::cookie::CookieGenerator;
use crate::crypto::KeyingMaterial;
use crate::diag::Diagnostics;
use crate::fragment::CompleteMessage;
use crate::handshake::{HandshakeState, Role};
use crate::message::{Alert, AlertDescription, AlertLevel, Body, CipherSuite, Cookie};
use crate::message::{DTLSRecord, Fragment, Header, HelloVerifyRequest, MessageType, Random};
use crate::peers::{PeerId, PeerSessionTable};
use crate::queue::QueueTx;
use crate::record_layer::encode_plaintext;
use crate::session::{Event, Outbox, Session};
use crate::timer::{Action, RetransmissionScheduler};
use crate::types::{ContentType, Sequence};
use crate::{Config, Error, SeededRng};

/// Wake-up time reported when nothing is scheduled.
const DISTANT_FUTURE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Output of [`Context::poll_output`].
///
/// Borrowed data points into the buffer given to `poll_output`.
#[derive(Debug)]
pub enum Output<'a> {
    /// A datagram to send to `peer`.
    Packet { peer: PeerId, data: &'a [u8] },
    /// The handshake with `peer` completed.
    Connected { peer: PeerId },
    /// Application data received from `peer`.
    ApplicationData { peer: PeerId, data: &'a [u8] },
    /// A warning alert received from `peer`.
    Alert {
        peer: PeerId,
        level: AlertLevel,
        description: AlertDescription,
    },
    /// The session with `peer` is gone.
    Closed { peer: PeerId, reason: Error },
    /// Nothing more to do until this time. Call
    /// [`Context::handle_timeout`] then.
    Timeout(Instant),
}

/// A DTLS engine serving any number of peers.
///
/// Peers we [`connect`](Context::connect) to get a client session. Any
/// other peer that completes the cookie exchange gets a server session,
/// provided the config can resolve PSK identities.
pub struct Context {
    config: Arc<Config>,
    diag: Diagnostics,
    sessions: PeerSessionTable<Session>,
    /// Created on the first ClientHello we answer.
    cookies: Option<CookieGenerator>,
    timers: RetransmissionScheduler,
    queue: QueueTx,
    events: VecDeque<Event>,
    started: Instant,
    last_now: Instant,
}

impl Context {
    pub fn new(config: Arc<Config>, now: Instant) -> Context {
        let diag = Diagnostics::new(config.log_level());
        let timers = RetransmissionScheduler::new(
            config.flight_start_rto(),
            config.flight_max_rto(),
            config.flight_retries(),
            config.flight_rto_jitter(),
            SeededRng::new(config.rng_seed()),
        );

        Context {
            sessions: PeerSessionTable::new(config.max_sessions()),
            cookies: None,
            timers,
            queue: QueueTx::new(config.max_queue_tx(), config.mtu()),
            events: VecDeque::new(),
            started: now,
            last_now: now,
            diag,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process one received datagram from `peer`.
    ///
    /// Malformed, replayed or unauthenticated records are dropped. Errors
    /// that end a session are reported through [`Output::Closed`], so the
    /// only error returned here is [`Error::TransmitQueueFull`] and
    /// failures of the crypto provider outside any session.
    pub fn handle_datagram(
        &mut self,
        peer: PeerId,
        datagram: &[u8],
        now: Instant,
    ) -> Result<(), Error> {
        self.last_now = now;
        let hello = initial_client_hello(datagram);

        let Some(session) = self.sessions.get(&peer) else {
            return match hello {
                Some((sequence, fragment)) => self.answer_hello(peer, sequence, fragment, now),
                None => {
                    diag!(self.diag, Trace, "{}: no session, dropping datagram", peer);
                    Ok(())
                }
            };
        };

        match (session.role, hello) {
            (Role::Client, Some(_)) => {
                diag!(self.diag, Debug, "{}: ClientHello for a client session", peer);
                Ok(())
            }
            // The same client getting a new session, for instance after a reboot.
            (Role::Server, Some((sequence, fragment)))
                if hello_random(&fragment).is_some_and(|r| Some(r) != session.client_random) =>
            {
                self.answer_hello(peer, sequence, fragment, now)
            }
            _ => self.session_datagram(peer, datagram, now),
        }
    }

    /// Drive retransmissions due at `now`.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.last_now = now;

        while let Some((peer, action)) = self.timers.pop_due(now) {
            match action {
                Action::Retransmit => {
                    let Some(session) = self.sessions.get_mut(&peer) else {
                        continue;
                    };
                    let mut out = Outbox {
                        queue: &mut self.queue,
                        events: &mut self.events,
                        timers: &mut self.timers,
                        now,
                    };
                    let res = session.resend_flight(&mut out, "flight timeout");
                    self.settle(peer, res)?;
                }
                Action::Abort => {
                    diag!(self.diag, Info, "{}: handshake retries exhausted", peer);
                    self.teardown(peer, Error::Timeout("handshake"));
                }
            }
        }

        Ok(())
    }

    /// Start a handshake with `peer` as client.
    pub fn connect(&mut self, peer: PeerId, now: Instant) -> Result<(), Error> {
        self.last_now = now;

        if self.sessions.contains(&peer) {
            diag!(self.diag, Debug, "{}: already have a session", peer);
            return Ok(());
        }
        if self.config.psk_identity().is_none() || self.config.psk_key().is_none() {
            return Err(Error::ConfigError("Connecting needs a PSK".to_string()));
        }

        diag!(self.diag, Info, "{}: connecting", peer);
        let session = Session::new(Arc::clone(&self.config), self.diag, peer, Role::Client, now);
        self.admit(peer, session);

        let Some(session) = self.sessions.get_mut(&peer) else {
            return Ok(());
        };
        let mut out = Outbox {
            queue: &mut self.queue,
            events: &mut self.events,
            timers: &mut self.timers,
            now,
        };
        let res = session.start_client(&mut out);
        self.settle(peer, res)
    }

    /// Send application data to a connected peer.
    pub fn write(&mut self, peer: PeerId, data: &[u8]) -> Result<(), Error> {
        let session = self.sessions.get_mut(&peer).ok_or(Error::UnknownPeer)?;
        let mut out = Outbox {
            queue: &mut self.queue,
            events: &mut self.events,
            timers: &mut self.timers,
            now: self.last_now,
        };
        session.write(data, &mut out)
    }

    /// Send close_notify and forget the session.
    pub fn close(&mut self, peer: PeerId) -> Result<(), Error> {
        let mut session = self.sessions.remove(&peer).ok_or(Error::UnknownPeer)?;
        self.timers.cancel(&peer);
        diag!(self.diag, Info, "{}: closing", peer);

        let mut out = Outbox {
            queue: &mut self.queue,
            events: &mut self.events,
            timers: &mut self.timers,
            now: self.last_now,
        };
        session.send_alert(Alert::warning(AlertDescription::CloseNotify), &mut out)
    }

    /// Next output: queued packets, then events, then the next timeout.
    /// Call repeatedly until it returns [`Output::Timeout`].
    ///
    /// Panics if `buf` is smaller than the data to hand out. A buffer of
    /// the configured MTU is always enough.
    pub fn poll_output<'a>(&mut self, buf: &'a mut [u8]) -> Output<'a> {
        if let Some((peer, datagram)) = self.queue.pop_front() {
            let len = datagram.len();
            assert!(
                len <= buf.len(),
                "Output buffer too small for packet {} > {}",
                len,
                buf.len()
            );
            buf[..len].copy_from_slice(&datagram);
            self.queue.recycle(datagram);
            return Output::Packet {
                peer,
                data: &buf[..len],
            };
        }

        if let Some(event) = self.events.pop_front() {
            return match event {
                Event::Connected(peer) => Output::Connected { peer },
                Event::ApplicationData(peer, data) => {
                    let len = data.len();
                    assert!(
                        len <= buf.len(),
                        "Output buffer too small for application data {} > {}",
                        len,
                        buf.len()
                    );
                    buf[..len].copy_from_slice(&data);
                    self.queue.recycle(data);
                    Output::ApplicationData {
                        peer,
                        data: &buf[..len],
                    }
                }
                Event::Alert(peer, alert) => Output::Alert {
                    peer,
                    level: alert.level,
                    description: alert.description,
                },
                Event::Closed(peer, reason) => Output::Closed { peer, reason },
            };
        }

        let next = self
            .timers
            .next_deadline()
            .unwrap_or(self.last_now + DISTANT_FUTURE);
        Output::Timeout(next)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn state(&self, peer: PeerId) -> Option<HandshakeState> {
        self.sessions.get(&peer).map(|s| s.state)
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.sessions.get(&peer).is_some_and(|s| s.is_connected())
    }

    /// The negotiated suite, once the ServerHello is through.
    pub fn cipher_suite(&self, peer: PeerId) -> Option<CipherSuite> {
        self.sessions.get(&peer).and_then(|s| s.cipher_suite)
    }

    /// Export keying material for a connected peer (RFC 5705, no context).
    pub fn export_keying_material(
        &self,
        peer: PeerId,
        label: &str,
        len: usize,
    ) -> Result<KeyingMaterial, Error> {
        let session = self.sessions.get(&peer).ok_or(Error::UnknownPeer)?;
        session.export_keying_material(label, len)
    }

    fn session_datagram(&mut self, peer: PeerId, datagram: &[u8], now: Instant) -> Result<(), Error> {
        let Some(session) = self.sessions.get_mut(&peer) else {
            return Ok(());
        };
        let mut out = Outbox {
            queue: &mut self.queue,
            events: &mut self.events,
            timers: &mut self.timers,
            now,
        };
        let res = session.handle_datagram(datagram, &mut out);
        self.settle(peer, res)
    }

    /// Answer a ClientHello outside any session. Without a valid cookie we
    /// reply with a HelloVerifyRequest and keep no state at all.
    fn answer_hello(
        &mut self,
        peer: PeerId,
        sequence: Sequence,
        fragment: Fragment,
        now: Instant,
    ) -> Result<(), Error> {
        if !self.config.can_serve() {
            diag!(self.diag, Debug, "{}: not accepting handshakes", peer);
            return Ok(());
        }
        if !fragment.header.is_complete() {
            diag!(self.diag, Debug, "{}: fragmented ClientHello without session", peer);
            return Ok(());
        }
        let Ok((_, Body::ClientHello(hello))) =
            Body::parse(MessageType::ClientHello, fragment.body, None)
        else {
            diag!(self.diag, Debug, "{}: malformed ClientHello", peer);
            return Ok(());
        };

        let cookies = match self.cookies.take() {
            Some(c) => c,
            None => CookieGenerator::new(
                self.config.crypto_provider(),
                self.config.cookie_lifetime(),
                self.config.cookie_len(),
                self.started,
            )?,
        };
        let cookies = self.cookies.insert(cookies);
        let bucket = cookies.bucket(now);

        if hello.cookie.is_empty() || !cookies.verify(&peer, bucket, &hello.cookie) {
            let cookie = cookies.issue(&peer, bucket)?;
            diag!(self.diag, Debug, "{}: sending HelloVerifyRequest", peer);
            return self.send_hello_verify(peer, sequence, fragment.header.message_seq, cookie);
        }

        if let Some(old) = self.sessions.remove(&peer) {
            diag!(self.diag, Info, "{}: new handshake replaces {:?}", peer, old.state);
            self.timers.cancel(&peer);
            self.queue.discard(&peer);
            self.events.push_back(Event::Closed(peer, Error::PeerClosed));
        }

        diag!(self.diag, Info, "{}: cookie verified, accepting handshake", peer);
        let session = Session::new(Arc::clone(&self.config), self.diag, peer, Role::Server, now);
        self.admit(peer, session);

        let message = CompleteMessage {
            msg_type: MessageType::ClientHello,
            message_seq: fragment.header.message_seq,
            epoch: 0,
            body: Buf::from_slice(fragment.body),
        };

        let Some(session) = self.sessions.get_mut(&peer) else {
            return Ok(());
        };
        let mut out = Outbox {
            queue: &mut self.queue,
            events: &mut self.events,
            timers: &mut self.timers,
            now,
        };
        let res = session.start_server(sequence, &message, hello, &mut out);
        self.settle(peer, res)
    }

    /// The HelloVerifyRequest mirrors the record and message sequence
    /// numbers of the ClientHello it answers.
    fn send_hello_verify(
        &mut self,
        peer: PeerId,
        sequence: Sequence,
        message_seq: u16,
        cookie: Cookie,
    ) -> Result<(), Error> {
        let mut body = Buf::new();
        HelloVerifyRequest::new(cookie).serialize(&mut body);

        let header = Header {
            msg_type: MessageType::HelloVerifyRequest,
            length: body.len() as u32,
            message_seq,
            fragment_offset: 0,
            fragment_length: body.len() as u32,
        };
        let mut plaintext = Buf::new();
        Fragment {
            header,
            body: &body,
        }
        .serialize(&mut plaintext);

        let mut wire = Buf::new();
        encode_plaintext(ContentType::Handshake, sequence, &plaintext, &mut wire);
        self.queue.push_record(peer, &wire)
    }

    /// Put a new session in the table, evicting another if it is full.
    fn admit(&mut self, peer: PeerId, session: Session) {
        if let Some((victim, _)) = self.sessions.insert(peer, session) {
            diag!(self.diag, Info, "{}: evicted to make room for {}", victim, peer);
            self.timers.cancel(&victim);
            self.queue.discard(&victim);
            self.events.push_back(Event::Closed(victim, Error::Evicted));
        }
    }

    /// Route the outcome of session processing. A full transmit queue is
    /// the caller's problem, anything else ends the session.
    fn settle(&mut self, peer: PeerId, res: Result<(), Error>) -> Result<(), Error> {
        match res {
            Ok(()) => Ok(()),
            Err(Error::TransmitQueueFull) => Err(Error::TransmitQueueFull),
            Err(reason) => {
                self.teardown(peer, reason);
                Ok(())
            }
        }
    }

    fn teardown(&mut self, peer: PeerId, reason: Error) {
        self.timers.cancel(&peer);
        let Some(mut session) = self.sessions.remove(&peer) else {
            return;
        };
        diag!(
            self.diag,
            Info,
            "{}: session ends in {:?}: {}",
            peer,
            session.state,
            reason
        );
        session.state = HandshakeState::Aborted;

        if let Some(description) = reason.alert() {
            let mut out = Outbox {
                queue: &mut self.queue,
                events: &mut self.events,
                timers: &mut self.timers,
                now: self.last_now,
            };
            if let Err(e) = session.send_alert(Alert::fatal(description), &mut out) {
                diag!(self.diag, Debug, "{}: could not send alert: {}", peer, e);
            }
        }

        self.events.push_back(Event::Closed(peer, reason));
    }
}

/// The ClientHello fragment in the first record of a datagram, if it is one.
fn initial_client_hello(datagram: &[u8]) -> Option<(Sequence, Fragment<'_>)> {
    let (_, record) = DTLSRecord::parse(datagram).ok()?;
    if record.content_type != ContentType::Handshake || record.sequence.epoch != 0 {
        return None;
    }
    let (_, fragment) = Fragment::parse(record.fragment).ok()?;
    (fragment.header.msg_type == MessageType::ClientHello).then_some((record.sequence, fragment))
}

/// The hello random, found right after the two version bytes.
fn hello_random(fragment: &Fragment) -> Option<Random> {
    if fragment.header.fragment_offset != 0 {
        return None;
    }
    let (_, random) = Random::parse(fragment.body.get(2..)?).ok()?;
    Some(random)
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("sessions", &self.sessions.len())
            .field("timers", &self.timers.len())
            .field("queue", &self.queue)
            .field("events", &self.events.len())
            .finish()
    }
}
