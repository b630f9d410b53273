//! Shared helpers for the engine integration tests.

#![allow(unused)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tinydtls::{AlertDescription, AlertLevel, Config, ConfigBuilder, Context, Error, Output};
use tinydtls::{PeerId, StaticPsk};

pub const IDENTITY: &[u8] = b"sensor-17";
pub const KEY: &[u8] = b"0123456789abcdef";

/// Record content types.
pub const CHANGE_CIPHER_SPEC: u8 = 20;
pub const ALERT: u8 = 21;
pub const HANDSHAKE: u8 = 22;
pub const APPLICATION_DATA: u8 = 23;

/// Handshake message types.
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;
pub const SERVER_KEY_EXCHANGE: u8 = 12;
pub const SERVER_HELLO_DONE: u8 = 14;
pub const CLIENT_KEY_EXCHANGE: u8 = 16;

pub fn client_addr() -> PeerId {
    PeerId::from("192.0.2.1:40000".parse::<SocketAddr>().unwrap())
}

pub fn server_addr() -> PeerId {
    PeerId::from("192.0.2.2:5684".parse::<SocketAddr>().unwrap())
}

pub fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn client_builder() -> ConfigBuilder {
    Config::builder().with_psk(IDENTITY, KEY)
}

pub fn server_builder() -> ConfigBuilder {
    Config::builder().with_psk_resolver(StaticPsk::new().with_key(IDENTITY, KEY))
}

/// Parsed DTLS record header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rec {
    pub ctype: u8,
    pub epoch: u16,
    pub seq: u64,
    pub payload: Vec<u8>,
}

impl Rec {
    /// Handshake message type, for plaintext handshake records.
    pub fn msg_type(&self) -> Option<u8> {
        (self.ctype == HANDSHAKE && self.epoch == 0).then(|| self.payload[0])
    }

    pub fn message_seq(&self) -> u16 {
        u16::from_be_bytes([self.payload[4], self.payload[5]])
    }

    pub fn fragment_offset(&self) -> u32 {
        u32::from_be_bytes([0, self.payload[6], self.payload[7], self.payload[8]])
    }
}

/// Split a datagram into records.
pub fn parse_records(datagram: &[u8]) -> Vec<Rec> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let mut seq_bytes = [0u8; 8];
        seq_bytes[2..].copy_from_slice(&datagram[i + 5..i + 11]);
        let seq = u64::from_be_bytes(seq_bytes);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        let payload = datagram[i + 13..i + 13 + len].to_vec();
        out.push(Rec {
            ctype,
            epoch,
            seq,
            payload,
        });
        i += 13 + len;
    }
    out
}

pub fn records(datagrams: &[Vec<u8>]) -> Vec<Rec> {
    datagrams.iter().flat_map(|d| parse_records(d)).collect()
}

/// Message types of the plaintext handshake records in `datagrams`.
pub fn handshake_types(datagrams: &[Vec<u8>]) -> Vec<u8> {
    records(datagrams).iter().filter_map(|r| r.msg_type()).collect()
}

/// Everything a context produced until it asked for a timeout.
#[derive(Default, Debug)]
pub struct Drained {
    pub packets: Vec<Vec<u8>>,
    /// Same packets with their destination.
    pub sent: Vec<(PeerId, Vec<u8>)>,
    pub connected: Vec<PeerId>,
    pub app_data: Vec<Vec<u8>>,
    pub alerts: Vec<(AlertLevel, AlertDescription)>,
    pub closed: Vec<(PeerId, Error)>,
    pub timeout: Option<Instant>,
}

pub fn drain(ctx: &mut Context) -> Drained {
    let mut result = Drained::default();
    let mut buf = vec![0u8; 2048];
    loop {
        match ctx.poll_output(&mut buf) {
            Output::Packet { peer, data } => {
                result.packets.push(data.to_vec());
                result.sent.push((peer, data.to_vec()));
            }
            Output::Connected { peer } => result.connected.push(peer),
            Output::ApplicationData { data, .. } => result.app_data.push(data.to_vec()),
            Output::Alert {
                level, description, ..
            } => result.alerts.push((level, description)),
            Output::Closed { peer, reason } => result.closed.push((peer, reason)),
            Output::Timeout(t) => {
                result.timeout = Some(t);
                break;
            }
        }
    }
    result
}

/// A client context and a server context wired back to back.
pub struct Pair {
    pub client: Context,
    pub server: Context,
    pub now: Instant,
}

impl Pair {
    pub fn new(client: ConfigBuilder, server: ConfigBuilder) -> Pair {
        init_log();
        let now = Instant::now();
        Pair {
            client: Context::new(Arc::new(client.build().unwrap()), now),
            server: Context::new(Arc::new(server.build().unwrap()), now),
            now,
        }
    }

    pub fn connect(&mut self) {
        self.client.connect(server_addr(), self.now).unwrap();
    }

    pub fn to_server(&mut self, packets: &[Vec<u8>]) {
        for p in packets {
            self.server
                .handle_datagram(client_addr(), p, self.now)
                .unwrap();
        }
    }

    pub fn to_client(&mut self, packets: &[Vec<u8>]) {
        for p in packets {
            self.client
                .handle_datagram(server_addr(), p, self.now)
                .unwrap();
        }
    }

    /// Drain the client and deliver its packets to the server.
    pub fn client_turn(&mut self) -> Drained {
        let out = drain(&mut self.client);
        self.to_server(&out.packets);
        out
    }

    /// Drain the server and deliver its packets to the client.
    pub fn server_turn(&mut self) -> Drained {
        let out = drain(&mut self.server);
        self.to_client(&out.packets);
        out
    }

    pub fn advance(&mut self, d: Duration) {
        self.now += d;
        self.client.handle_timeout(self.now).unwrap();
        self.server.handle_timeout(self.now).unwrap();
    }

    /// Exchange packets until both sides report Connected.
    pub fn handshake(&mut self) {
        self.connect();
        let mut client_connected = false;
        let mut server_connected = false;

        for _ in 0..20 {
            let c = self.client_turn();
            let s = self.server_turn();
            assert!(c.closed.is_empty(), "client closed: {:?}", c.closed);
            assert!(s.closed.is_empty(), "server closed: {:?}", s.closed);
            client_connected |= !c.connected.is_empty();
            server_connected |= !s.connected.is_empty();
            if client_connected && server_connected {
                // Hand over whatever is still queued.
                self.client_turn();
                self.server_turn();
                return;
            }
        }
        panic!("handshake did not complete");
    }
}

/// Run a handshake between `client`, seen by the server as `client_peer`,
/// and `server`, seen by the client as `server_peer`.
///
/// Returns the server's events along the way.
pub fn handshake_between(
    client: &mut Context,
    client_peer: PeerId,
    server: &mut Context,
    server_peer: PeerId,
    now: Instant,
) -> Drained {
    let mut events = Drained::default();
    client.connect(server_peer, now).unwrap();
    for _ in 0..20 {
        let c = drain(client);
        for (to, p) in &c.sent {
            assert_eq!(*to, server_peer);
            server.handle_datagram(client_peer, p, now).unwrap();
        }
        let s = drain(server);
        for (to, p) in &s.sent {
            if *to == client_peer {
                client.handle_datagram(server_peer, p, now).unwrap();
            }
        }
        events.connected.extend(s.connected);
        events.closed.extend(s.closed);
        events.alerts.extend(s.alerts);
        if client.is_connected(server_peer) && server.is_connected(client_peer) {
            drain(client);
            return events;
        }
    }
    panic!("handshake did not complete");
}
