//! tinydtls is a sans-IO DTLS 1.2 engine for constrained peers.
//!
//! A single [`Context`] drives any number of peers, acting as client for
//! sessions it opened with [`Context::connect`] and as server for peers that
//! complete the cookie exchange. The engine never touches sockets or clocks:
//! the caller feeds it datagrams and timeouts and drains [`Output`] values.
//!
//! Peers authenticate with pre-shared keys. The supported suites are
//!
//! * `TLS_ECDHE_PSK_WITH_AES_128_GCM_SHA256`
//! * `TLS_PSK_WITH_AES_128_GCM_SHA256`
//! * `TLS_PSK_WITH_AES_256_GCM_SHA384`
//! * `TLS_PSK_WITH_AES_128_CCM_8`
//!
//! ```no_run
//! # #[cfg(feature = "rust-crypto")]
//! # fn main() {
//! use std::sync::Arc;
//! use std::time::Instant;
//! use tinydtls::{Config, Context, Output, PeerId, StaticPsk};
//!
//! let config = Config::builder()
//!     .with_psk_resolver(StaticPsk::new().with_key(b"sensor-17", b"secret-key"))
//!     .build()
//!     .unwrap();
//!
//! let mut server = Context::new(Arc::new(config), Instant::now());
//! let peer = PeerId::from("192.0.2.17:5684".parse::<std::net::SocketAddr>().unwrap());
//!
//! # let datagram = [0u8; 0];
//! server.handle_datagram(peer, &datagram, Instant::now()).unwrap();
//!
//! let mut buf = vec![0; 2048];
//! loop {
//!     match server.poll_output(&mut buf) {
//!         Output::Packet { peer, data } => { /* send data to peer */ }
//!         Output::ApplicationData { peer, data } => { /* deliver */ }
//!         Output::Timeout(_) => break,
//!         _ => {}
//!     }
//! }
//! # }
//! # #[cfg(not(feature = "rust-crypto"))]
//! # fn main() {}
//! ```
#![forbid(unsafe_code)]
#![warn(clippy::all)]

#[macro_use]
mod diag;

mod buffer;
mod config;
mod context;
mod cookie;
mod error;
mod fragment;
mod handshake;
mod message;
mod peers;
mod psk;
mod queue;
mod record_layer;
mod rng;
mod session;
mod timer;
mod types;
mod util;
mod window;

pub mod crypto;

pub use buffer::Buf;
pub use config::{Config, ConfigBuilder};
pub use context::{Context, Output};
pub use crypto::KeyingMaterial;
pub use error::Error;
pub use handshake::HandshakeState;
pub use message::{Alert, AlertDescription, AlertLevel, CipherSuite, ProtocolVersion};
pub use peers::PeerId;
pub use psk::{PskResolver, StaticPsk};
pub use types::{ContentType, HashAlgorithm, NamedGroup};

pub(crate) use rng::SeededRng;
