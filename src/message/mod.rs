//! Wire formats of records and handshake messages.
//!
//! Parsers are written with `nom` and borrow from the datagram. Handshake
//! bodies own their data since they outlive the datagram they arrived in.

mod alert;
mod client_hello;
mod client_key_exchange;
mod extension;
mod finished;
mod handshake;
mod hello_verify;
mod id;
mod random;
mod record;
mod server_hello;
mod server_key_exchange;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub(crate) use client_hello::ClientHello;
pub(crate) use client_key_exchange::ClientKeyExchange;
pub(crate) use extension::{Extension, ExtensionType};
pub(crate) use finished::Finished;
pub(crate) use handshake::{Body, Fragment, Header, MessageType};
pub(crate) use hello_verify::HelloVerifyRequest;
pub(crate) use id::{Cookie, SessionId};
pub(crate) use random::Random;
pub(crate) use record::DTLSRecord;
pub(crate) use server_hello::ServerHello;
pub(crate) use server_key_exchange::{EcdhParams, ServerKeyExchange};

use nom::number::complete::be_u16;
use nom::IResult;

use crate::buffer::Buf;
use crate::types::HashAlgorithm;

/// Protocol version carried in records and hellos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xFEFF => ProtocolVersion::DTLS1_0,
            0xFEFD => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::DTLS1_0 => 0xFEFF,
            ProtocolVersion::DTLS1_2 => 0xFEFD,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, version) = be_u16(input)?;
        Ok((input, Self::from_u16(version)))
    }

    pub fn serialize(&self, output: &mut Buf) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

/// Key exchange family of a cipher suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchangeAlgorithm {
    /// The premaster secret is derived from the PSK alone.
    Psk,
    /// An ephemeral X25519 exchange is mixed with the PSK.
    EcdhePsk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(non_camel_case_types)]
/// Cipher suites for PSK handshakes.
pub enum CipherSuite {
    /// ECDHE with PSK authentication, AES-128-GCM, SHA-256
    ECDHE_PSK_AES128_GCM_SHA256, // 0xD001
    /// PSK, AES-128-GCM, SHA-256
    PSK_AES128_GCM_SHA256, // 0x00A8
    /// PSK, AES-256-GCM, SHA-384
    PSK_AES256_GCM_SHA384, // 0x00A9
    /// PSK, AES-128-CCM with an 8 byte tag, SHA-256
    PSK_AES128_CCM_8, // 0xC0A8

    /// Unknown or unsupported cipher suite by its IANA value
    Unknown(u16),
}

impl Default for CipherSuite {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl CipherSuite {
    /// Convert the 16-bit IANA value to a `CipherSuite`.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0xD001 => CipherSuite::ECDHE_PSK_AES128_GCM_SHA256,
            0x00A8 => CipherSuite::PSK_AES128_GCM_SHA256,
            0x00A9 => CipherSuite::PSK_AES256_GCM_SHA384,
            0xC0A8 => CipherSuite::PSK_AES128_CCM_8,
            _ => CipherSuite::Unknown(value),
        }
    }

    /// Return the 16-bit IANA value for this cipher suite.
    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::ECDHE_PSK_AES128_GCM_SHA256 => 0xD001,
            CipherSuite::PSK_AES128_GCM_SHA256 => 0x00A8,
            CipherSuite::PSK_AES256_GCM_SHA384 => 0x00A9,
            CipherSuite::PSK_AES128_CCM_8 => 0xC0A8,
            CipherSuite::Unknown(value) => *value,
        }
    }

    /// Parse a `CipherSuite` from network byte order.
    pub fn parse(input: &[u8]) -> IResult<&[u8], CipherSuite> {
        let (input, value) = be_u16(input)?;
        Ok((input, CipherSuite::from_u16(value)))
    }

    /// Hash algorithm of the PRF and the transcript.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        match self {
            CipherSuite::ECDHE_PSK_AES128_GCM_SHA256
            | CipherSuite::PSK_AES128_GCM_SHA256
            | CipherSuite::PSK_AES128_CCM_8 => HashAlgorithm::SHA256,
            CipherSuite::PSK_AES256_GCM_SHA384 => HashAlgorithm::SHA384,
            CipherSuite::Unknown(_) => HashAlgorithm::Unknown(0),
        }
    }

    /// The key exchange family for this cipher suite.
    pub fn key_exchange(&self) -> Option<KeyExchangeAlgorithm> {
        match self {
            CipherSuite::ECDHE_PSK_AES128_GCM_SHA256 => Some(KeyExchangeAlgorithm::EcdhePsk),
            CipherSuite::PSK_AES128_GCM_SHA256
            | CipherSuite::PSK_AES256_GCM_SHA384
            | CipherSuite::PSK_AES128_CCM_8 => Some(KeyExchangeAlgorithm::Psk),
            CipherSuite::Unknown(_) => None,
        }
    }

    /// Whether this suite needs an ephemeral key exchange group.
    pub fn needs_ecdhe(&self) -> bool {
        self.key_exchange() == Some(KeyExchangeAlgorithm::EcdhePsk)
    }

    /// Length of the authentication tag behind each protected record.
    pub fn tag_len(&self) -> usize {
        match self {
            CipherSuite::PSK_AES128_CCM_8 => 8,
            _ => 16,
        }
    }

    /// All supported cipher suites in default preference order.
    pub const fn all() -> &'static [CipherSuite] {
        &[
            CipherSuite::ECDHE_PSK_AES128_GCM_SHA256,
            CipherSuite::PSK_AES128_GCM_SHA256,
            CipherSuite::PSK_AES256_GCM_SHA384,
            CipherSuite::PSK_AES128_CCM_8,
        ]
    }
}
