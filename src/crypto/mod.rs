//! Cryptographic primitives and helpers used by the engine.

mod aead;
mod keying;
pub mod provider;
mod validation;

#[cfg(feature = "rust-crypto")]
pub mod rust_crypto;

pub use aead::{Aad, Nonce};
pub(crate) use aead::{Iv, EXPLICIT_NONCE_LEN};

pub use keying::KeyingMaterial;
pub(crate) use keying::{psk_premaster_secret, MasterSecret, VERIFY_DATA_LEN};

pub use provider::{ActiveKeyExchange, Cipher, CryptoProvider, CryptoSafe, HashContext};
pub use provider::{HashProvider, HmacProvider, PrfProvider, SecureRandom};
pub use provider::{SupportedCipherSuite, SupportedKxGroup};

// Shared types for provider trait implementations
pub use crate::buffer::Buf;
pub use crate::message::CipherSuite;
pub use crate::types::{HashAlgorithm, NamedGroup};
