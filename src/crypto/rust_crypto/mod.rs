//! RustCrypto cryptographic provider.
//!
//! A pure Rust backend built on crates from the
//! [RustCrypto](https://github.com/RustCrypto) organization and
//! `x25519-dalek`.
//!
//! # Feature Flag
//!
//! This module is only available when the `rust-crypto` feature is enabled.
//! It is part of the default features.
//!
//! ```toml
//! tinydtls-rs = { version = "...", default-features = false }
//! ```

mod cipher_suite;
mod hash;
mod hmac;
mod kx_group;
mod random;

use crate::crypto::provider::CryptoProvider;

/// Get the default RustCrypto-based crypto provider.
///
/// # Supported Cipher Suites
///
/// - `TLS_ECDHE_PSK_WITH_AES_128_GCM_SHA256` (0xD001)
/// - `TLS_PSK_WITH_AES_128_GCM_SHA256` (0x00A8)
/// - `TLS_PSK_WITH_AES_256_GCM_SHA384` (0x00A9)
/// - `TLS_PSK_WITH_AES_128_CCM_8` (0xC0A8)
///
/// # Supported Key Exchange Groups
///
/// - `x25519`
///
/// # Random Number Generation
///
/// Uses `OsRng` from the `rand` crate.
pub fn default_provider() -> CryptoProvider {
    CryptoProvider {
        cipher_suites: cipher_suite::ALL_CIPHER_SUITES,
        kx_groups: kx_group::ALL_KX_GROUPS,
        secure_random: &random::SECURE_RANDOM,
        hash_provider: &hash::HASH_PROVIDER,
        prf_provider: &hmac::PRF_PROVIDER,
        hmac_provider: &hmac::HMAC_PROVIDER,
    }
}
