//! TLS 1.2 key schedule for PSK handshakes.

use std::ops::Deref;

use zeroize::Zeroizing;

use crate::buffer::Buf;
use crate::crypto::aead::Iv;
use crate::crypto::provider::{CryptoProvider, SupportedCipherSuite};
use crate::types::HashAlgorithm;

/// Length of verify_data in Finished.
pub(crate) const VERIFY_DATA_LEN: usize = 12;

const MASTER_SECRET_LEN: usize = 48;

/// Keying material exported from an established session.
pub struct KeyingMaterial(Zeroizing<Vec<u8>>);

impl KeyingMaterial {
    pub(crate) fn new(m: Vec<u8>) -> Self {
        KeyingMaterial(Zeroizing::new(m))
    }
}

impl Deref for KeyingMaterial {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for KeyingMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyingMaterial")
    }
}

/// Build the premaster secret of a PSK key exchange.
///
/// `u16 len ‖ other_secret ‖ u16 len ‖ psk`, where `other_secret` is the
/// ECDHE shared secret or, for plain PSK, zeros the length of the key.
pub(crate) fn psk_premaster_secret(psk: &[u8], shared_secret: Option<&[u8]>) -> Zeroizing<Vec<u8>> {
    let zeros;
    let other = match shared_secret {
        Some(z) => z,
        None => {
            zeros = vec![0u8; psk.len()];
            &zeros[..]
        }
    };

    let mut pms = Zeroizing::new(Vec::with_capacity(4 + other.len() + psk.len()));
    pms.extend_from_slice(&(other.len() as u16).to_be_bytes());
    pms.extend_from_slice(other);
    pms.extend_from_slice(&(psk.len() as u16).to_be_bytes());
    pms.extend_from_slice(psk);
    pms
}

/// Traffic keys for both directions.
pub(crate) struct KeyBlock {
    pub client_key: Zeroizing<Vec<u8>>,
    pub server_key: Zeroizing<Vec<u8>>,
    pub client_iv: Iv,
    pub server_iv: Iv,
}

/// The negotiated master secret and the operations derived from it.
pub(crate) struct MasterSecret {
    secret: Zeroizing<Buf>,
    hash: HashAlgorithm,
}

impl MasterSecret {
    /// `PRF(pms, "master secret", client_random ‖ server_random)`
    pub fn derive(
        provider: &CryptoProvider,
        hash: HashAlgorithm,
        premaster: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
    ) -> Result<Self, String> {
        let mut seed = [0u8; 64];
        seed[..32].copy_from_slice(client_random);
        seed[32..].copy_from_slice(server_random);

        let mut secret = Zeroizing::new(Buf::new());
        let mut scratch = Buf::new();
        provider.prf_provider.prf_tls12(
            premaster,
            "master secret",
            &seed,
            &mut secret,
            MASTER_SECRET_LEN,
            &mut scratch,
            hash,
        )?;

        Ok(MasterSecret { secret, hash })
    }

    /// Expand traffic keys. The key block seed is `server_random ‖ client_random`.
    pub fn key_block(
        &self,
        provider: &CryptoProvider,
        suite: &dyn SupportedCipherSuite,
        client_random: &[u8; 32],
        server_random: &[u8; 32],
    ) -> Result<KeyBlock, String> {
        let (mac_len, key_len, iv_len) = suite.key_lengths();
        let total = 2 * (mac_len + key_len + iv_len);

        let mut seed = [0u8; 64];
        seed[..32].copy_from_slice(server_random);
        seed[32..].copy_from_slice(client_random);

        let mut block = Zeroizing::new(Buf::new());
        let mut scratch = Buf::new();
        provider.prf_provider.prf_tls12(
            &self.secret,
            "key expansion",
            &seed,
            &mut block,
            total,
            &mut scratch,
            self.hash,
        )?;

        // Skip MAC keys, AEAD suites have none.
        let keys = &block[2 * mac_len..];
        let (client_key, rest) = keys.split_at(key_len);
        let (server_key, rest) = rest.split_at(key_len);
        let (client_iv, server_iv) = rest.split_at(iv_len);

        let client_key = Zeroizing::new(client_key.to_vec());
        let server_key = Zeroizing::new(server_key.to_vec());
        let client_iv = Iv::new(client_iv).ok_or("Fixed IV must be 4 bytes")?;
        let server_iv = Iv::new(server_iv).ok_or("Fixed IV must be 4 bytes")?;

        Ok(KeyBlock {
            client_key,
            server_key,
            client_iv,
            server_iv,
        })
    }

    /// `PRF(master_secret, label, Hash(handshake_messages))[..12]`
    pub fn verify_data(
        &self,
        provider: &CryptoProvider,
        label: &str,
        transcript_hash: &[u8],
    ) -> Result<[u8; VERIFY_DATA_LEN], String> {
        let mut out = Buf::new();
        let mut scratch = Buf::new();
        provider.prf_provider.prf_tls12(
            &self.secret,
            label,
            transcript_hash,
            &mut out,
            VERIFY_DATA_LEN,
            &mut scratch,
            self.hash,
        )?;
        let mut verify = [0u8; VERIFY_DATA_LEN];
        verify.copy_from_slice(&out);
        Ok(verify)
    }

    /// RFC 5705 exporter without context.
    pub fn export(
        &self,
        provider: &CryptoProvider,
        label: &str,
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        len: usize,
    ) -> Result<KeyingMaterial, String> {
        let mut seed = [0u8; 64];
        seed[..32].copy_from_slice(client_random);
        seed[32..].copy_from_slice(server_random);

        let mut out = Buf::new();
        let mut scratch = Buf::new();
        provider
            .prf_provider
            .prf_tls12(&self.secret, label, &seed, &mut out, len, &mut scratch, self.hash)?;
        Ok(KeyingMaterial::new(out.into_vec()))
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret").field("hash", &self.hash).finish()
    }
}
