//! HMAC and the TLS 1.2 PRF using RustCrypto.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha384};

use crate::buffer::Buf;
use crate::crypto::provider::{HmacProvider, PrfProvider};
use crate::types::HashAlgorithm;

/// TLS 1.2 P_hash expansion.
fn p_hash(
    hash_alg: HashAlgorithm,
    secret: &[u8],
    full_seed: &[u8],
    out: &mut Buf,
    output_len: usize,
) -> Result<(), String> {
    match hash_alg {
        HashAlgorithm::SHA256 => p_hash_with::<Hmac<Sha256>>(secret, full_seed, out, output_len),
        HashAlgorithm::SHA384 => p_hash_with::<Hmac<Sha384>>(secret, full_seed, out, output_len),
        _ => Err(format!("Unsupported HMAC hash algorithm: {:?}", hash_alg)),
    }
}

fn p_hash_with<M: Mac + hmac::digest::KeyInit + Clone>(
    secret: &[u8],
    full_seed: &[u8],
    out: &mut Buf,
    output_len: usize,
) -> Result<(), String> {
    out.clear();

    let key = <M as hmac::digest::KeyInit>::new_from_slice(secret)
        .map_err(|_| "Invalid HMAC key length".to_string())?;

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut a_mac = key.clone();
    a_mac.update(full_seed);
    let mut a = a_mac.finalize().into_bytes();

    while out.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let mut ctx = key.clone();
        ctx.update(&a);
        ctx.update(full_seed);
        let output = ctx.finalize().into_bytes();

        let remaining = output_len - out.len();
        let to_copy = remaining.min(output.len());
        out.extend_from_slice(&output[..to_copy]);

        if out.len() < output_len {
            // A(i+1) = HMAC_hash(secret, A(i))
            let mut next_a = key.clone();
            next_a.update(&a);
            a = next_a.finalize().into_bytes();
        }
    }

    Ok(())
}

#[derive(Debug)]
pub(super) struct RustCryptoHmacProvider;

impl HmacProvider for RustCryptoHmacProvider {
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> Result<[u8; 32], String> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key)
            .map_err(|_| "Invalid HMAC key".to_string())?;
        mac.update(data);
        let bytes = mac.finalize().into_bytes();

        let mut output = [0u8; 32];
        output.copy_from_slice(&bytes);
        Ok(output)
    }
}

pub(super) static HMAC_PROVIDER: RustCryptoHmacProvider = RustCryptoHmacProvider;

#[derive(Debug)]
pub(super) struct RustCryptoPrfProvider;

impl PrfProvider for RustCryptoPrfProvider {
    fn prf_tls12(
        &self,
        secret: &[u8],
        label: &str,
        seed: &[u8],
        out: &mut Buf,
        output_len: usize,
        scratch: &mut Buf,
        hash: HashAlgorithm,
    ) -> Result<(), String> {
        if !label.is_ascii() {
            return Err(format!("PRF label {:?} is not ASCII", label));
        }
        scratch.clear();
        scratch.extend_from_slice(label.as_bytes());
        scratch.extend_from_slice(seed);
        p_hash(hash, secret, scratch, out, output_len)
    }
}

pub(super) static PRF_PROVIDER: RustCryptoPrfProvider = RustCryptoPrfProvider;
