//! Cipher suite implementations using RustCrypto.

use aes::Aes128;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Key};
use ccm::consts::{U12, U8};
use ccm::Ccm;

use super::super::{Cipher, SupportedCipherSuite};
use crate::buffer::Buf;
use crate::crypto::{Aad, Nonce};
use crate::message::CipherSuite;
use crate::types::HashAlgorithm;

/// AES-GCM cipher implementation using RustCrypto.
enum AesGcm {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl std::fmt::Debug for AesGcm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AesGcm::Aes128(_) => f.debug_tuple("AesGcm::Aes128").finish(),
            AesGcm::Aes256(_) => f.debug_tuple("AesGcm::Aes256").finish(),
        }
    }
}

impl AesGcm {
    fn new(key: &[u8]) -> Result<Self, String> {
        match key.len() {
            16 => {
                let key = Key::<Aes128Gcm>::from_slice(key);
                Ok(AesGcm::Aes128(Box::new(Aes128Gcm::new(key))))
            }
            32 => {
                let key = Key::<Aes256Gcm>::from_slice(key);
                Ok(AesGcm::Aes256(Box::new(Aes256Gcm::new(key))))
            }
            _ => Err(format!("Invalid key size for AES-GCM: {}", key.len())),
        }
    }
}

impl Cipher for AesGcm {
    fn encrypt(&mut self, data: &mut Buf, aad: Aad, nonce: Nonce) -> Result<(), String> {
        let nonce = aes_gcm::Nonce::from_slice(&nonce.0);
        let res = match self {
            AesGcm::Aes128(cipher) => cipher.encrypt_in_place(nonce, &aad, data),
            AesGcm::Aes256(cipher) => cipher.encrypt_in_place(nonce, &aad, data),
        };
        res.map_err(|_| "AES-GCM encryption failed".to_string())
    }

    fn decrypt(&mut self, ciphertext: &mut Buf, aad: Aad, nonce: Nonce) -> Result<(), String> {
        if ciphertext.len() < 16 {
            return Err(format!("Ciphertext too short: {}", ciphertext.len()));
        }

        let nonce = aes_gcm::Nonce::from_slice(&nonce.0);
        // decrypt_in_place removes the tag and shortens the buffer
        let res = match self {
            AesGcm::Aes128(cipher) => cipher.decrypt_in_place(nonce, &aad, ciphertext),
            AesGcm::Aes256(cipher) => cipher.decrypt_in_place(nonce, &aad, ciphertext),
        };
        res.map_err(|_| "AES-GCM decryption failed".to_string())
    }
}

type Aes128Ccm8 = Ccm<Aes128, U8, U12>;

/// AES-128-CCM with an 8 byte tag.
struct AesCcm8(Box<Aes128Ccm8>);

impl std::fmt::Debug for AesCcm8 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AesCcm8").finish()
    }
}

impl AesCcm8 {
    fn new(key: &[u8]) -> Result<Self, String> {
        let cipher = Aes128Ccm8::new_from_slice(key)
            .map_err(|_| format!("Invalid key size for AES-CCM: {}", key.len()))?;
        Ok(AesCcm8(Box::new(cipher)))
    }
}

impl Cipher for AesCcm8 {
    fn encrypt(&mut self, data: &mut Buf, aad: Aad, nonce: Nonce) -> Result<(), String> {
        let nonce = GenericArray::from_slice(&nonce.0);
        self.0
            .encrypt_in_place(nonce, &aad, data)
            .map_err(|_| "AES-CCM encryption failed".to_string())
    }

    fn decrypt(&mut self, ciphertext: &mut Buf, aad: Aad, nonce: Nonce) -> Result<(), String> {
        if ciphertext.len() < 8 {
            return Err(format!("Ciphertext too short: {}", ciphertext.len()));
        }
        let nonce = GenericArray::from_slice(&nonce.0);
        self.0
            .decrypt_in_place(nonce, &aad, ciphertext)
            .map_err(|_| "AES-CCM decryption failed".to_string())
    }
}

/// TLS_ECDHE_PSK_WITH_AES_128_GCM_SHA256 cipher suite.
#[derive(Debug)]
struct EcdhePskAes128GcmSha256;

impl SupportedCipherSuite for EcdhePskAes128GcmSha256 {
    fn suite(&self) -> CipherSuite {
        CipherSuite::ECDHE_PSK_AES128_GCM_SHA256
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::SHA256
    }

    fn key_lengths(&self) -> (usize, usize, usize) {
        (0, 16, 4) // (mac_key_len, enc_key_len, fixed_iv_len)
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        Ok(Box::new(AesGcm::new(key)?))
    }
}

/// TLS_PSK_WITH_AES_128_GCM_SHA256 cipher suite.
#[derive(Debug)]
struct PskAes128GcmSha256;

impl SupportedCipherSuite for PskAes128GcmSha256 {
    fn suite(&self) -> CipherSuite {
        CipherSuite::PSK_AES128_GCM_SHA256
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::SHA256
    }

    fn key_lengths(&self) -> (usize, usize, usize) {
        (0, 16, 4)
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        Ok(Box::new(AesGcm::new(key)?))
    }
}

/// TLS_PSK_WITH_AES_256_GCM_SHA384 cipher suite.
#[derive(Debug)]
struct PskAes256GcmSha384;

impl SupportedCipherSuite for PskAes256GcmSha384 {
    fn suite(&self) -> CipherSuite {
        CipherSuite::PSK_AES256_GCM_SHA384
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::SHA384
    }

    fn key_lengths(&self) -> (usize, usize, usize) {
        (0, 32, 4)
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        Ok(Box::new(AesGcm::new(key)?))
    }
}

/// TLS_PSK_WITH_AES_128_CCM_8 cipher suite.
#[derive(Debug)]
struct PskAes128Ccm8;

impl SupportedCipherSuite for PskAes128Ccm8 {
    fn suite(&self) -> CipherSuite {
        CipherSuite::PSK_AES128_CCM_8
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::SHA256
    }

    fn key_lengths(&self) -> (usize, usize, usize) {
        (0, 16, 4)
    }

    fn create_cipher(&self, key: &[u8]) -> Result<Box<dyn Cipher>, String> {
        Ok(Box::new(AesCcm8::new(key)?))
    }
}

static ECDHE_PSK_AES_128_GCM_SHA256: EcdhePskAes128GcmSha256 = EcdhePskAes128GcmSha256;
static PSK_AES_128_GCM_SHA256: PskAes128GcmSha256 = PskAes128GcmSha256;
static PSK_AES_256_GCM_SHA384: PskAes256GcmSha384 = PskAes256GcmSha384;
static PSK_AES_128_CCM_8: PskAes128Ccm8 = PskAes128Ccm8;

/// All supported cipher suites.
pub(super) static ALL_CIPHER_SUITES: &[&dyn SupportedCipherSuite] = &[
    &ECDHE_PSK_AES_128_GCM_SHA256,
    &PSK_AES_128_GCM_SHA256,
    &PSK_AES_256_GCM_SHA384,
    &PSK_AES_128_CCM_8,
];
