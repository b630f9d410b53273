//! Sanity checks run against a crypto provider before it is used.
//!
//! Each component is exercised once with a known answer, so a broken custom
//! provider fails at config time instead of in the middle of a handshake.

use crate::buffer::Buf;
use crate::crypto::provider::{CryptoProvider, SupportedCipherSuite};
use crate::message::CipherSuite;
use crate::types::{HashAlgorithm, NamedGroup};
use crate::Error;

impl CryptoProvider {
    /// Cipher suites of this provider that the engine can negotiate.
    pub fn supported_cipher_suites(
        &self,
    ) -> impl Iterator<Item = &'static dyn SupportedCipherSuite> {
        self.cipher_suites
            .iter()
            .copied()
            .filter(|cs| CipherSuite::all().contains(&cs.suite()))
    }

    /// Validates the provider configuration.
    ///
    /// - At least one supported cipher suite
    /// - ECDHE_PSK suites have an X25519 key exchange group
    /// - Hash, PRF and HMAC providers produce known answers
    ///
    /// Returns `Error::ConfigError` if validation fails.
    pub fn validate(&self) -> Result<(), Error> {
        self.validate_cipher_suites()?;
        self.validate_kx_groups()?;
        let hashes = self.validate_hash_providers()?;
        self.validate_prf_provider(&hashes)?;
        self.validate_hmac_provider()?;
        Ok(())
    }

    fn validate_cipher_suites(&self) -> Result<(), Error> {
        if self.supported_cipher_suites().count() == 0 {
            return Err(Error::ConfigError(
                "CryptoProvider has no supported cipher suites".to_string(),
            ));
        }
        for cs in self.supported_cipher_suites() {
            if cs.hash_algorithm() != cs.suite().hash_algorithm() {
                return Err(Error::ConfigError(format!(
                    "Cipher suite {:?} reports hash {:?}",
                    cs.suite(),
                    cs.hash_algorithm()
                )));
            }
        }
        Ok(())
    }

    fn validate_kx_groups(&self) -> Result<(), Error> {
        let has_ecdhe = self.supported_cipher_suites().any(|cs| cs.suite().needs_ecdhe());
        if has_ecdhe && self.find_kx_group(NamedGroup::X25519).is_none() {
            return Err(Error::ConfigError(
                "CryptoProvider has ECDHE_PSK cipher suites but no X25519 group".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the list of validated hash algorithms.
    fn validate_hash_providers(&self) -> Result<Vec<HashAlgorithm>, Error> {
        let mut required: Vec<HashAlgorithm> = Vec::new();
        for cs in self.supported_cipher_suites() {
            if !required.contains(&cs.hash_algorithm()) {
                required.push(cs.hash_algorithm());
            }
        }

        for hash_alg in &required {
            let mut hasher = self
                .hash_provider
                .create_hash(*hash_alg)
                .map_err(|e| Error::ConfigError(format!("Hash provider failed: {}", e)))?;
            hasher.update(&[]);
            let mut result = Buf::new();
            hasher.clone_and_finalize(&mut result);

            let Some(expected) = known_answer(HASH_TEST_VECTORS, *hash_alg) else {
                return Err(Error::ConfigError(format!(
                    "No expected hash data for hash algorithm: {:?}",
                    hash_alg
                )));
            };

            if result.as_ref() != expected {
                return Err(Error::ConfigError(format!(
                    "Hash provider {:?} produced incorrect result",
                    hash_alg
                )));
            }
        }

        Ok(required)
    }

    fn validate_prf_provider(&self, hashes: &[HashAlgorithm]) -> Result<(), Error> {
        let secret = b"test_secret";
        let label = "test label";
        let seed = b"test_seed";
        let output_len = 32;

        for &hash_alg in hashes {
            let mut result = Buf::new();
            let mut scratch = Buf::new();
            self.prf_provider
                .prf_tls12(secret, label, seed, &mut result, output_len, &mut scratch, hash_alg)
                .map_err(|e| {
                    Error::ConfigError(format!("PRF provider failed for {:?}: {}", hash_alg, e))
                })?;

            let Some(expected) = known_answer(PRF_TEST_VECTORS, hash_alg) else {
                return Err(Error::ConfigError(format!(
                    "No expected PRF data for hash algorithm: {:?}",
                    hash_alg
                )));
            };

            if result.as_ref() != expected {
                return Err(Error::ConfigError(format!(
                    "PRF provider {:?} produced incorrect result",
                    hash_alg
                )));
            }
        }

        Ok(())
    }

    /// HMAC-SHA256 is required for cookie computation.
    fn validate_hmac_provider(&self) -> Result<(), Error> {
        let key = b"key";
        let data = b"The quick brown fox jumps over the lazy dog";

        let result = self
            .hmac_provider
            .hmac_sha256(key, data)
            .map_err(|e| Error::ConfigError(format!("HMAC provider failed: {}", e)))?;

        if result.as_slice() != HMAC_SHA256_TEST_VECTOR {
            return Err(Error::ConfigError(
                "HMAC provider produced incorrect result for HMAC-SHA256".to_string(),
            ));
        }

        Ok(())
    }
}

fn known_answer(table: &[(HashAlgorithm, &'static [u8])], hash: HashAlgorithm) -> Option<&'static [u8]> {
    table.iter().find(|(h, _)| *h == hash).map(|(_, v)| *v)
}

const HASH_TEST_VECTORS: &[(HashAlgorithm, &[u8])] = &[
    (
        HashAlgorithm::SHA256,
        &[
            0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f,
            0xb9, 0x24, 0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b,
            0x78, 0x52, 0xb8, 0x55,
        ],
    ),
    (
        HashAlgorithm::SHA384,
        &[
            0x38, 0xb0, 0x60, 0xa7, 0x51, 0xac, 0x96, 0x38, 0x4c, 0xd9, 0x32, 0x7e, 0xb1, 0xb1,
            0xe3, 0x6a, 0x21, 0xfd, 0xb7, 0x11, 0x14, 0xbe, 0x07, 0x43, 0x4c, 0x0c, 0xc7, 0xbf,
            0x63, 0xf6, 0xe1, 0xda, 0x27, 0x4e, 0xde, 0xbf, 0xe7, 0x6f, 0x65, 0xfb, 0xd5, 0x1a,
            0xd2, 0xf1, 0x48, 0x98, 0xb9, 0x5b,
        ],
    ),
];

// Test vectors for TLS 1.2 PRF
// Generated using: PRF(secret="test_secret", label="test label", seed="test_seed", output_len=32)
const PRF_TEST_VECTORS: &[(HashAlgorithm, &[u8])] = &[
    (
        HashAlgorithm::SHA256,
        &[
            0xc7, 0x49, 0xce, 0xdf, 0xad, 0xaf, 0x3d, 0xf1, 0x18, 0x2c, 0xa2, 0x25, 0xab, 0xe9,
            0x4e, 0x0c, 0x19, 0xc3, 0x81, 0x49, 0x57, 0xbd, 0xdc, 0x28, 0x55, 0x78, 0x73, 0xdb,
            0xb7, 0x9f, 0xce, 0x29,
        ],
    ),
    (
        HashAlgorithm::SHA384,
        &[
            0x74, 0x9a, 0xf3, 0x03, 0x23, 0x9e, 0x3f, 0x65, 0x4e, 0x9a, 0xd1, 0xb1, 0xd1, 0x22,
            0x31, 0x02, 0x1a, 0xd2, 0x17, 0x26, 0x04, 0x75, 0x21, 0xf4, 0x66, 0xad, 0xcd, 0x37,
            0x2b, 0xe4, 0x7e, 0x8b,
        ],
    ),
];

// Test vector for HMAC-SHA256
// HMAC-SHA256(key="key", data="The quick brown fox jumps over the lazy dog")
// Computed using standard HMAC-SHA256 implementation
const HMAC_SHA256_TEST_VECTOR: &[u8] = &[
    0xf7, 0xbc, 0x83, 0xf4, 0x30, 0x53, 0x84, 0x24, 0xb1, 0x32, 0x98, 0xe6, 0xaa, 0x6f, 0xb1, 0x43,
    0xef, 0x4d, 0x59, 0xa1, 0x49, 0x46, 0x17, 0x59, 0x97, 0x47, 0x9d, 0xbc, 0x2d, 0x1a, 0x3c, 0xd8,
];

#[cfg(all(test, feature = "rust-crypto"))]
mod tests {
    use super::*;
    use crate::crypto::rust_crypto;

    #[test]
    fn default_provider_validates() {
        let provider = rust_crypto::default_provider();
        assert!(provider.validate().is_ok());
        assert_eq!(provider.supported_cipher_suites().count(), 4);
    }

    #[test]
    fn ecdhe_suite_without_group_is_rejected() {
        let provider = CryptoProvider {
            kx_groups: &[],
            ..rust_crypto::default_provider()
        };
        assert!(matches!(provider.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn empty_provider_is_rejected() {
        let provider = CryptoProvider {
            cipher_suites: &[],
            ..rust_crypto::default_provider()
        };
        assert!(matches!(provider.validate(), Err(Error::ConfigError(_))));
    }
}
