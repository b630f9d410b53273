//! Stateless cookies for the HelloVerifyRequest exchange.
//!
//! A cookie is an HMAC over the peer identity and a time bucket. The secret
//! is regenerated every bucket and the previous one is kept so a cookie
//! issued just before a rotation still verifies. Nothing is stored per peer.

use std::time::{Duration, Instant};

use zeroize::Zeroizing;

use crate::crypto::{CryptoProvider, HmacProvider, SecureRandom};
use crate::message::Cookie;
use crate::peers::PeerId;
use crate::util::constant_time_eq;
use crate::Error;

struct Secret {
    bucket: u64,
    key: Zeroizing<[u8; 32]>,
}

pub(crate) struct CookieGenerator {
    current: Secret,
    previous: Option<Secret>,
    cookie_len: usize,
    lifetime: Duration,
    start: Instant,
    hmac: &'static dyn HmacProvider,
    random: &'static dyn SecureRandom,
}

impl CookieGenerator {
    pub fn new(
        provider: &CryptoProvider,
        lifetime: Duration,
        cookie_len: usize,
        now: Instant,
    ) -> Result<Self, Error> {
        let random = provider.secure_random;
        Ok(CookieGenerator {
            current: Secret::generate(random, 0)?,
            previous: None,
            cookie_len,
            lifetime,
            start: now,
            hmac: provider.hmac_provider,
            random,
        })
    }

    /// Time bucket `now` falls in.
    pub fn bucket(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.start).as_nanos();
        (elapsed / self.lifetime.as_nanos().max(1)) as u64
    }

    pub fn issue(&mut self, peer: &PeerId, bucket: u64) -> Result<Cookie, Error> {
        self.rotate(bucket)?;
        let mac = self.mac(&self.current.key, peer, bucket)?;
        Cookie::try_new(&mac[..self.cookie_len]).map_err(|e| Error::CryptoError(e.to_string()))
    }

    /// Check a cookie against the current and the preceding bucket.
    pub fn verify(&mut self, peer: &PeerId, bucket: u64, cookie: &[u8]) -> bool {
        if cookie.len() != self.cookie_len || self.rotate(bucket).is_err() {
            return false;
        }

        let candidates = [Some(&self.current), self.previous.as_ref()];

        for secret in candidates.into_iter().flatten() {
            if secret.bucket + 1 < bucket {
                continue;
            }
            let Ok(mac) = self.mac(&secret.key, peer, secret.bucket) else {
                return false;
            };
            if constant_time_eq(&mac[..self.cookie_len], cookie) {
                return true;
            }
        }

        false
    }

    fn rotate(&mut self, bucket: u64) -> Result<(), Error> {
        if bucket <= self.current.bucket {
            return Ok(());
        }
        let next = Secret::generate(self.random, bucket)?;
        let old = std::mem::replace(&mut self.current, next);
        self.previous = (old.bucket + 1 == bucket).then_some(old);
        Ok(())
    }

    fn mac(&self, key: &[u8; 32], peer: &PeerId, bucket: u64) -> Result<[u8; 32], Error> {
        let mut data = peer.to_bytes();
        data.extend_from_slice(&bucket.to_be_bytes());
        self.hmac.hmac_sha256(key, &data).map_err(Error::CryptoError)
    }
}

impl Secret {
    fn generate(random: &dyn SecureRandom, bucket: u64) -> Result<Secret, Error> {
        let mut key = Zeroizing::new([0; 32]);
        random.fill(&mut key[..]).map_err(Error::CryptoError)?;
        Ok(Secret { bucket, key })
    }
}

impl std::fmt::Debug for CookieGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieGenerator")
            .field("bucket", &self.current.bucket)
            .field("cookie_len", &self.cookie_len)
            .finish()
    }
}
