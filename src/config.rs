use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::LevelFilter;
use zeroize::Zeroizing;

use crate::crypto::CryptoProvider;
use crate::message::CipherSuite;
use crate::psk::PskResolver;
use crate::Error;

/// Smallest MTU that still leaves room for headers and a useful payload.
const MIN_MTU: usize = 128;

/// Largest cookie we issue or accept.
pub(crate) const MAX_COOKIE_LEN: usize = 32;

/// Engine configuration.
#[derive(Clone)]
pub struct Config {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    max_sessions: usize,
    max_reassembly_bytes: usize,
    max_handshake_len: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    flight_rto_jitter: Duration,
    rng_seed: Option<u64>,
    epoch_grace_period: Duration,
    max_auth_failures: u32,
    cookie_lifetime: Duration,
    cookie_len: usize,
    cipher_suites: Vec<CipherSuite>,
    psk_identity: Option<Vec<u8>>,
    psk_key: Option<Zeroizing<Vec<u8>>>,
    psk_resolver: Option<Arc<dyn PskResolver>>,
    psk_identity_hint: Vec<u8>,
    log_level: LevelFilter,
    crypto_provider: CryptoProvider,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1150,
            max_queue_rx: 30,
            max_queue_tx: 64,
            max_sessions: 64,
            max_reassembly_bytes: 16384,
            max_handshake_len: 16384,
            flight_start_rto: Duration::from_secs(1),
            flight_max_rto: Duration::from_secs(60),
            flight_retries: 7,
            flight_rto_jitter: Duration::ZERO,
            rng_seed: None,
            epoch_grace_period: Duration::from_secs(4),
            max_auth_failures: 16,
            cookie_lifetime: Duration::from_secs(60),
            cookie_len: MAX_COOKIE_LEN,
            cipher_suites: CipherSuite::all().to_vec(),
            psk_identity: None,
            psk_key: None,
            psk_resolver: None,
            psk_identity_hint: Vec::new(),
            log_level: LevelFilter::Trace,
            crypto_provider: None,
        }
    }

    /// Max transmission unit.
    ///
    /// The largest datagram we will produce.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Max records held for the next read epoch before its ChangeCipherSpec.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Max amount of outgoing datagrams to buffer.
    #[inline(always)]
    pub fn max_queue_tx(&self) -> usize {
        self.max_queue_tx
    }

    /// Capacity of the session table.
    #[inline(always)]
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Bytes of partially received handshake messages kept per session.
    #[inline(always)]
    pub fn max_reassembly_bytes(&self) -> usize {
        self.max_reassembly_bytes
    }

    /// Largest handshake message accepted.
    #[inline(always)]
    pub fn max_handshake_len(&self) -> usize {
        self.max_handshake_len
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value and it doubles on every retry.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Cap for the doubled retransmission timeout.
    #[inline(always)]
    pub fn flight_max_rto(&self) -> Duration {
        self.flight_max_rto
    }

    /// Max number of retransmissions per flight before the session is aborted.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Max random deviation added to each retransmission timeout.
    #[inline(always)]
    pub fn flight_rto_jitter(&self) -> Duration {
        self.flight_rto_jitter
    }

    /// Seed for the jitter generator.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    /// How long records of the previous read epoch are still decoded.
    #[inline(always)]
    pub fn epoch_grace_period(&self) -> Duration {
        self.epoch_grace_period
    }

    /// Failed record authentications tolerated per session.
    #[inline(always)]
    pub fn max_auth_failures(&self) -> u32 {
        self.max_auth_failures
    }

    /// Length of a cookie time bucket, also the secret rotation interval.
    #[inline(always)]
    pub fn cookie_lifetime(&self) -> Duration {
        self.cookie_lifetime
    }

    /// Number of cookie bytes issued.
    #[inline(always)]
    pub fn cookie_len(&self) -> usize {
        self.cookie_len
    }

    /// Cipher suites in preference order.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// PSK identity used when connecting.
    #[inline(always)]
    pub fn psk_identity(&self) -> Option<&[u8]> {
        self.psk_identity.as_deref()
    }

    /// PSK used when connecting.
    #[inline(always)]
    pub fn psk_key(&self) -> Option<&[u8]> {
        self.psk_key.as_ref().map(|k| k.as_slice())
    }

    /// Server side identity lookup. Without it, incoming handshakes are ignored.
    #[inline(always)]
    pub fn psk_resolver(&self) -> Option<&dyn PskResolver> {
        self.psk_resolver.as_deref()
    }

    /// Identity hint sent in ServerKeyExchange.
    #[inline(always)]
    pub fn psk_identity_hint(&self) -> &[u8] {
        &self.psk_identity_hint
    }

    /// Threshold for this engine's diagnostics.
    #[inline(always)]
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    /// Cryptographic provider.
    #[inline(always)]
    pub fn crypto_provider(&self) -> &CryptoProvider {
        &self.crypto_provider
    }

    /// Whether this configuration can answer ClientHellos.
    pub(crate) fn can_serve(&self) -> bool {
        self.psk_resolver.is_some() || self.psk_key.is_some()
    }

    /// Key for an identity a client presented, through the resolver first
    /// and then our own credentials.
    pub(crate) fn resolve_psk(&self, identity: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
        if let Some(key) = self.psk_resolver.as_ref().and_then(|r| r.resolve(identity)) {
            return Some(key);
        }
        match (&self.psk_identity, &self.psk_key) {
            (Some(id), Some(key)) if id.as_slice() == identity => Some(key.clone()),
            _ => None,
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Config::builder()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("mtu", &self.mtu)
            .field("max_sessions", &self.max_sessions)
            .field("flight_start_rto", &self.flight_start_rto)
            .field("flight_max_rto", &self.flight_max_rto)
            .field("flight_retries", &self.flight_retries)
            .field("cipher_suites", &self.cipher_suites)
            .field("client", &self.psk_identity.is_some())
            .field("server", &self.psk_resolver.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for the engine configuration.
///
/// `ConfigBuilder::default()` is the same as [`Config::builder()`].
pub struct ConfigBuilder {
    mtu: usize,
    max_queue_rx: usize,
    max_queue_tx: usize,
    max_sessions: usize,
    max_reassembly_bytes: usize,
    max_handshake_len: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    flight_rto_jitter: Duration,
    rng_seed: Option<u64>,
    epoch_grace_period: Duration,
    max_auth_failures: u32,
    cookie_lifetime: Duration,
    cookie_len: usize,
    cipher_suites: Vec<CipherSuite>,
    psk_identity: Option<Vec<u8>>,
    psk_key: Option<Zeroizing<Vec<u8>>>,
    psk_resolver: Option<Arc<dyn PskResolver>>,
    psk_identity_hint: Vec<u8>,
    log_level: LevelFilter,
    crypto_provider: Option<CryptoProvider>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the max records held for the next epoch.
    ///
    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the max amount of outgoing datagrams to buffer.
    ///
    /// Defaults to 64.
    pub fn max_queue_tx(mut self, max_queue_tx: usize) -> Self {
        self.max_queue_tx = max_queue_tx;
        self
    }

    /// Set the capacity of the session table.
    ///
    /// Defaults to 64.
    pub fn max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Set the per-session reassembly cap.
    ///
    /// Defaults to 16384.
    pub fn max_reassembly_bytes(mut self, bytes: usize) -> Self {
        self.max_reassembly_bytes = bytes;
        self
    }

    /// Set the largest accepted handshake message.
    ///
    /// Defaults to 16384.
    pub fn max_handshake_len(mut self, len: usize) -> Self {
        self.max_handshake_len = len;
        self
    }

    /// Set the time of first retry.
    ///
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the cap for the doubled retry timeout.
    ///
    /// Defaults to 60 seconds.
    pub fn flight_max_rto(mut self, rto: Duration) -> Self {
        self.flight_max_rto = rto;
        self
    }

    /// Set the max number of retries per flight.
    ///
    /// Defaults to 7.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the max random deviation of each retry timeout.
    ///
    /// Defaults to zero, which gives exact doubling.
    pub fn flight_rto_jitter(mut self, jitter: Duration) -> Self {
        self.flight_rto_jitter = jitter;
        self
    }

    /// Seed the jitter generator for reproducible timing.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Set how long the previous read epoch is still decoded.
    ///
    /// Defaults to 4 seconds.
    pub fn epoch_grace_period(mut self, period: Duration) -> Self {
        self.epoch_grace_period = period;
        self
    }

    /// Set how many failed record authentications abort the session.
    ///
    /// Defaults to 16.
    pub fn max_auth_failures(mut self, failures: u32) -> Self {
        self.max_auth_failures = failures;
        self
    }

    /// Set the cookie bucket length and secret rotation interval.
    ///
    /// Defaults to 60 seconds.
    pub fn cookie_lifetime(mut self, lifetime: Duration) -> Self {
        self.cookie_lifetime = lifetime;
        self
    }

    /// Set the cookie length, at most 32.
    ///
    /// Defaults to 32.
    pub fn cookie_len(mut self, len: usize) -> Self {
        self.cookie_len = len;
        self
    }

    /// Set the cipher suites in preference order.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    /// Set the identity and key used when connecting.
    pub fn with_psk(mut self, identity: &[u8], key: &[u8]) -> Self {
        self.psk_identity = Some(identity.to_vec());
        self.psk_key = Some(Zeroizing::new(key.to_vec()));
        self
    }

    /// Accept incoming handshakes, resolving identities through `resolver`.
    pub fn with_psk_resolver(mut self, resolver: impl PskResolver + 'static) -> Self {
        self.psk_resolver = Some(Arc::new(resolver));
        self
    }

    /// Set the identity hint sent by the server.
    pub fn psk_identity_hint(mut self, hint: &[u8]) -> Self {
        self.psk_identity_hint = hint.to_vec();
        self
    }

    /// Set the diagnostics threshold of engines using this config.
    ///
    /// Defaults to `Trace`, leaving filtering to the installed logger.
    pub fn log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    /// Set a custom crypto provider.
    pub fn with_crypto_provider(mut self, provider: CryptoProvider) -> Self {
        self.crypto_provider = Some(provider);
        self
    }

    /// Build the configuration.
    ///
    /// The crypto provider is selected in the following priority order:
    /// 1. Explicit provider set via `with_crypto_provider()`
    /// 2. Default provider installed via `CryptoProvider::install_default()`
    /// 3. The RustCrypto provider (if `rust-crypto` feature is enabled)
    pub fn build(self) -> Result<Config, Error> {
        let crypto_provider = self
            .crypto_provider
            .or_else(|| CryptoProvider::get_default().cloned())
            .or_else(|| {
                #[cfg(feature = "rust-crypto")]
                {
                    Some(crate::crypto::rust_crypto::default_provider())
                }
                #[cfg(not(feature = "rust-crypto"))]
                {
                    None
                }
            })
            .ok_or_else(|| Error::ConfigError("No crypto provider available".to_string()))?;

        crypto_provider.validate()?;

        if self.mtu < MIN_MTU || self.mtu > u16::MAX as usize {
            return Err(Error::ConfigError(format!("Invalid MTU: {}", self.mtu)));
        }
        if self.cookie_len == 0 || self.cookie_len > MAX_COOKIE_LEN {
            return Err(Error::ConfigError(format!(
                "Cookie length must be 1..={}: {}",
                MAX_COOKIE_LEN, self.cookie_len
            )));
        }
        if self.cookie_lifetime.is_zero() {
            return Err(Error::ConfigError("Cookie lifetime is zero".to_string()));
        }
        if self.flight_start_rto.is_zero() || self.flight_max_rto < self.flight_start_rto {
            return Err(Error::ConfigError(
                "flight_max_rto must be at least flight_start_rto".to_string(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(Error::ConfigError("max_sessions is zero".to_string()));
        }
        if self.max_handshake_len > 0xFF_FFFF || self.max_reassembly_bytes < self.max_handshake_len
        {
            return Err(Error::ConfigError(
                "max_reassembly_bytes must hold the largest handshake message".to_string(),
            ));
        }
        if self.cipher_suites.is_empty() {
            return Err(Error::ConfigError("No cipher suites".to_string()));
        }
        for suite in &self.cipher_suites {
            if crypto_provider.find_cipher_suite(*suite).is_none() {
                return Err(Error::ConfigError(format!(
                    "Cipher suite not supported by provider: {:?}",
                    suite
                )));
            }
            if suite.needs_ecdhe() && crypto_provider.kx_groups.is_empty() {
                return Err(Error::ConfigError(format!(
                    "Cipher suite needs a key exchange group: {:?}",
                    suite
                )));
            }
        }
        if self.psk_identity_hint.len() > u16::MAX as usize {
            return Err(Error::ConfigError("PSK identity hint too long".to_string()));
        }
        if let Some(identity) = &self.psk_identity {
            if identity.is_empty() || identity.len() > u16::MAX as usize {
                return Err(Error::ConfigError("Invalid PSK identity length".to_string()));
            }
        }

        Ok(Config {
            mtu: self.mtu,
            max_queue_rx: self.max_queue_rx,
            max_queue_tx: self.max_queue_tx,
            max_sessions: self.max_sessions,
            max_reassembly_bytes: self.max_reassembly_bytes,
            max_handshake_len: self.max_handshake_len,
            flight_start_rto: self.flight_start_rto,
            flight_max_rto: self.flight_max_rto,
            flight_retries: self.flight_retries,
            flight_rto_jitter: self.flight_rto_jitter,
            rng_seed: self.rng_seed,
            epoch_grace_period: self.epoch_grace_period,
            max_auth_failures: self.max_auth_failures,
            cookie_lifetime: self.cookie_lifetime,
            cookie_len: self.cookie_len,
            cipher_suites: self.cipher_suites,
            psk_identity: self.psk_identity,
            psk_key: self.psk_key,
            psk_resolver: self.psk_resolver,
            psk_identity_hint: self.psk_identity_hint,
            log_level: self.log_level,
            crypto_provider,
        })
    }
}
