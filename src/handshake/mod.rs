//! The handshake state machine.
//!
//! Both roles run on [`Session`]: `client` covers flights 1, 3 and 5,
//! `server` covers flights 4 and 6. Flight 2 is answered statelessly by the
//! [`Context`](crate::Context) before any session exists.

use std::sync::Arc;

use crate::buffer::Buf;
use crate::crypto::{psk_premaster_secret, KeyingMaterial, MasterSecret, VERIFY_DATA_LEN};
use crate::fragment::CompleteMessage;
use crate::message::{Alert, AlertDescription, CipherSuite, ClientHello, MessageType, Random};
use crate::record_layer::EpochKeys;
use crate::session::{Outbox, Session};
use crate::types::NamedGroup;
use crate::{Config, Error};

mod client;
mod server;

/// Where a session is in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Client session created, nothing sent yet.
    Init,
    /// A server answering a ClientHello before it carries a valid cookie.
    WaitClientHello,
    /// Client waiting for the server to verify its cookie.
    WaitClientHelloVerified,
    /// Hellos and key exchange in progress.
    Negotiating,
    /// Keys derived, waiting for the peer's Finished.
    WaitFinished,
    Connected,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    Client,
    Server,
}

/// The next message a session expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    SendClientHello,
    AwaitHelloVerify,
    AwaitServerHello,
    /// ServerKeyExchange is mandatory for ECDHE_PSK, optional for PSK.
    AwaitServerKeyExchange {
        required: bool,
    },
    AwaitServerHelloDone,
    AwaitServerFinished,
    AwaitClientHello,
    AwaitClientKeyExchange,
    AwaitClientFinished,
    Done,
}

const CLIENT_FINISHED: &str = "client finished";
const SERVER_FINISHED: &str = "server finished";

/// First suite in our preference order that the client offers and we can run.
pub(crate) fn select_suite(config: &Config, hello: &ClientHello) -> Option<CipherSuite> {
    let provider = config.crypto_provider();
    config.cipher_suites().iter().copied().find(|suite| {
        if !hello.cipher_suites.contains(suite) || provider.find_cipher_suite(*suite).is_none() {
            return false;
        }
        !suite.needs_ecdhe()
            || (provider.find_kx_group(NamedGroup::X25519).is_some()
                && hello.supports_group(NamedGroup::X25519))
    })
}

impl Session {
    /// Derive the master secret and install the next epoch's keys.
    ///
    /// `shared` is the ECDHE shared secret, `None` for plain PSK.
    pub(crate) fn derive_keys(&mut self, psk: &[u8], shared: Option<&[u8]>) -> Result<(), Error> {
        let config = Arc::clone(&self.config);
        let provider = config.crypto_provider();

        let suite = self.negotiated_suite()?;
        let supported = provider
            .find_cipher_suite(suite)
            .ok_or_else(|| Error::HandshakeFailure(format!("{:?} not supported", suite)))?;
        let (client_random, server_random) = self.randoms()?;

        let premaster = psk_premaster_secret(psk, shared);
        let master = MasterSecret::derive(
            provider,
            suite.hash_algorithm(),
            &premaster,
            &client_random.0,
            &server_random.0,
        )
        .map_err(Error::CryptoError)?;

        let block = master
            .key_block(provider, supported, &client_random.0, &server_random.0)
            .map_err(Error::CryptoError)?;

        let client = supported
            .create_cipher(&block.client_key)
            .map_err(Error::CryptoError)?;
        let server = supported
            .create_cipher(&block.server_key)
            .map_err(Error::CryptoError)?;
        let client = EpochKeys::new(client, block.client_iv, suite.tag_len());
        let server = EpochKeys::new(server, block.server_iv, suite.tag_len());

        match self.role {
            Role::Client => self.records.install_pending(server, client),
            Role::Server => self.records.install_pending(client, server),
        }
        self.master_secret = Some(master);

        diag!(self.diag, Debug, "{}: keys derived for {:?}", self.peer, suite);
        Ok(())
    }

    fn negotiated_suite(&self) -> Result<CipherSuite, Error> {
        self.cipher_suite
            .ok_or_else(|| Error::HandshakeFailure("No cipher suite negotiated".to_string()))
    }

    fn randoms(&self) -> Result<(Random, Random), Error> {
        match (self.client_random, self.server_random) {
            (Some(c), Some(s)) => Ok((c, s)),
            _ => Err(Error::HandshakeFailure("Hello randoms missing".to_string())),
        }
    }

    /// Our verify_data over the transcript so far.
    fn verify_data(&self, role: Role) -> Result<[u8; VERIFY_DATA_LEN], Error> {
        let provider = self.config.crypto_provider();
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(|| Error::HandshakeFailure("Finished before key exchange".to_string()))?;

        let mut hash = provider
            .hash_provider
            .create_hash(self.negotiated_suite()?.hash_algorithm())
            .map_err(Error::CryptoError)?;
        hash.update(&self.transcript);
        let mut digest = Buf::new();
        hash.clone_and_finalize(&mut digest);

        let label = match role {
            Role::Client => CLIENT_FINISHED,
            Role::Server => SERVER_FINISHED,
        };
        master
            .verify_data(provider, label, &digest)
            .map_err(Error::CryptoError)
    }

    /// RFC 5705 exporter without context value.
    pub(crate) fn export_keying_material(
        &self,
        label: &str,
        len: usize,
    ) -> Result<KeyingMaterial, Error> {
        let Some(master) = self.master_secret.as_ref().filter(|_| self.is_connected()) else {
            return Err(Error::NotConnected);
        };
        let (client_random, server_random) = self.randoms()?;
        master
            .export(
                self.config.crypto_provider(),
                label,
                &client_random.0,
                &server_random.0,
                len,
            )
            .map_err(Error::CryptoError)
    }

    /// A new handshake message after Connected. The hello that would start a
    /// renegotiation is refused with a warning, anything else is fatal.
    fn after_handshake(
        &mut self,
        message: &CompleteMessage,
        renegotiation: MessageType,
        out: &mut Outbox,
    ) -> Result<(), Error> {
        if message.msg_type != renegotiation {
            return Err(Error::UnexpectedMessage(format!(
                "{:?} after handshake",
                message.msg_type
            )));
        }
        diag!(self.diag, Info, "{}: refusing renegotiation", self.peer);
        self.send_alert(Alert::warning(AlertDescription::NoRenegotiation), out)
    }
}
