use std::sync::Arc;

use zeroize::Zeroizing;

use super::{HandshakeState, Role, Step};
use crate::buffer::Buf;
use crate::fragment::CompleteMessage;
use crate::message::{Body, ClientHello, ClientKeyExchange, Finished, HelloVerifyRequest};
use crate::message::{MessageType, ProtocolVersion, Random, ServerHello, ServerKeyExchange};
use crate::session::{Outbox, Session};
use crate::types::NamedGroup;
use crate::util::constant_time_eq;
use crate::Error;

impl Session {
    /// Send flight 1.
    pub(crate) fn start_client(&mut self, out: &mut Outbox) -> Result<(), Error> {
        let random = Random::new(self.config.crypto_provider().secure_random)
            .map_err(Error::CryptoError)?;
        self.client_random = Some(random);

        self.send_client_hello(1, out)?;
        self.state = HandshakeState::WaitClientHelloVerified;
        self.step = Step::AwaitHelloVerify;
        self.send_flight(out)
    }

    fn send_client_hello(&mut self, flight: u8, out: &mut Outbox) -> Result<(), Error> {
        let random = self
            .client_random
            .ok_or_else(|| Error::HandshakeFailure("Client random missing".to_string()))?;

        self.begin_flight(flight);
        out.timers.arm(self.peer, out.now);

        let hello = ClientHello::new(random, self.cookie, self.config.cipher_suites());
        self.send_message(&Body::ClientHello(hello))
    }

    pub(crate) fn client_message(
        &mut self,
        message: CompleteMessage,
        out: &mut Outbox,
    ) -> Result<(), Error> {
        if self.is_connected() {
            return self.after_handshake(&message, MessageType::HelloRequest, out);
        }

        let body = self.parse_body(&message)?;

        match (self.step, body) {
            (Step::AwaitHelloVerify, Body::HelloVerifyRequest(hvr)) => {
                self.on_hello_verify(hvr, out)
            }
            (Step::AwaitHelloVerify | Step::AwaitServerHello, Body::ServerHello(hello)) => {
                self.record_message(&message);
                self.on_server_hello(hello)
            }
            (Step::AwaitServerKeyExchange { .. }, Body::ServerKeyExchange(ske)) => {
                self.record_message(&message);
                self.on_server_key_exchange(ske)
            }
            (
                Step::AwaitServerKeyExchange { required: false } | Step::AwaitServerHelloDone,
                Body::ServerHelloDone,
            ) => {
                self.record_message(&message);
                self.on_server_hello_done(out)
            }
            (Step::AwaitServerFinished, Body::Finished(finished)) => {
                self.on_server_finished(&message, finished, out)
            }
            // A HelloRequest during the handshake is ignored.
            (_, Body::HelloRequest) => Ok(()),
            (step, body) => Err(Error::UnexpectedMessage(format!(
                "{:?} while in {:?}",
                body.msg_type(),
                step
            ))),
        }
    }

    fn on_hello_verify(&mut self, hvr: HelloVerifyRequest, out: &mut Outbox) -> Result<(), Error> {
        if hvr.cookie.is_empty() {
            return Err(Error::ProtocolViolation("Empty cookie".to_string()));
        }
        diag!(
            self.diag,
            Debug,
            "{}: cookie of {} bytes, sending second ClientHello",
            self.peer,
            hvr.cookie.len()
        );

        // Neither the first ClientHello nor the HelloVerifyRequest are
        // part of the transcript.
        self.transcript.clear();
        self.cookie = hvr.cookie;

        self.send_client_hello(3, out)?;
        self.state = HandshakeState::Negotiating;
        self.step = Step::AwaitServerHello;
        self.send_flight(out)
    }

    fn on_server_hello(&mut self, hello: ServerHello) -> Result<(), Error> {
        if hello.server_version != ProtocolVersion::DTLS1_2 {
            return Err(Error::UnsupportedVersion(hello.server_version.as_u16()));
        }
        let suite = hello.cipher_suite;
        if !self.config.cipher_suites().contains(&suite) {
            return Err(Error::HandshakeFailure(format!(
                "Server selected {:?} which we did not offer",
                suite
            )));
        }
        if hello.compression_method != 0 {
            return Err(Error::ProtocolViolation(format!(
                "Compression method {}",
                hello.compression_method
            )));
        }

        diag!(self.diag, Debug, "{}: server selected {:?}", self.peer, suite);
        self.cipher_suite = Some(suite);
        self.server_random = Some(hello.random);
        self.state = HandshakeState::Negotiating;
        self.step = Step::AwaitServerKeyExchange {
            required: suite.needs_ecdhe(),
        };
        Ok(())
    }

    fn on_server_key_exchange(&mut self, ske: ServerKeyExchange) -> Result<(), Error> {
        match ske.ecdh {
            Some(ecdh) if ecdh.group == NamedGroup::X25519 => {
                self.server_public = Some(ecdh.public_key);
            }
            Some(ecdh) => {
                return Err(Error::HandshakeFailure(format!(
                    "Unsupported group {:?}",
                    ecdh.group
                )));
            }
            None if self.cipher_suite.is_some_and(|s| s.needs_ecdhe()) => {
                return Err(Error::HandshakeFailure("Missing ECDH parameters".to_string()));
            }
            None => {}
        }

        if !ske.identity_hint.is_empty() {
            diag!(
                self.diag,
                Debug,
                "{}: identity hint of {} bytes",
                self.peer,
                ske.identity_hint.len()
            );
        }
        self.identity_hint = ske.identity_hint;
        self.step = Step::AwaitServerHelloDone;
        Ok(())
    }

    /// Send flight 5.
    fn on_server_hello_done(&mut self, out: &mut Outbox) -> Result<(), Error> {
        let config = Arc::clone(&self.config);
        let (Some(identity), Some(psk)) = (config.psk_identity(), config.psk_key()) else {
            return Err(Error::ConfigError("No PSK to connect with".to_string()));
        };

        let mut public_key = None;
        let mut shared = None;
        if let Some(server_public) = self.server_public.take() {
            let group = config
                .crypto_provider()
                .find_kx_group(NamedGroup::X25519)
                .ok_or_else(|| Error::HandshakeFailure("X25519 not available".to_string()))?;
            let exchange = group.start_exchange(Buf::new()).map_err(Error::CryptoError)?;
            public_key = Some(exchange.pub_key().to_vec());

            let mut secret = Zeroizing::new(Buf::new());
            exchange
                .complete(&server_public, &mut secret)
                .map_err(Error::CryptoError)?;
            shared = Some(secret);
        }

        self.begin_flight(5);
        out.timers.arm(self.peer, out.now);

        let cke = ClientKeyExchange {
            identity: identity.to_vec(),
            public_key,
        };
        self.send_message(&Body::ClientKeyExchange(cke))?;

        self.derive_keys(psk, shared.as_deref().map(|s| &s[..]))?;
        self.send_change_cipher_spec()?;

        let verify_data = self.verify_data(Role::Client)?;
        self.send_message(&Body::Finished(Finished::new(verify_data)))?;

        self.state = HandshakeState::WaitFinished;
        self.step = Step::AwaitServerFinished;
        self.send_flight(out)
    }

    fn on_server_finished(
        &mut self,
        message: &CompleteMessage,
        finished: Finished,
        out: &mut Outbox,
    ) -> Result<(), Error> {
        let expected = self.verify_data(Role::Server)?;
        if !constant_time_eq(&expected, &finished.verify_data) {
            return Err(Error::FinishedMismatch);
        }
        self.record_message(message);
        self.complete(out);
        Ok(())
    }
}
