use std::sync::Arc;

use zeroize::Zeroizing;

use super::{select_suite, HandshakeState, Role, Step};
use crate::buffer::Buf;
use crate::fragment::CompleteMessage;
use crate::message::{Body, ClientHello, ClientKeyExchange, EcdhParams, Finished, MessageType};
use crate::message::{ProtocolVersion, Random, ServerHello, ServerKeyExchange, SessionId};
use crate::session::{Outbox, Session};
use crate::types::{NamedGroup, Sequence};
use crate::util::constant_time_eq;
use crate::Error;

impl Session {
    /// Take over a cookie-verified ClientHello and send flight 4.
    ///
    /// `sequence` is the record that carried the hello. Our epoch 0 record
    /// numbers continue from it, as the HelloVerifyRequest did.
    pub(crate) fn start_server(
        &mut self,
        sequence: Sequence,
        message: &CompleteMessage,
        hello: ClientHello,
        out: &mut Outbox,
    ) -> Result<(), Error> {
        self.start_after(message.message_seq);
        self.records.set_write_sequence(sequence.sequence_number);
        self.records.mark_received(sequence);
        self.state = HandshakeState::Negotiating;

        if hello.client_version != ProtocolVersion::DTLS1_2 {
            return Err(Error::UnsupportedVersion(hello.client_version.as_u16()));
        }
        if !hello.offers_null_compression() {
            return Err(Error::HandshakeFailure("Null compression not offered".to_string()));
        }
        let suite = select_suite(&self.config, &hello)
            .ok_or_else(|| Error::HandshakeFailure("No shared cipher suite".to_string()))?;
        diag!(self.diag, Debug, "{}: selected {:?}", self.peer, suite);

        self.cipher_suite = Some(suite);
        self.client_random = Some(hello.random);
        self.cookie = hello.cookie;
        self.record_message(message);

        let config = Arc::clone(&self.config);
        let random =
            Random::new(config.crypto_provider().secure_random).map_err(Error::CryptoError)?;
        self.server_random = Some(random);

        self.begin_flight(4);
        out.timers.arm(self.peer, out.now);

        let server_hello = ServerHello::new(random, SessionId::empty(), suite);
        self.send_message(&Body::ServerHello(server_hello))?;

        let hint = config.psk_identity_hint();
        if suite.needs_ecdhe() {
            let group = config
                .crypto_provider()
                .find_kx_group(NamedGroup::X25519)
                .ok_or_else(|| Error::HandshakeFailure("X25519 not available".to_string()))?;
            let exchange = group.start_exchange(Buf::new()).map_err(Error::CryptoError)?;
            let ske = ServerKeyExchange {
                identity_hint: hint.to_vec(),
                ecdh: Some(EcdhParams {
                    group: NamedGroup::X25519,
                    public_key: exchange.pub_key().to_vec(),
                }),
            };
            self.key_exchange = Some(exchange);
            self.send_message(&Body::ServerKeyExchange(ske))?;
        } else if !hint.is_empty() {
            let ske = ServerKeyExchange {
                identity_hint: hint.to_vec(),
                ecdh: None,
            };
            self.send_message(&Body::ServerKeyExchange(ske))?;
        }

        self.send_message(&Body::ServerHelloDone)?;
        self.step = Step::AwaitClientKeyExchange;
        self.send_flight(out)
    }

    pub(crate) fn server_message(
        &mut self,
        message: CompleteMessage,
        out: &mut Outbox,
    ) -> Result<(), Error> {
        if self.is_connected() {
            return self.after_handshake(&message, MessageType::ClientHello, out);
        }

        let body = self.parse_body(&message)?;

        match (self.step, body) {
            (Step::AwaitClientKeyExchange, Body::ClientKeyExchange(cke)) => {
                self.record_message(&message);
                self.on_client_key_exchange(cke)
            }
            (Step::AwaitClientFinished, Body::Finished(finished)) => {
                self.on_client_finished(&message, finished, out)
            }
            (step, body) => Err(Error::UnexpectedMessage(format!(
                "{:?} while in {:?}",
                body.msg_type(),
                step
            ))),
        }
    }

    fn on_client_key_exchange(&mut self, cke: ClientKeyExchange) -> Result<(), Error> {
        let config = Arc::clone(&self.config);
        let Some(psk) = config.resolve_psk(&cke.identity) else {
            diag!(self.diag, Info, "{}: unknown PSK identity", self.peer);
            return Err(Error::UnknownPskIdentity);
        };

        let shared = match (self.key_exchange.take(), cke.public_key) {
            (Some(exchange), Some(client_public)) => {
                let mut secret = Zeroizing::new(Buf::new());
                exchange
                    .complete(&client_public, &mut secret)
                    .map_err(Error::CryptoError)?;
                Some(secret)
            }
            (None, None) => None,
            _ => {
                return Err(Error::ProtocolViolation(
                    "Key exchange does not match the cipher suite".to_string(),
                ))
            }
        };

        self.derive_keys(&psk, shared.as_deref().map(|s| &s[..]))?;
        self.state = HandshakeState::WaitFinished;
        self.step = Step::AwaitClientFinished;
        Ok(())
    }

    /// Verify the client's Finished and send flight 6.
    fn on_client_finished(
        &mut self,
        message: &CompleteMessage,
        finished: Finished,
        out: &mut Outbox,
    ) -> Result<(), Error> {
        let expected = self.verify_data(Role::Client)?;
        if !constant_time_eq(&expected, &finished.verify_data) {
            return Err(Error::FinishedMismatch);
        }
        self.record_message(message);

        // The last flight is not timed. A retransmitted flight 5 makes us
        // send it again.
        self.begin_flight(6);
        self.send_change_cipher_spec()?;
        let verify_data = self.verify_data(Role::Server)?;
        self.send_message(&Body::Finished(Finished::new(verify_data)))?;

        self.complete(out);
        self.send_flight(out)
    }
}
