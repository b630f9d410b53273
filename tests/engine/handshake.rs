use std::time::Duration;

use tinydtls::{AlertDescription, CipherSuite, Error, HandshakeState};

use crate::common::*;

fn run_suite(suite: CipherSuite) {
    let mut pair = Pair::new(
        client_builder().cipher_suites(&[suite]),
        server_builder().cipher_suites(&[suite]),
    );
    pair.handshake();

    assert!(pair.client.is_connected(server_addr()));
    assert!(pair.server.is_connected(client_addr()));
    assert_eq!(pair.client.cipher_suite(server_addr()), Some(suite));
    assert_eq!(pair.server.cipher_suite(client_addr()), Some(suite));

    let km_client = pair
        .client
        .export_keying_material(server_addr(), "EXPORTER-test", 32)
        .unwrap();
    let km_server = pair
        .server
        .export_keying_material(client_addr(), "EXPORTER-test", 32)
        .unwrap();
    assert_eq!(km_client.len(), 32);
    assert_eq!(&*km_client, &*km_server);

    // Client to server, then a replay of the same datagram.
    pair.client.write(server_addr(), b"temperature=21").unwrap();
    let c = drain(&mut pair.client);
    assert_eq!(c.packets.len(), 1);
    assert_eq!(parse_records(&c.packets[0])[0].ctype, APPLICATION_DATA);
    assert_eq!(parse_records(&c.packets[0])[0].epoch, 1);

    pair.to_server(&c.packets);
    let s = drain(&mut pair.server);
    assert_eq!(s.app_data, vec![b"temperature=21".to_vec()]);

    pair.to_server(&c.packets);
    let s = drain(&mut pair.server);
    assert!(s.app_data.is_empty(), "replayed record must be dropped");
    assert!(s.closed.is_empty());

    // And back.
    pair.server.write(client_addr(), b"ack").unwrap();
    let s = pair.server_turn();
    assert_eq!(s.packets.len(), 1);
    let c = drain(&mut pair.client);
    assert_eq!(c.app_data, vec![b"ack".to_vec()]);
}

#[test]
fn handshake_ecdhe_psk_aes128() {
    run_suite(CipherSuite::ECDHE_PSK_AES128_GCM_SHA256);
}

#[test]
fn handshake_psk_aes128() {
    run_suite(CipherSuite::PSK_AES128_GCM_SHA256);
}

#[test]
fn handshake_psk_aes256() {
    run_suite(CipherSuite::PSK_AES256_GCM_SHA384);
}

#[test]
fn handshake_psk_aes128_ccm_8() {
    run_suite(CipherSuite::PSK_AES128_CCM_8);
}

#[test]
fn no_session_before_cookie() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.connect();

    let c = drain(&mut pair.client);
    assert_eq!(handshake_types(&c.packets), vec![CLIENT_HELLO]);
    let hello = parse_records(&c.packets[0]).remove(0);

    pair.to_server(&c.packets);
    assert_eq!(pair.server.session_count(), 0);
    assert_eq!(pair.server.state(client_addr()), None);

    let s = drain(&mut pair.server);
    assert_eq!(handshake_types(&s.packets), vec![HELLO_VERIFY_REQUEST]);
    let hvr = parse_records(&s.packets[0]).remove(0);
    assert_eq!(hvr.seq, hello.seq);
    assert_eq!(hvr.message_seq(), hello.message_seq());
    // Nothing to retransmit on the server side.
    assert_eq!(pair.server.session_count(), 0);

    // The same hello again gets another HelloVerifyRequest, still stateless.
    pair.to_server(&c.packets);
    let again = drain(&mut pair.server);
    assert_eq!(handshake_types(&again.packets), vec![HELLO_VERIFY_REQUEST]);
    assert_eq!(pair.server.session_count(), 0);

    pair.to_client(&s.packets);
    assert_eq!(
        pair.client.state(server_addr()),
        Some(HandshakeState::Negotiating)
    );
    let c = pair.client_turn();
    assert_eq!(handshake_types(&c.packets), vec![CLIENT_HELLO]);
    assert_eq!(parse_records(&c.packets[0])[0].message_seq(), 1);

    assert_eq!(pair.server.session_count(), 1);
    assert_eq!(
        pair.server.state(client_addr()),
        Some(HandshakeState::Negotiating)
    );
}

#[test]
fn forged_cookie_gets_fresh_verify_request() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.connect();
    pair.client_turn();
    let mut s = drain(&mut pair.server);

    // Corrupt the last cookie byte the client will echo.
    let last = s.packets[0].len() - 1;
    s.packets[0][last] ^= 0xFF;

    pair.to_client(&s.packets);
    let c = pair.client_turn();
    assert_eq!(handshake_types(&c.packets), vec![CLIENT_HELLO]);
    assert_eq!(pair.server.session_count(), 0);

    let s = drain(&mut pair.server);
    assert_eq!(handshake_types(&s.packets), vec![HELLO_VERIFY_REQUEST]);
}

#[test]
fn server_flight_contents() {
    // ECDHE_PSK always carries a ServerKeyExchange.
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    let s = drain(&mut pair.server);
    assert_eq!(
        handshake_types(&s.packets),
        vec![SERVER_HELLO, SERVER_KEY_EXCHANGE, SERVER_HELLO_DONE]
    );

    // Plain PSK without a hint has none.
    let suite = CipherSuite::PSK_AES128_GCM_SHA256;
    let mut pair = Pair::new(
        client_builder().cipher_suites(&[suite]),
        server_builder().cipher_suites(&[suite]),
    );
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    let s = drain(&mut pair.server);
    assert_eq!(
        handshake_types(&s.packets),
        vec![SERVER_HELLO, SERVER_HELLO_DONE]
    );

    // With a hint it does.
    let mut pair = Pair::new(
        client_builder().cipher_suites(&[suite]),
        server_builder()
            .cipher_suites(&[suite])
            .psk_identity_hint(b"gateway"),
    );
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    let s = pair.server_turn();
    assert_eq!(
        handshake_types(&s.packets),
        vec![SERVER_HELLO, SERVER_KEY_EXCHANGE, SERVER_HELLO_DONE]
    );

    let c = pair.client_turn();
    let recs = records(&c.packets);
    let types: Vec<u8> = recs.iter().map(|r| r.ctype).collect();
    assert_eq!(types, vec![HANDSHAKE, CHANGE_CIPHER_SPEC, HANDSHAKE]);
    assert_eq!(recs[0].msg_type(), Some(CLIENT_KEY_EXCHANGE));
    assert_eq!(recs[2].epoch, 1);
    assert_eq!(recs[2].seq, 0);
}

#[test]
fn server_preference_decides_suite() {
    let mut pair = Pair::new(
        client_builder(),
        server_builder().cipher_suites(&[
            CipherSuite::PSK_AES256_GCM_SHA384,
            CipherSuite::ECDHE_PSK_AES128_GCM_SHA256,
        ]),
    );
    pair.handshake();
    assert_eq!(
        pair.client.cipher_suite(server_addr()),
        Some(CipherSuite::PSK_AES256_GCM_SHA384)
    );
}

#[test]
fn unknown_psk_identity_is_fatal() {
    let mut pair = Pair::new(
        client_builder(),
        tinydtls::Config::builder()
            .with_psk_resolver(tinydtls::StaticPsk::new().with_key(b"another", KEY)),
    );
    pair.connect();
    for _ in 0..3 {
        pair.client_turn();
        pair.server_turn();
    }

    // The flight 5 delivery above made the server give up.
    assert_eq!(pair.server.session_count(), 0);
    let c = drain(&mut pair.client);
    assert_eq!(
        c.closed,
        vec![(
            server_addr(),
            Error::PeerAlert(AlertDescription::UnknownPskIdentity)
        )]
    );
    assert_eq!(pair.client.session_count(), 0);
}

#[test]
fn unknown_psk_identity_reported_by_server() {
    let mut pair = Pair::new(
        client_builder(),
        tinydtls::Config::builder()
            .with_psk_resolver(tinydtls::StaticPsk::new().with_key(b"another", KEY)),
    );
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();

    let s = drain(&mut pair.server);
    assert_eq!(s.closed, vec![(client_addr(), Error::UnknownPskIdentity)]);
    let recs = records(&s.packets);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].ctype, ALERT);
    assert_eq!(recs[0].payload, vec![2, 115]);
}

#[test]
fn tampered_transcript_fails_finished() {
    let suite = CipherSuite::PSK_AES128_GCM_SHA256;
    let mut pair = Pair::new(
        client_builder().cipher_suites(&[suite]),
        server_builder()
            .cipher_suites(&[suite])
            .psk_identity_hint(b"gateway"),
    );
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();

    // Change the identity hint in flight. Keys stay the same, only the
    // transcripts differ.
    let mut s = drain(&mut pair.server);
    for p in &mut s.packets {
        if let Some(pos) = p.windows(7).position(|w| w == b"gateway") {
            p[pos] = b'G';
        }
    }
    pair.to_client(&s.packets);
    pair.client_turn();

    let s = drain(&mut pair.server);
    assert_eq!(s.closed, vec![(client_addr(), Error::FinishedMismatch)]);
    let recs = records(&s.packets);
    assert_eq!(recs.last().map(|r| r.ctype), Some(ALERT));

    // The server never switched epochs, so the alert is plaintext.
    pair.to_client(&s.packets);
    let c = drain(&mut pair.client);
    assert_eq!(
        c.closed,
        vec![(server_addr(), Error::PeerAlert(AlertDescription::DecryptError))]
    );
}

#[test]
fn close_notify_tears_down_both_sides() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.handshake();

    pair.client.close(server_addr()).unwrap();
    assert_eq!(pair.client.session_count(), 0);

    let c = pair.client_turn();
    assert!(c.closed.is_empty());
    assert_eq!(records(&c.packets)[0].ctype, ALERT);

    let s = drain(&mut pair.server);
    assert_eq!(s.closed, vec![(client_addr(), Error::PeerClosed)]);
    assert_eq!(pair.server.session_count(), 0);
    // The server answers with its own close_notify.
    assert_eq!(records(&s.packets).len(), 1);
    assert_eq!(records(&s.packets)[0].ctype, ALERT);

    // Nothing left to process on the client.
    pair.to_client(&s.packets);
    let c = drain(&mut pair.client);
    assert!(c.closed.is_empty());
    assert!(c.packets.is_empty());
}

#[test]
fn idle_after_handshake() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.handshake();

    // No timers remain once both sides are connected.
    let c = drain(&mut pair.client);
    let s = drain(&mut pair.server);
    let far = pair.now + Duration::from_secs(3600);
    assert!(c.timeout.unwrap() > far);
    assert!(s.timeout.unwrap() > far);
}
