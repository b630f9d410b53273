use std::sync::Arc;
use std::time::Duration;

use tinydtls::{AlertDescription, AlertLevel, Config, Context, Error, HandshakeState, PeerId};

use crate::common::*;

/// An epoch 1 application data record that will not authenticate.
fn forged_record(seq: u64) -> Vec<u8> {
    let mut d = vec![APPLICATION_DATA, 0xfe, 0xfd, 0, 1];
    d.extend_from_slice(&seq.to_be_bytes()[2..]);
    d.extend_from_slice(&40u16.to_be_bytes());
    d.extend_from_slice(&[0xab; 40]);
    d
}

/// An epoch 0 handshake record holding one empty message.
fn plaintext_handshake(seq: u64, msg_type: u8, message_seq: u16) -> Vec<u8> {
    let mut d = vec![HANDSHAKE, 0xfe, 0xfd, 0, 0];
    d.extend_from_slice(&seq.to_be_bytes()[2..]);
    d.extend_from_slice(&12u16.to_be_bytes());
    d.extend_from_slice(&[msg_type, 0, 0, 0]);
    d.extend_from_slice(&message_seq.to_be_bytes());
    d.extend_from_slice(&[0; 6]);
    d
}

/// An epoch 0 fatal handshake_failure alert.
fn plaintext_fatal_alert(seq: u64) -> Vec<u8> {
    let mut d = vec![ALERT, 0xfe, 0xfd, 0, 0];
    d.extend_from_slice(&seq.to_be_bytes()[2..]);
    d.extend_from_slice(&[0, 2, 2, 40]);
    d
}

fn peer(n: u8) -> PeerId {
    PeerId::from(std::net::SocketAddr::from(([198, 51, 100, n], 40000)))
}

fn context(builder: tinydtls::ConfigBuilder, now: std::time::Instant) -> Context {
    Context::new(Arc::new(builder.build().unwrap()), now)
}

#[test]
fn forged_records_are_dropped_until_limit() {
    let mut pair = Pair::new(client_builder(), server_builder().max_auth_failures(3));
    pair.handshake();

    for seq in 100..103 {
        pair.to_server(&[forged_record(seq)]);
        let s = drain(&mut pair.server);
        assert!(s.closed.is_empty());
        assert!(s.packets.is_empty());
    }
    assert!(pair.server.is_connected(client_addr()));

    // Authentic traffic still flows.
    pair.client.write(server_addr(), b"still here").unwrap();
    pair.client_turn();
    assert_eq!(drain(&mut pair.server).app_data, vec![b"still here".to_vec()]);

    pair.to_server(&[forged_record(103)]);
    let s = drain(&mut pair.server);
    assert_eq!(s.closed, vec![(client_addr(), Error::TooManyAuthFailures)]);
    assert!(s.packets.is_empty());
    assert_eq!(pair.server.session_count(), 0);
}

#[test]
fn junk_is_ignored() {
    let mut pair = Pair::new(client_builder(), server_builder());

    pair.to_server(&[vec![], vec![0xff; 3], vec![22, 0xfe, 0xfd, 0, 0, 0, 0]]);
    let s = drain(&mut pair.server);
    assert!(s.packets.is_empty());
    assert_eq!(pair.server.session_count(), 0);

    pair.handshake();
    pair.to_server(&[vec![0x42; 64], forged_record(7)[..20].to_vec()]);
    pair.to_client(&[vec![0x42; 64]]);
    assert!(drain(&mut pair.server).closed.is_empty());
    assert!(drain(&mut pair.client).closed.is_empty());
    assert!(pair.server.is_connected(client_addr()));
    assert!(pair.client.is_connected(server_addr()));
}

#[test]
fn write_checks() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.connect();
    assert_eq!(
        pair.client.write(server_addr(), b"too early"),
        Err(Error::NotConnected)
    );

    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    pair.server_turn();
    assert!(pair.client.is_connected(server_addr()));

    assert_eq!(
        pair.client.write(server_addr(), &[0; 2000]),
        Err(Error::DataTooLarge(2000))
    );
    assert_eq!(
        pair.server.write(peer(9), b"nobody"),
        Err(Error::UnknownPeer)
    );
}

#[test]
fn not_serving_without_keys() {
    let mut pair = Pair::new(client_builder(), Config::builder());
    pair.connect();
    pair.client_turn();
    let s = drain(&mut pair.server);
    assert!(s.packets.is_empty());
    assert_eq!(pair.server.session_count(), 0);
}

#[test]
fn warning_alert_is_reported() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.connect();
    drain(&mut pair.client);

    let mut alert = vec![ALERT, 0xfe, 0xfd, 0, 0, 0, 0, 0, 0, 0, 5, 0, 2];
    alert.extend_from_slice(&[1, 100]);
    pair.to_client(&[alert]);

    let c = drain(&mut pair.client);
    assert_eq!(
        c.alerts,
        vec![(AlertLevel::Warning, AlertDescription::NoRenegotiation)]
    );
    assert!(c.closed.is_empty());
    assert_eq!(
        pair.client.state(server_addr()),
        Some(HandshakeState::WaitClientHelloVerified)
    );
}

#[test]
fn old_epoch_only_triggers_retransmission() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    assert!(pair.server.is_connected(client_addr()));

    // Server flight 6 is lost. Plaintext injected at the server now is ignored.
    drain(&mut pair.server);
    pair.to_server(&[
        plaintext_fatal_alert(1000),
        plaintext_handshake(1001, SERVER_HELLO_DONE, 4),
    ]);
    let s = drain(&mut pair.server);
    assert!(s.closed.is_empty(), "server closed: {:?}", s.closed);
    assert!(s.packets.is_empty());
    assert!(pair.server.is_connected(client_addr()));

    // The client's retransmission still reaches the server through epoch 0.
    pair.advance(Duration::from_secs(1));
    pair.client_turn();
    let s = pair.server_turn();
    assert!(!s.packets.is_empty());
    assert!(pair.client.is_connected(server_addr()));

    pair.to_client(&[
        plaintext_fatal_alert(1000),
        plaintext_handshake(1001, SERVER_HELLO_DONE, 4),
    ]);
    let c = drain(&mut pair.client);
    assert!(c.closed.is_empty(), "client closed: {:?}", c.closed);
    assert!(c.alerts.is_empty());
    assert!(pair.client.is_connected(server_addr()));

    pair.client.write(server_addr(), b"after").unwrap();
    pair.client_turn();
    assert_eq!(drain(&mut pair.server).app_data, vec![b"after".to_vec()]);
}

#[test]
fn full_table_evicts_established_session() {
    init_log();
    let now = std::time::Instant::now();
    let mut server = context(server_builder().max_sessions(1), now);
    let mut a = context(client_builder(), now);
    let mut b = context(client_builder(), now);

    let s = handshake_between(&mut a, peer(1), &mut server, server_addr(), now);
    assert_eq!(s.connected, vec![peer(1)]);

    let s = handshake_between(&mut b, peer(2), &mut server, server_addr(), now);
    assert_eq!(s.closed, vec![(peer(1), Error::Evicted)]);
    assert_eq!(s.connected, vec![peer(2)]);
    assert_eq!(server.session_count(), 1);
    assert!(!server.is_connected(peer(1)));
}

#[test]
fn eviction_prefers_unfinished_handshakes() {
    init_log();
    let now = std::time::Instant::now();
    let mut server = context(server_builder().max_sessions(2), now);
    let mut a = context(client_builder(), now);
    let mut b = context(client_builder(), now);
    let mut c = context(client_builder(), now);

    handshake_between(&mut a, peer(1), &mut server, server_addr(), now);

    // B gets as far as the server's flight and goes quiet.
    b.connect(server_addr(), now).unwrap();
    for p in drain(&mut b).packets {
        server.handle_datagram(peer(2), &p, now).unwrap();
    }
    for (_, p) in drain(&mut server).sent {
        b.handle_datagram(server_addr(), &p, now).unwrap();
    }
    for p in drain(&mut b).packets {
        server.handle_datagram(peer(2), &p, now).unwrap();
    }
    assert_eq!(server.state(peer(2)), Some(HandshakeState::Negotiating));

    let s = handshake_between(&mut c, peer(3), &mut server, server_addr(), now);
    assert_eq!(s.closed, vec![(peer(2), Error::Evicted)]);
    assert!(server.is_connected(peer(1)));
    assert!(server.is_connected(peer(3)));
    assert_eq!(server.session_count(), 2);

    // Nothing of B's dropped flight is left to retransmit.
    server.handle_timeout(now + Duration::from_secs(2)).unwrap();
    let s = drain(&mut server);
    assert!(s.sent.iter().all(|(to, _)| *to != peer(2)));
}

#[test]
fn restarted_client_replaces_session() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.handshake();

    let mut fresh = context(client_builder(), pair.now);
    fresh.connect(server_addr(), pair.now).unwrap();

    // The first hello is answered statelessly, the old session lives on.
    let hello = drain(&mut fresh).packets;
    pair.to_server(&hello);
    let s = drain(&mut pair.server);
    assert_eq!(handshake_types(&s.packets), vec![HELLO_VERIFY_REQUEST]);
    assert!(s.closed.is_empty());
    assert!(pair.server.is_connected(client_addr()));

    for p in &s.packets {
        fresh.handle_datagram(server_addr(), p, pair.now).unwrap();
    }
    let hello = drain(&mut fresh).packets;
    pair.to_server(&hello);
    let s = drain(&mut pair.server);
    assert_eq!(s.closed, vec![(client_addr(), Error::PeerClosed)]);
    assert_eq!(
        pair.server.state(client_addr()),
        Some(HandshakeState::Negotiating)
    );

    pair.client = fresh;
    pair.to_client(&s.packets);
    for _ in 0..3 {
        pair.client_turn();
        pair.server_turn();
    }
    assert!(pair.client.is_connected(server_addr()));
    assert!(pair.server.is_connected(client_addr()));
}

#[test]
fn opaque_peer_ids() {
    init_log();
    let now = std::time::Instant::now();
    let mut server = context(server_builder(), now);
    let mut client = context(client_builder(), now);
    let node = PeerId::opaque(b"node-7").unwrap();
    let gateway = PeerId::opaque(b"gateway").unwrap();

    handshake_between(&mut client, node, &mut server, gateway, now);
    assert!(server.is_connected(node));
    assert!(client.is_connected(gateway));
}
