use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tinydtls::{CipherSuite, Config, Context, Error, HandshakeState, PeerId, StaticPsk};

use crate::common::*;

fn assert_resent_verbatim(first: &[Vec<u8>], again: &[Vec<u8>]) {
    let first = records(first);
    let again = records(again);
    assert_eq!(first.len(), again.len(), "record count differs");
    for (a, b) in first.iter().zip(again.iter()) {
        assert_eq!(a.epoch, b.epoch);
        assert!(b.seq > a.seq, "sequence must increase: {:?} -> {:?}", a.seq, b.seq);
        if a.epoch == 0 {
            assert_eq!(a.payload, b.payload, "plaintext must be identical");
        }
    }
}

#[test]
fn lost_server_flight_resent_on_duplicate_hello() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    let hello = pair.client_turn();

    // Flight 4 is lost.
    let lost = drain(&mut pair.server);
    assert_eq!(
        handshake_types(&lost.packets),
        vec![SERVER_HELLO, SERVER_KEY_EXCHANGE, SERVER_HELLO_DONE]
    );

    pair.now += Duration::from_secs(1);
    pair.client.handle_timeout(pair.now).unwrap();
    let again = pair.client_turn();
    assert_resent_verbatim(&hello.packets, &again.packets);
    assert_eq!(records(&again.packets)[0].message_seq(), 1);

    let resent = drain(&mut pair.server);
    assert_resent_verbatim(&lost.packets, &resent.packets);
    assert_eq!(pair.server.session_count(), 1);
    assert_eq!(
        pair.server.state(client_addr()),
        Some(HandshakeState::Negotiating)
    );

    pair.to_client(&resent.packets);
    pair.client_turn();
    let s = pair.server_turn();
    assert_eq!(s.connected, vec![client_addr()]);
    let c = drain(&mut pair.client);
    assert_eq!(c.connected, vec![server_addr()]);
}

#[test]
fn server_timer_resends_flight() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    let lost = drain(&mut pair.server);
    assert_eq!(lost.timeout, Some(pair.now + Duration::from_secs(1)));

    pair.now += Duration::from_secs(1);
    pair.server.handle_timeout(pair.now).unwrap();
    let resent = drain(&mut pair.server);
    assert_resent_verbatim(&lost.packets, &resent.packets);
    assert_eq!(resent.timeout, Some(pair.now + Duration::from_secs(2)));
}

#[test]
fn lost_final_flight() {
    let mut pair = Pair::new(client_builder(), server_builder());
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    pair.server_turn();
    let flight5 = pair.client_turn();

    // The server is done, but flight 6 never arrives.
    let lost = drain(&mut pair.server);
    assert_eq!(lost.connected, vec![client_addr()]);
    let types: Vec<u8> = records(&lost.packets).iter().map(|r| r.ctype).collect();
    assert_eq!(types, vec![CHANGE_CIPHER_SPEC, HANDSHAKE]);
    assert!(!pair.client.is_connected(server_addr()));
    assert_eq!(
        pair.client.state(server_addr()),
        Some(HandshakeState::WaitFinished)
    );

    pair.now += Duration::from_secs(1);
    pair.client.handle_timeout(pair.now).unwrap();
    let again = pair.client_turn();
    assert_resent_verbatim(&flight5.packets, &again.packets);

    let resent = drain(&mut pair.server);
    assert!(resent.connected.is_empty());
    assert!(resent.closed.is_empty());
    assert_resent_verbatim(&lost.packets, &resent.packets);

    pair.to_client(&resent.packets);
    let c = drain(&mut pair.client);
    assert_eq!(c.connected, vec![server_addr()]);
}

#[test]
fn full_queue_mid_flight_is_recovered() {
    let identity = vec![b'i'; 300];
    let suites = [CipherSuite::PSK_AES128_GCM_SHA256];
    let mut pair = Pair::new(
        Config::builder()
            .mtu(200)
            .max_queue_tx(4)
            .cipher_suites(&suites)
            .with_psk(&identity, KEY),
        Config::builder()
            .mtu(200)
            .cipher_suites(&suites)
            .with_psk_resolver(StaticPsk::new().with_key(&identity, KEY)),
    );
    pair.connect();
    pair.client_turn();
    pair.server_turn();
    pair.client_turn();
    let flight4 = drain(&mut pair.server);
    assert_eq!(flight4.packets.len(), 1);

    // Two other handshakes keep datagrams queued at the client, leaving
    // room for only part of flight 5.
    let other = |n| PeerId::from(SocketAddr::from(([203, 0, 113, n], 5684)));
    pair.client.connect(other(1), pair.now).unwrap();
    pair.client.connect(other(2), pair.now).unwrap();
    assert_eq!(
        pair.client
            .handle_datagram(server_addr(), &flight4.packets[0], pair.now),
        Err(Error::TransmitQueueFull)
    );
    assert_eq!(
        pair.client.state(server_addr()),
        Some(HandshakeState::WaitFinished)
    );

    let partial: Vec<Vec<u8>> = drain(&mut pair.client)
        .sent
        .into_iter()
        .filter(|(to, _)| *to == server_addr())
        .map(|(_, p)| p)
        .collect();
    assert_eq!(partial.len(), 2);
    pair.to_server(&partial);
    assert!(!pair.server.is_connected(client_addr()));

    // The server repeats flight 4 and gets all of flight 5 back.
    pair.now += Duration::from_secs(1);
    pair.server.handle_timeout(pair.now).unwrap();
    pair.server_turn();
    let again = pair.client_turn();
    assert_eq!(again.packets.len(), 3);
    assert!(pair.server.is_connected(client_addr()));

    pair.server_turn();
    assert!(pair.client.is_connected(server_addr()));
}

#[test]
fn timeouts_double_then_close() {
    init_log();
    let now = Instant::now();
    let config = client_builder().flight_retries(3).build().unwrap();
    let mut client = Context::new(Arc::new(config), now);
    client.connect(server_addr(), now).unwrap();

    let first = drain(&mut client);
    assert_eq!(handshake_types(&first.packets), vec![CLIENT_HELLO]);
    let mut last_seq = records(&first.packets)[0].seq;
    let mut deadline = first.timeout.unwrap();

    let mut waits = Vec::new();
    let mut at = now;
    for _ in 0..3 {
        waits.push(deadline - at);
        at = deadline;
        client.handle_timeout(at).unwrap();
        let out = drain(&mut client);
        let recs = records(&out.packets);
        let rec = &recs[0];
        assert_eq!(rec.msg_type(), Some(CLIENT_HELLO));
        assert_eq!(rec.message_seq(), 0);
        assert!(rec.seq > last_seq);
        last_seq = rec.seq;
        deadline = out.timeout.unwrap();
    }
    waits.push(deadline - at);

    let secs: Vec<u64> = waits.iter().map(|d| d.as_secs()).collect();
    assert_eq!(secs, vec![1, 2, 4, 8]);

    // Just before the deadline nothing happens.
    client
        .handle_timeout(deadline - Duration::from_millis(1))
        .unwrap();
    assert!(drain(&mut client).packets.is_empty());

    client.handle_timeout(deadline).unwrap();
    let out = drain(&mut client);
    assert!(out.packets.is_empty());
    assert_eq!(
        out.closed,
        vec![(server_addr(), Error::Timeout("handshake"))]
    );
    assert_eq!(client.session_count(), 0);
}

#[test]
fn timeout_capped_at_max() {
    init_log();
    let now = Instant::now();
    let config = client_builder()
        .flight_retries(4)
        .flight_max_rto(Duration::from_secs(3))
        .build()
        .unwrap();
    let mut client = Context::new(Arc::new(config), now);
    client.connect(server_addr(), now).unwrap();

    let mut at = now;
    let mut deadline = drain(&mut client).timeout.unwrap();
    let mut secs = Vec::new();
    for _ in 0..4 {
        secs.push((deadline - at).as_secs());
        at = deadline;
        client.handle_timeout(at).unwrap();
        deadline = drain(&mut client).timeout.unwrap();
    }
    secs.push((deadline - at).as_secs());
    assert_eq!(secs, vec![1, 2, 3, 3, 3]);
}

#[test]
fn seeded_jitter_is_reproducible() {
    let now = Instant::now();
    let build = || {
        let config = client_builder()
            .flight_rto_jitter(Duration::from_millis(200))
            .rng_seed(7)
            .build()
            .unwrap();
        let mut ctx = Context::new(Arc::new(config), now);
        ctx.connect(server_addr(), now).unwrap();
        ctx
    };

    let mut a = build();
    let mut b = build();
    let ta = drain(&mut a).timeout.unwrap();
    let tb = drain(&mut b).timeout.unwrap();
    assert_eq!(ta, tb);

    let off = ta - now;
    assert!(off >= Duration::from_millis(800) && off <= Duration::from_millis(1200));
}
