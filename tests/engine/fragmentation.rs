use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use tinydtls::{CipherSuite, Config, StaticPsk};

use crate::common::*;

const MTU: usize = 128;

fn long_identity() -> Vec<u8> {
    (0..200).map(|i| b'a' + (i % 26) as u8).collect()
}

fn small_mtu_pair() -> Pair {
    let identity = long_identity();
    Pair::new(
        Config::builder().mtu(MTU).with_psk(&identity, KEY),
        Config::builder()
            .mtu(MTU)
            .psk_identity_hint(&[b'h'; 300])
            .with_psk_resolver(StaticPsk::new().with_key(&identity, KEY)),
    )
}

#[test]
fn handshake_fragments_to_mtu() {
    let mut pair = small_mtu_pair();
    pair.connect();

    let mut all = Vec::new();
    for _ in 0..6 {
        let c = pair.client_turn();
        let s = pair.server_turn();
        all.extend(c.packets);
        all.extend(s.packets);
    }

    assert!(pair.client.is_connected(server_addr()));
    assert!(pair.server.is_connected(client_addr()));

    for d in &all {
        assert!(d.len() <= MTU, "datagram of {} bytes", d.len());
    }

    let fragmented: Vec<u8> = records(&all)
        .iter()
        .filter(|r| r.msg_type().is_some() && r.fragment_offset() > 0)
        .filter_map(|r| r.msg_type())
        .collect();
    assert!(fragmented.contains(&SERVER_KEY_EXCHANGE));
    assert!(fragmented.contains(&CLIENT_KEY_EXCHANGE));
}

#[test]
fn application_data_limited_by_mtu() {
    let mut pair = small_mtu_pair();
    pair.handshake();

    // 13 byte header, 8 byte nonce, 16 byte tag.
    let max = MTU - 13 - 8 - 16;
    pair.client.write(server_addr(), &vec![1; max]).unwrap();
    assert_eq!(
        pair.client.write(server_addr(), &vec![1; max + 1]),
        Err(tinydtls::Error::DataTooLarge(max + 1))
    );

    pair.client_turn();
    let s = drain(&mut pair.server);
    assert_eq!(s.app_data, vec![vec![1; max]]);
}

#[test]
fn ccm_8_leaves_room_for_more_data() {
    let identity = long_identity();
    let suites = [CipherSuite::PSK_AES128_CCM_8];
    let mut pair = Pair::new(
        Config::builder()
            .mtu(MTU)
            .cipher_suites(&suites)
            .with_psk(&identity, KEY),
        Config::builder()
            .mtu(MTU)
            .cipher_suites(&suites)
            .with_psk_resolver(StaticPsk::new().with_key(&identity, KEY)),
    );
    pair.handshake();

    // 13 byte header, 8 byte nonce, 8 byte tag.
    let max = MTU - 13 - 8 - 8;
    pair.client.write(server_addr(), &vec![2; max]).unwrap();
    assert_eq!(
        pair.client.write(server_addr(), &vec![2; max + 1]),
        Err(tinydtls::Error::DataTooLarge(max + 1))
    );

    let c = pair.client_turn();
    assert_eq!(c.packets[0].len(), MTU);
    let s = drain(&mut pair.server);
    assert_eq!(s.app_data, vec![vec![2; max]]);
}

#[test]
fn shuffled_and_repeated_fragments() {
    let mut rng = StdRng::seed_from_u64(17);

    for suite in [
        CipherSuite::ECDHE_PSK_AES128_GCM_SHA256,
        CipherSuite::PSK_AES256_GCM_SHA384,
    ] {
        let identity = long_identity();
        let mut pair = Pair::new(
            Config::builder()
                .mtu(MTU)
                .cipher_suites(&[suite])
                .with_psk(&identity, KEY),
            Config::builder()
                .mtu(MTU)
                .cipher_suites(&[suite])
                .psk_identity_hint(&[b'h'; 300])
                .with_psk_resolver(StaticPsk::new().with_key(&identity, KEY)),
        );
        pair.connect();
        pair.client_turn();
        pair.server_turn();
        pair.client_turn();

        let mut flight4 = drain(&mut pair.server).packets;
        assert!(flight4.len() > 2);
        let repeats: Vec<Vec<u8>> = flight4
            .iter()
            .filter(|_| rng.gen_bool(0.5))
            .cloned()
            .collect();
        flight4.extend(repeats);
        flight4.shuffle(&mut rng);
        pair.to_client(&flight4);

        let flight5 = drain(&mut pair.client).packets;
        assert!(handshake_types(&flight5).contains(&CLIENT_KEY_EXCHANGE));
        pair.to_server(&flight5);

        let s = pair.server_turn();
        assert_eq!(s.connected, vec![client_addr()], "{:?}", suite);
        let c = drain(&mut pair.client);
        assert_eq!(c.connected, vec![server_addr()], "{:?}", suite);
    }
}
