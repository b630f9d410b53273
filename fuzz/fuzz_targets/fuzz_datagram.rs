#![no_main]

//! Feeds arbitrary datagrams to a serving context and to a client that
//! has just sent its ClientHello.

use libfuzzer_sys::fuzz_target;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tinydtls::{Config, Context, Output, PeerId, StaticPsk};

fuzz_target!(|data: &[u8]| {
    let peer = PeerId::from(SocketAddr::from(([192, 0, 2, 1], 5684)));
    let now = Instant::now();
    let mut buf = vec![0u8; 2048];

    let Ok(server) = Config::builder()
        .with_psk_resolver(StaticPsk::new().with_key(b"fuzz", b"0123456789abcdef"))
        .build()
    else {
        return;
    };
    {
        let mut ctx = Context::new(Arc::new(server), now);
        let _ = ctx.handle_datagram(peer, data, now);
        for _ in 0..32 {
            if let Output::Timeout(_) = ctx.poll_output(&mut buf) {
                break;
            }
        }
    }

    let Ok(client) = Config::builder()
        .with_psk(b"fuzz", b"0123456789abcdef")
        .build()
    else {
        return;
    };
    let mut ctx = Context::new(Arc::new(client), now);
    if ctx.connect(peer, now).is_err() {
        return;
    }
    for _ in 0..32 {
        if let Output::Timeout(_) = ctx.poll_output(&mut buf) {
            break;
        }
    }
    let _ = ctx.handle_datagram(peer, data, now);
    for _ in 0..32 {
        if let Output::Timeout(_) = ctx.poll_output(&mut buf) {
            break;
        }
    }
});
