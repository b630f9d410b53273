#![cfg(feature = "rust-crypto")]

mod common;
mod edge;
mod fragmentation;
mod handshake;
mod retransmit;
