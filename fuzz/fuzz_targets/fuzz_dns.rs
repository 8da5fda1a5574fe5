//! Fuzz target for the DNS decoder.
//!
//! Wraps the input in Ethernet/IPv4/UDP to port 53 and checks that name
//! decompression terminates without reading past the capture.

#![no_main]

use std::sync::OnceLock;

use layerscope_core::{Engine, EngineConfig, Frame};
use libfuzzer_sys::fuzz_target;

#[rustfmt::skip]
const DNS_FRAME: [u8; 42] = [
    // Ethernet header (14 bytes)
    0x00, 0x00, 0x00, 0x00, 0x00, 0x01, // dst mac
    0x00, 0x00, 0x00, 0x00, 0x00, 0x02, // src mac
    0x08, 0x00, // ethertype IPv4
    // IPv4 header (20 bytes)
    0x45, 0x00, 0x00, 0x00, // version=4, ihl=5, total_len (patched below)
    0x00, 0x01, 0x00, 0x00, // id=1, flags=0, frag_offset=0
    0x40, 0x11, 0x00, 0x00, // ttl=64, protocol=UDP(17), checksum=0
    0x0a, 0x00, 0x00, 0x01, // src ip: 10.0.0.1
    0x0a, 0x00, 0x00, 0x02, // dst ip: 10.0.0.2
    // UDP header (8 bytes)
    0xc0, 0x00, // src_port = 49152
    0x00, 0x35, // dst_port = 53
    0x00, 0x00, // length (patched below)
    0x00, 0x00, // checksum
];

fn engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(|| {
        let config = EngineConfig {
            reclaim_interval: None,
            ..EngineConfig::default()
        };
        Engine::with_default_decoders(config).expect("default engine")
    })
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() || data.len() > 1400 {
        return;
    }

    let mut frame = DNS_FRAME.to_vec();

    // Patch IPv4 total length (offset 16-17): IP(20) + UDP(8) + payload
    let ip_total_len = (28 + data.len()) as u16;
    frame[16..18].copy_from_slice(&ip_total_len.to_be_bytes());

    // Patch UDP length (offset 38-39): UDP(8) + payload
    let udp_len = (8 + data.len()) as u16;
    frame[38..40].copy_from_slice(&udp_len.to_be_bytes());

    frame.extend_from_slice(data);

    let _ = engine().dissect(1, 0, Frame::complete(&frame), 0);
});
