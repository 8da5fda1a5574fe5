//! Fuzz target for the dispatch chain.
//!
//! Every frame goes through the default decoders with every capture length
//! up to its full size, so each truncation point of each layer is hit.
//! Tests:
//! - Header bounds checking against captured and wire lengths
//! - Descriptor tree invariants on partial trees
//! - Flow tracking and connection expectations on arbitrary input

#![no_main]

use std::sync::OnceLock;

use layerscope_core::{Engine, EngineConfig, Frame, ParseOutcome};
use libfuzzer_sys::fuzz_target;

fn engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(|| {
        let config = EngineConfig {
            reclaim_interval: None,
            flow_sweep_interval_us: 1,
            flow_idle_timeout_us: 1,
            ..EngineConfig::default()
        };
        Engine::with_default_decoders(config).expect("default engine")
    })
}

fuzz_target!(|data: &[u8]| {
    let engine = engine();
    let step = (data.len() / 16).max(1);
    let mut captured = data.len();
    loop {
        let frame = Frame::new(&data[..captured], data.len());
        let outcome = engine.dissect(1, 0, frame, captured as i64);

        let tree = outcome.tree();
        for node in tree.iter() {
            assert!(node.header().len() <= node.head_len());
            assert!(node.payload().len() <= node.payload_len());
            if let Some(parent) = node.parent().and_then(|i| tree.get(i)) {
                assert!(node.head_len() + node.payload_len() <= parent.payload_len());
            }
            let _ = node.describe();
        }
        if captured == data.len() {
            assert!(!matches!(outcome, ParseOutcome::Truncated { .. }));
        }

        if captured == 0 {
            break;
        }
        captured = captured.saturating_sub(step);
    }
});
