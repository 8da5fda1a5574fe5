//! # layerscope-core
//!
//! Layered packet dissection with runtime-pluggable decoders.
//!
//! A captured frame is handed to the decoder bound to its link type. Each
//! decoder reads its header, records its fields in a descriptor node, and
//! names the next layer: through a port or protocol-number lookup in the
//! [`Muxer`](mux::Muxer), or directly, when connection tracking already knows
//! which decoder object owns the flow. The finished (or partial) tree goes to
//! subscribers.
//!
//! Decoder objects and flows are shared between worker threads and freed
//! through a [`ReclaimDomain`](reclaim::ReclaimDomain): reference counting
//! decides when an object is garbage, a quiescence barrier decides when it is
//! safe to free.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use layerscope_core::prelude::*;
//!
//! let engine = Engine::with_default_decoders(EngineConfig::default()).unwrap();
//! engine.subscribe(|event: &PacketEvent<'_, '_>| {
//!     for node in event.outcome.tree().iter() {
//!         println!("{}", node.describe());
//!     }
//! });
//!
//! let bytes: Vec<u8> = vec![0; 60];
//! let outcome = engine.dissect(LINKTYPE_ETHERNET, 0, Frame::complete(&bytes), 0);
//! println!("{}", outcome.kind());
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        layerscope-core                              |
//! +---------------------------------------------------------------------+
//! |  engine/     - Engine, EngineConfig                                 |
//! |  pipeline/   - bounded queue + worker threads                       |
//! |  dispatch/   - DispatchChain, ParseOutcome, descriptor tree         |
//! |  protocol/   - Decoder trait, decoder objects, built-in decoders    |
//! |  mux/        - transport key tables, connection expectations        |
//! |  flow/       - 5-tuple flow tracking                                |
//! |  reclaim/    - refcounts, death row, quiescence regions             |
//! |  scanner/    - delimiter-based token scanner                        |
//! |  error/      - Error types                                          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Built-in Decoders
//!
//! | Layer | Decoders | Bound to |
//! |-------|----------|----------|
//! | Link | Ethernet II | link type 1 |
//! | Network | IPv4 | ethertype 0x0800 |
//! | Transport | TCP, UDP, ICMP | IP protocol 6, 17, 1 |
//! | Application | DNS (also mDNS, NBNS, LLMNR), FTP | UDP 53/5353/137/5355, TCP 21 |

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod flow;
pub mod mux;
pub mod pipeline;
pub mod prelude;
pub mod protocol;
pub mod reclaim;
pub mod scanner;

// Re-export commonly used types at crate root for convenience
pub use dispatch::{
    Descriptor, DescriptorTree, DispatchChain, Frame, PacketEvent, ParseOutcome, Subscriber,
    SubscriberId,
};
pub use engine::{Engine, EngineConfig, EngineStats};
pub use error::{DecodeError, Error, MuxError, PipelineError, Result};
pub use mux::{Endpoint, Expectation, KeyRange, Muxer, TransportKind};
pub use pipeline::{CapturedFrame, Pipeline, PipelineConfig, PipelineStats};
pub use protocol::{BuiltinDecoder, Decoder, FieldValue, Layer, LayerContext, NextLayer, Parser};
pub use reclaim::{ReclaimDomain, ReclaimStats, Ref};
pub use scanner::{DelimiterSet, TokenScanner};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
