//! Convenient re-exports for common usage.
//!
//! ```rust,no_run
//! use layerscope_core::prelude::*;
//!
//! let engine = Engine::with_default_decoders(EngineConfig::default()).unwrap();
//! let pipeline = Pipeline::with_defaults(std::sync::Arc::new(engine)).unwrap();
//! ```

// Engine and pipeline
pub use crate::engine::{Engine, EngineConfig, EngineStats};
pub use crate::pipeline::{CapturedFrame, Pipeline, PipelineConfig, PipelineStats};

// Dispatch types
pub use crate::dispatch::{
    Descriptor, DescriptorTree, Frame, PacketEvent, ParseOutcome, Subscriber, SubscriberId,
};

// Decoder types
pub use crate::protocol::{
    default_bindings, BuiltinDecoder, Decoder, FieldValue, Layer, LayerContext, NextLayer,
    Parser, LINKTYPE_ETHERNET,
};

// Muxing
pub use crate::mux::{Endpoint, Expectation, KeyRange, TransportKind};

// Error types
pub use crate::error::{DecodeError, Error, Result};
