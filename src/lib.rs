//! layerscope - dissect capture files layer by layer.
//!
//! The engine lives in [`layerscope_core`]; this crate adds the command-line
//! front end that feeds it from pcap files.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use layerscope::cli::CaptureReader;
//! use layerscope_core::{Engine, EngineConfig, Pipeline};
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = Arc::new(Engine::with_default_decoders(EngineConfig::default())?);
//!     let pipeline = Pipeline::with_defaults(engine.clone())?;
//!     let mut reader = CaptureReader::open(Path::new("capture.pcap"))?;
//!     while let Some(frame) = reader.next_frame()? {
//!         pipeline.submit(frame)?;
//!     }
//!     println!("{:?}", pipeline.shutdown());
//!     Ok(())
//! }
//! ```

pub mod cli;
