//! Command-line argument definitions.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use layerscope_core::{EngineConfig, PipelineConfig};

/// How decoded layers are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One summary line per layer (default)
    Text,
    /// Summary line plus a hex dump of each layer's raw bytes
    Hex,
}

/// Dissect the frames of a capture file layer by layer.
#[derive(Parser, Debug)]
#[command(name = "layerscope")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Legacy pcap file to dissect
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Worker threads (0 = one per core). Use 1 to keep stream decoders in
    /// capture order
    #[arg(short = 'w', long = "workers", default_value = "1")]
    pub workers: usize,

    /// Frames queued ahead of the workers
    #[arg(long = "queue", default_value = "4096")]
    pub queue_capacity: usize,

    /// Print every decoded layer
    #[arg(short = 'p', long = "print")]
    pub print: bool,

    /// Output format for --print
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Layers decoded per frame before giving up
    #[arg(long = "max-depth", default_value = "16")]
    pub max_depth: usize,

    /// Lifetime of announced connections, in seconds of capture time
    #[arg(long = "expect-ttl", default_value = "60")]
    pub expect_ttl_secs: u64,

    /// Idle time after which a flow is forgotten, in seconds of capture time
    #[arg(long = "flow-timeout", default_value = "300")]
    pub flow_timeout_secs: u64,

    /// List the built-in decoder bindings
    #[arg(long = "list-decoders")]
    pub list_decoders: bool,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

const MICROS: i64 = 1_000_000;

impl Args {
    /// Check if this is an info-only command (no capture file needed).
    pub fn is_info_only(&self) -> bool {
        self.list_decoders
    }

    pub fn engine_config(&self) -> EngineConfig {
        let secs = |s: u64| i64::try_from(s).unwrap_or(i64::MAX / MICROS).saturating_mul(MICROS);
        EngineConfig {
            max_depth: self.max_depth,
            expectation_ttl_us: secs(self.expect_ttl_secs),
            flow_idle_timeout_us: secs(self.flow_timeout_secs),
            ..EngineConfig::default()
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
        }
    }
}
