//! Command-line interface module.
//!
//! This module handles:
//! - Argument parsing via clap
//! - Reading legacy pcap files
//! - Printing dissected packets

mod args;
mod capture;
mod output;

pub use args::{Args, OutputFormat};
pub use capture::CaptureReader;
pub use output::PacketPrinter;
