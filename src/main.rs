//! layerscope CLI entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use layerscope::cli::{Args, CaptureReader, PacketPrinter};
use layerscope_core::protocol::default_bindings;
use layerscope_core::{Decoder, Engine, Pipeline};

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Set up logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    // Handle info-only commands
    if args.is_info_only() {
        list_decoders();
        return Ok(());
    }

    let path = args
        .file
        .as_deref()
        .context("Capture file required. Use --help for usage.")?;

    let engine = Arc::new(
        Engine::with_default_decoders(args.engine_config())
            .context("Failed to start the dissection engine")?,
    );
    if args.print {
        engine.subscribe(PacketPrinter::new(args.format));
    }

    let mut reader = CaptureReader::open(path)?;
    let pipeline = Pipeline::new(engine.clone(), args.pipeline_config())
        .context("Failed to start worker threads")?;
    while let Some(frame) = reader.next_frame()? {
        pipeline.submit(frame)?;
    }
    info!(frames = reader.frames(), link_type = reader.link_type(), "capture read");

    let stats = pipeline.shutdown();
    engine.shutdown();
    let engine_stats = engine.stats();

    println!("{:-<50}", "");
    println!("frames:       {}", stats.submitted);
    println!("parsed:       {}", stats.parsed);
    println!("truncated:    {}", stats.truncated);
    println!("malformed:    {}", stats.malformed);
    println!("bytes:        {}", stats.bytes);
    println!(
        "reclaim:      {} created, {} freed, {} live",
        engine_stats.reclaim.created,
        engine_stats.reclaim.destroyed,
        engine_stats.reclaim.live()
    );
    Ok(())
}

fn list_decoders() {
    println!("Built-in Decoder Bindings:");
    println!("{:-<50}", "");

    for (decoder, kind, range) in default_bindings() {
        println!(
            "  {:<10} ({:<8}) {} {}",
            decoder.display_name(),
            decoder.name(),
            kind,
            range
        );
    }
}
