//! Printing dissected packets.

use std::fmt::Write as _;
use std::io::{self, Write};

use layerscope_core::dispatch::{PacketEvent, ParseOutcome, Subscriber};

use super::OutputFormat;

/// Prints each packet as it is dissected.
///
/// Lines of one packet are written under a single stdout lock, so packets
/// from different workers never interleave.
pub struct PacketPrinter {
    format: OutputFormat,
}

impl PacketPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Render one packet.
    pub fn render(&self, event: &PacketEvent<'_, '_>) -> String {
        let mut out = String::new();
        let outcome = event.outcome;
        let _ = writeln!(
            out,
            "{}.{:06} {} {}/{} bytes",
            event.timestamp.div_euclid(1_000_000),
            event.timestamp.rem_euclid(1_000_000),
            outcome.kind(),
            event.captured_len(),
            event.wire_len,
        );
        for node in outcome.tree().iter() {
            let indent = "  ".repeat(node.depth() + 1);
            let _ = writeln!(out, "{indent}{}", node.describe());
            if self.format == OutputFormat::Hex {
                for line in hex_lines(node.raw_view()) {
                    let _ = writeln!(out, "{indent}  {line}");
                }
            }
        }
        match outcome {
            ParseOutcome::Parsed(_) => {}
            ParseOutcome::Truncated { at_layer, protocol, .. } => {
                let _ = writeln!(out, "  ! capture ends inside layer {at_layer} ({protocol})");
            }
            ParseOutcome::Malformed {
                at_layer,
                protocol,
                reason,
                ..
            } => {
                let _ = writeln!(out, "  ! layer {at_layer} ({protocol}): {reason}");
            }
        }
        out
    }
}

impl Subscriber for PacketPrinter {
    fn on_packet(&self, event: &PacketEvent<'_, '_>) {
        let text = self.render(event);
        // A closed pipe is not worth failing the run over.
        let _ = io::stdout().lock().write_all(text.as_bytes());
    }
}

/// Hex dump, 16 bytes per line.
fn hex_lines(bytes: &[u8]) -> impl Iterator<Item = String> + '_ {
    bytes.chunks(16).enumerate().map(|(i, chunk)| {
        let mut line = format!("{:04x}:", i * 16);
        for byte in chunk {
            let _ = write!(line, " {byte:02x}");
        }
        line
    })
}
