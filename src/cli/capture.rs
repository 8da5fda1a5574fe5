//! Reading frames from legacy pcap files.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapError};

use layerscope_core::CapturedFrame;

const PCAP_BUFFER_SIZE: usize = 65536;

/// Frames of a legacy pcap stream, in file order.
pub struct CaptureReader<R: Read> {
    reader: LegacyPcapReader<R>,
    link_type: u32,
    nanosecond: bool,
    frames: u64,
}

impl CaptureReader<File> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open capture file: {}", path.display()))?;
        Self::new(file).with_context(|| format!("Not a pcap file: {}", path.display()))
    }
}

impl<R: Read> CaptureReader<R> {
    pub fn new(source: R) -> Result<Self> {
        let reader = LegacyPcapReader::new(PCAP_BUFFER_SIZE, source)
            .map_err(|e| anyhow!("Legacy PCAP header error: {e:?}"))?;
        Ok(Self {
            reader,
            link_type: 0,
            nanosecond: false,
            frames: 0,
        })
    }

    /// Link type from the file header (valid once the first frame is read).
    pub fn link_type(&self) -> u32 {
        self.link_type
    }

    /// Frames read so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => match block {
                    PcapBlockOwned::Legacy(packet) => {
                        self.frames += 1;
                        let fraction = if self.nanosecond {
                            i64::from(packet.ts_usec) / 1_000
                        } else {
                            i64::from(packet.ts_usec)
                        };
                        let timestamp = i64::from(packet.ts_sec) * 1_000_000 + fraction;
                        let frame = CapturedFrame::new(
                            self.link_type,
                            timestamp,
                            Bytes::copy_from_slice(packet.data),
                        )
                        .with_wire_len(packet.origlen as usize);
                        self.reader.consume(offset);
                        return Ok(Some(frame));
                    }
                    PcapBlockOwned::LegacyHeader(header) => {
                        self.link_type = header.network.0 as u32;
                        self.nanosecond = header.is_nanosecond_precision();
                        self.reader.consume(offset);
                    }
                    _ => self.reader.consume(offset),
                },
                Err(PcapError::Eof) => return Ok(None),
                Err(PcapError::Incomplete(_)) => {
                    self.reader
                        .refill()
                        .map_err(|e| anyhow!("Legacy PCAP refill error: {e:?}"))?;
                }
                Err(e) => {
                    return Err(anyhow!(
                        "Legacy PCAP parse error after frame {}: {e:?}",
                        self.frames
                    ))
                }
            }
        }
    }
}
