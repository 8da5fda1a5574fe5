//! Byte windows handed to decoders.

use crate::error::DecodeError;

/// The bytes of one layer: what was captured, plus how long the layer is on
/// the wire.
///
/// `captured().len() <= wire_len()` always holds. Decoders must only read
/// captured bytes; `wire_len` is there to tell a short capture from a short
/// packet.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'f> {
    data: &'f [u8],
    wire_len: usize,
}

impl<'f> Frame<'f> {
    /// A frame of `wire_len` bytes of which `data` were captured. A
    /// `wire_len` below the captured length is raised to it.
    pub fn new(data: &'f [u8], wire_len: usize) -> Self {
        Self {
            data,
            wire_len: wire_len.max(data.len()),
        }
    }

    /// A fully captured frame.
    pub fn complete(data: &'f [u8]) -> Self {
        Self::new(data, data.len())
    }

    pub fn captured(&self) -> &'f [u8] {
        self.data
    }

    pub fn captured_len(&self) -> usize {
        self.data.len()
    }

    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    pub fn is_truncated(&self) -> bool {
        self.data.len() < self.wire_len
    }

    /// Check that `needed` bytes exist and return them.
    ///
    /// A frame that is shorter than `needed` even on the wire is
    /// `Malformed`; one that is long enough on the wire but was captured
    /// short is `Truncated`.
    pub fn require(&self, protocol: &'static str, needed: usize) -> Result<&'f [u8], DecodeError> {
        if self.wire_len < needed {
            return Err(DecodeError::malformed(
                protocol,
                format!("need {needed} bytes, frame is {} bytes long", self.wire_len),
            ));
        }
        self.data.get(..needed).ok_or(DecodeError::Truncated {
            protocol,
            needed,
            captured: self.data.len(),
        })
    }

    /// Captured bytes in `start..start + len`, clipped to what was captured.
    pub fn clipped(&self, start: usize, len: usize) -> &'f [u8] {
        let start = start.min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        &self.data[start..end]
    }

    /// Child frame for a payload of `len` wire bytes starting at `offset`.
    pub(crate) fn sub(&self, offset: usize, len: usize) -> Frame<'f> {
        Frame {
            data: self.clipped(offset, len),
            wire_len: len,
        }
    }
}
