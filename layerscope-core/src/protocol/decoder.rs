//! The decoder contract and the refcounted decoder object.

use std::fmt::{self, Write as _};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};

use super::{BuiltinDecoder, Layer, LayerContext};
use crate::dispatch::{Descriptor, Frame};
use crate::error::DecodeError;
use crate::reclaim::{ReclaimDomain, Ref};

/// Protocol logic for one layer.
///
/// Implementations are stateless; per-connection state lives in the
/// [`Session`] of the [`Parser`] running them.
pub trait Decoder: Send + Sync {
    /// Short lowercase name, used in bindings and descriptors.
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str;

    /// Decode the layer at the start of `frame`.
    ///
    /// Header bytes must be validated with [`Frame::require`] so that a
    /// short capture is reported as `Truncated` and a short packet as
    /// `Malformed`.
    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError>;

    /// Fresh state for a new decoder object.
    fn new_session(&self) -> Session {
        Session::default()
    }

    /// One-line summary of a layer this decoder produced.
    fn describe(&self, node: &Descriptor<'_>) -> String {
        let mut out = format!(
            "{}: head_len={}, payload={}",
            self.display_name(),
            node.head_len(),
            node.payload_len()
        );
        for (name, value) in node.fields() {
            let _ = write!(out, ", {name}={value}");
        }
        out
    }

    /// Bytes of a layer this decoder produced, for binary export.
    fn raw_view<'f>(&self, node: &Descriptor<'f>) -> &'f [u8] {
        node.header()
    }
}

/// Mutable state of one decoder object.
#[derive(Debug, Default)]
pub struct Session {
    /// Unparsed stream bytes, one buffer per direction (0 = from the
    /// initiator)
    pub streams: [BytesMut; 2],
}

/// A decoder object: a decoder plus its session, shared through the
/// reclaim domain.
///
/// Muxer entries own one of these per binding; flows own per-connection
/// sessions made with [`Parser::new_session`].
pub struct Parser {
    decoder: BuiltinDecoder,
    session: Mutex<Session>,
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl Parser {
    pub fn new(decoder: BuiltinDecoder) -> Self {
        let session = decoder.new_session();
        Self {
            decoder,
            session: Mutex::new(session),
            packets: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn decoder(&self) -> &BuiltinDecoder {
        &self.decoder
    }

    pub fn name(&self) -> &'static str {
        self.decoder.name()
    }

    /// A new decoder object for the same decoder with fresh session state.
    pub fn new_session(&self, domain: &ReclaimDomain) -> Ref<Parser> {
        domain.alloc(Parser::new(self.decoder.clone()))
    }

    pub fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock()
    }

    pub(crate) fn record(&self, captured: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(captured as u64, Ordering::Relaxed);
    }

    /// Packets and captured bytes this object decoded.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.packets.load(Ordering::Relaxed),
            self.bytes.load(Ordering::Relaxed),
        )
    }
}

impl fmt::Debug for Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (packets, bytes) = self.stats();
        f.debug_struct("Parser")
            .field("decoder", &self.decoder.name())
            .field("packets", &packets)
            .field("bytes", &bytes)
            .finish()
    }
}
