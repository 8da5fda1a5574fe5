//! What a decoder sees while parsing, and what it hands back.

use std::net::IpAddr;

use parking_lot::MutexGuard;
use smallvec::SmallVec;

use super::{FieldList, FieldValue, Parser, Session};
use crate::dispatch::{Descriptor, DescriptorTree};
use crate::flow::FlowTracker;
use crate::mux::{Expectation, Muxer, TransportKind};
use crate::reclaim::{ReclaimDomain, Ref};

/// How the chain continues after a layer.
#[derive(Debug)]
pub enum NextLayer {
    /// This layer is a leaf
    Stop,
    /// Resolve through the muxer, trying `keys` in order
    Mux {
        kind: TransportKind,
        keys: SmallVec<[u32; 2]>,
    },
    /// Continue with a specific decoder object (e.g. the one bound to a flow)
    Parser(Ref<Parser>),
}

impl NextLayer {
    pub fn mux(kind: TransportKind, key: u32) -> Self {
        NextLayer::Mux {
            kind,
            keys: SmallVec::from_slice(&[key]),
        }
    }

    pub fn mux_any(kind: TransportKind, keys: &[u32]) -> Self {
        NextLayer::Mux {
            kind,
            keys: SmallVec::from_slice(keys),
        }
    }
}

/// A successfully decoded layer.
#[derive(Debug)]
pub struct Layer<'f> {
    /// Header length, already checked against the captured bytes
    pub head_len: usize,
    /// Logical payload length following the header
    pub payload_len: usize,
    pub fields: FieldList<'f>,
    pub next: NextLayer,
}

impl<'f> Layer<'f> {
    pub fn new(head_len: usize, payload_len: usize) -> Self {
        Self {
            head_len,
            payload_len,
            fields: FieldList::new(),
            next: NextLayer::Stop,
        }
    }

    pub fn field(mut self, name: &'static str, value: FieldValue<'f>) -> Self {
        self.fields.push((name, value));
        self
    }

    pub fn push(&mut self, name: &'static str, value: FieldValue<'f>) {
        self.fields.push((name, value));
    }

    pub fn next(mut self, next: NextLayer) -> Self {
        self.next = next;
        self
    }
}

/// Services and ancestry available to a decoder during one parse call.
pub struct LayerContext<'a, 'f> {
    pub(crate) tree: &'a DescriptorTree<'f>,
    pub(crate) parent: Option<usize>,
    pub(crate) parser: &'a Ref<Parser>,
    pub(crate) muxer: &'a Muxer,
    pub(crate) flows: &'a FlowTracker,
    pub(crate) way: u8,
    pub(crate) timestamp: i64,
    pub(crate) expectation_ttl_us: i64,
}

impl<'a, 'f> LayerContext<'a, 'f> {
    /// Layers decoded so far for this packet.
    pub fn tree(&self) -> &'a DescriptorTree<'f> {
        self.tree
    }

    pub fn parent(&self) -> Option<&'a Descriptor<'f>> {
        self.tree.get(self.parent?)
    }

    /// Nearest enclosing layer decoded by `protocol`.
    pub fn ancestor(&self, protocol: &str) -> Option<&'a Descriptor<'f>> {
        let index = self.parent?;
        self.tree.ancestors(index).find(|n| n.protocol() == protocol)
    }

    /// Source and destination of the nearest enclosing IP layer.
    pub fn ip_endpoints(&self) -> Option<(IpAddr, IpAddr)> {
        let index = self.parent?;
        self.tree.ancestors(index).find_map(|n| {
            let src = n.field("src_ip")?.as_ip()?;
            let dst = n.field("dst_ip")?.as_ip()?;
            Some((src, dst))
        })
    }

    /// The decoder object running this parse.
    pub fn parser(&self) -> &'a Ref<Parser> {
        self.parser
    }

    /// Per-object session state of the running decoder.
    pub fn session(&self) -> MutexGuard<'a, Session> {
        self.parser.session()
    }

    pub fn muxer(&self) -> &'a Muxer {
        self.muxer
    }

    pub fn flows(&self) -> &'a FlowTracker {
        self.flows
    }

    pub fn domain(&self) -> &'a ReclaimDomain {
        self.muxer.domain()
    }

    /// Direction hint the frame was captured with (0 or 1). Flow-aware
    /// decoders prefer the direction relative to the flow initiator.
    pub fn way(&self) -> u8 {
        self.way
    }

    /// Capture timestamp in microseconds.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Declare a connection this packet announces, valid for the configured
    /// expectation lifetime.
    pub fn expect(&self, expectation: Expectation) {
        self.muxer
            .dynamic_expect(expectation, self.expectation_ttl_us, self.timestamp);
    }
}
