//! The per-packet dispatch chain.
//!
//! Starting from the decoder bound to the capture's link type, each decoder
//! parses its layer and names what comes next: a muxer lookup, a specific
//! decoder object, or nothing. Every decoded layer becomes a node in the
//! packet's [`DescriptorTree`], linked to the layer that carried it.
//!
//! Errors never escape the chain. A short capture ends the packet as
//! [`ParseOutcome::Truncated`], a protocol violation as
//! [`ParseOutcome::Malformed`]; both keep the layers decoded so far.

mod descriptor;
mod frame;
mod subscriber;

pub use descriptor::{Ancestors, Descriptor, DescriptorTree};
pub use frame::Frame;
pub use subscriber::{PacketEvent, Subscriber, SubscriberId, SubscriberSet};

use tracing::trace;

use crate::error::DecodeError;
use crate::flow::FlowTracker;
use crate::mux::{Muxer, TransportKind};
use crate::protocol::{Decoder, LayerContext, NextLayer, Parser};
use crate::reclaim::Ref;

/// Layers decoded for one packet before the chain gives up.
pub const DEFAULT_MAX_DEPTH: usize = 16;

/// Default lifetime of a connection expectation, in microseconds.
pub const DEFAULT_EXPECTATION_TTL_US: i64 = 60_000_000;

/// Result of running one packet through the chain.
#[derive(Debug)]
pub enum ParseOutcome<'f> {
    /// Every layer decoded up to a leaf.
    Parsed(DescriptorTree<'f>),
    /// The capture ended inside layer `at_layer`.
    Truncated {
        tree: DescriptorTree<'f>,
        at_layer: usize,
        protocol: &'static str,
    },
    /// Layer `at_layer` violated its protocol.
    Malformed {
        tree: DescriptorTree<'f>,
        at_layer: usize,
        protocol: &'static str,
        reason: String,
    },
}

impl<'f> ParseOutcome<'f> {
    /// Layers decoded before the chain stopped.
    pub fn tree(&self) -> &DescriptorTree<'f> {
        match self {
            ParseOutcome::Parsed(tree)
            | ParseOutcome::Truncated { tree, .. }
            | ParseOutcome::Malformed { tree, .. } => tree,
        }
    }

    pub fn into_tree(self) -> DescriptorTree<'f> {
        match self {
            ParseOutcome::Parsed(tree)
            | ParseOutcome::Truncated { tree, .. }
            | ParseOutcome::Malformed { tree, .. } => tree,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ParseOutcome::Parsed(_))
    }

    /// Index of the layer that failed, if any.
    pub fn failed_layer(&self) -> Option<usize> {
        match self {
            ParseOutcome::Parsed(_) => None,
            ParseOutcome::Truncated { at_layer, .. } | ParseOutcome::Malformed { at_layer, .. } => {
                Some(*at_layer)
            }
        }
    }

    /// Short label for counters and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseOutcome::Parsed(_) => "parsed",
            ParseOutcome::Truncated { .. } => "truncated",
            ParseOutcome::Malformed { .. } => "malformed",
        }
    }

    fn failed(tree: DescriptorTree<'f>, at_layer: usize, error: DecodeError) -> Self {
        match error {
            DecodeError::Truncated { protocol, .. } => ParseOutcome::Truncated {
                tree,
                at_layer,
                protocol,
            },
            DecodeError::Malformed { protocol, reason } => ParseOutcome::Malformed {
                tree,
                at_layer,
                protocol,
                reason,
            },
        }
    }
}

/// Runs packets through decoders. Cheap to build; one per thread or per
/// call is fine.
#[derive(Debug, Clone, Copy)]
pub struct DispatchChain<'a> {
    muxer: &'a Muxer,
    flows: &'a FlowTracker,
    max_depth: usize,
    expectation_ttl_us: i64,
}

impl<'a> DispatchChain<'a> {
    pub fn new(muxer: &'a Muxer, flows: &'a FlowTracker) -> Self {
        Self {
            muxer,
            flows,
            max_depth: DEFAULT_MAX_DEPTH,
            expectation_ttl_us: DEFAULT_EXPECTATION_TTL_US,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_expectation_ttl(mut self, ttl_us: i64) -> Self {
        self.expectation_ttl_us = ttl_us;
        self
    }

    /// Decode a frame captured on `link_type` at `timestamp` (microseconds).
    /// `way` is a direction hint passed on to decoders.
    pub fn dissect<'f>(
        &self,
        link_type: u32,
        way: u8,
        frame: Frame<'f>,
        timestamp: i64,
    ) -> ParseOutcome<'f> {
        match self.muxer.resolve(TransportKind::LinkType, link_type) {
            Some(root) => self.dissect_with(root, way, frame, timestamp),
            None => ParseOutcome::Malformed {
                tree: DescriptorTree::new(),
                at_layer: 0,
                protocol: "link",
                reason: format!("no decoder bound to link type {link_type}"),
            },
        }
    }

    /// Decode a frame starting with the decoder object `root`.
    pub fn dissect_with<'f>(
        &self,
        root: Ref<Parser>,
        way: u8,
        frame: Frame<'f>,
        timestamp: i64,
    ) -> ParseOutcome<'f> {
        let mut tree = DescriptorTree::new();
        let mut parser = root;
        let mut current = frame;
        let mut parent = None;
        let mut offset = 0;

        loop {
            let depth = tree.len();
            if depth >= self.max_depth {
                return ParseOutcome::Malformed {
                    tree,
                    at_layer: depth,
                    protocol: parser.name(),
                    reason: format!("more than {} layers", self.max_depth),
                };
            }

            let result = {
                let cx = LayerContext {
                    tree: &tree,
                    parent,
                    parser: &parser,
                    muxer: self.muxer,
                    flows: self.flows,
                    way,
                    timestamp,
                    expectation_ttl_us: self.expectation_ttl_us,
                };
                parser.decoder().parse(current, &cx)
            };
            let layer = match result {
                Ok(layer) => layer,
                Err(e) => {
                    trace!(depth, error = %e, "layer failed");
                    return ParseOutcome::failed(tree, depth, e);
                }
            };

            let name = parser.name();
            let (head_len, payload_len) = (layer.head_len, layer.payload_len);
            if head_len.saturating_add(payload_len) > current.wire_len() {
                return ParseOutcome::Malformed {
                    tree,
                    at_layer: depth,
                    protocol: name,
                    reason: format!(
                        "layer of {} bytes in a {} byte frame",
                        head_len.saturating_add(payload_len),
                        current.wire_len()
                    ),
                };
            }
            if head_len > current.captured_len() {
                return ParseOutcome::Truncated {
                    tree,
                    at_layer: depth,
                    protocol: name,
                };
            }

            parser.record(current.captured_len());
            let node = Descriptor::new(
                parser.decoder().clone(),
                parent,
                depth,
                offset,
                head_len,
                payload_len,
                current.clipped(0, head_len),
                current.clipped(head_len, payload_len),
                layer.fields,
            );
            let index = match tree.push(node) {
                Ok(index) => index,
                Err(e) => return ParseOutcome::failed(tree, depth, e),
            };

            if payload_len == 0 {
                return ParseOutcome::Parsed(tree);
            }
            let next = match layer.next {
                NextLayer::Stop => None,
                NextLayer::Mux { kind, keys } => self.muxer.resolve_any(kind, &keys),
                NextLayer::Parser(next) => Some(next),
            };
            let Some(next) = next else {
                return ParseOutcome::Parsed(tree);
            };

            current = current.sub(head_len, payload_len);
            offset += head_len;
            parent = Some(index);
            parser = next;
        }
    }
}
