//! Per-packet descriptor trees.

use smallvec::SmallVec;

use crate::error::DecodeError;
use crate::protocol::{BuiltinDecoder, Decoder, FieldList, FieldValue};

/// One decoded layer of one packet.
///
/// Offsets are relative to the start of the frame. `payload_len` is the
/// logical payload length; `payload()` may be shorter when the capture was
/// cut.
#[derive(Debug, Clone)]
pub struct Descriptor<'f> {
    decoder: BuiltinDecoder,
    parent: Option<usize>,
    depth: usize,
    offset: usize,
    head_len: usize,
    payload_len: usize,
    header: &'f [u8],
    payload: &'f [u8],
    fields: FieldList<'f>,
}

impl<'f> Descriptor<'f> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        decoder: BuiltinDecoder,
        parent: Option<usize>,
        depth: usize,
        offset: usize,
        head_len: usize,
        payload_len: usize,
        header: &'f [u8],
        payload: &'f [u8],
        fields: FieldList<'f>,
    ) -> Self {
        Self {
            decoder,
            parent,
            depth,
            offset,
            head_len,
            payload_len,
            header,
            payload,
            fields,
        }
    }

    pub fn protocol(&self) -> &'static str {
        self.decoder.name()
    }

    pub fn decoder(&self) -> &BuiltinDecoder {
        &self.decoder
    }

    /// Index of the parent node in the tree, `None` for the root.
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn head_len(&self) -> usize {
        self.head_len
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Captured header bytes.
    pub fn header(&self) -> &'f [u8] {
        self.header
    }

    /// Captured payload bytes, possibly shorter than `payload_len`.
    pub fn payload(&self) -> &'f [u8] {
        self.payload
    }

    pub fn is_payload_truncated(&self) -> bool {
        self.payload.len() < self.payload_len
    }

    pub fn fields(&self) -> &[(&'static str, FieldValue<'f>)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue<'f>> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    /// Human-readable one-liner, rendered by the layer's decoder.
    pub fn describe(&self) -> String {
        self.decoder.describe(self)
    }

    /// Bytes for binary export, chosen by the layer's decoder.
    pub fn raw_view(&self) -> &'f [u8] {
        self.decoder.raw_view(self)
    }
}

/// The layers of one packet, root (link layer) first.
///
/// Built by one thread for one packet and dropped when the packet is done.
#[derive(Debug, Clone, Default)]
pub struct DescriptorTree<'f> {
    nodes: SmallVec<[Descriptor<'f>; 8]>,
}

impl<'f> DescriptorTree<'f> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. It must be the first (root) node or hang below an
    /// existing node whose payload can hold it.
    pub(crate) fn push(&mut self, node: Descriptor<'f>) -> Result<usize, DecodeError> {
        match node.parent {
            None if !self.nodes.is_empty() => {
                return Err(DecodeError::malformed(node.protocol(), "second root layer"));
            }
            Some(p) => {
                let Some(parent) = self.nodes.get(p) else {
                    return Err(DecodeError::malformed(node.protocol(), "unknown parent layer"));
                };
                let len = node.head_len.saturating_add(node.payload_len);
                if len > parent.payload_len {
                    return Err(DecodeError::malformed(
                        node.protocol(),
                        format!(
                            "layer length {len} exceeds {} payload of {}",
                            parent.protocol(),
                            parent.payload_len
                        ),
                    ));
                }
            }
            None => {}
        }
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    pub fn root(&self) -> Option<&Descriptor<'f>> {
        self.nodes.first()
    }

    /// Innermost decoded layer.
    pub fn leaf(&self) -> Option<&Descriptor<'f>> {
        self.nodes.last()
    }

    pub fn get(&self, index: usize) -> Option<&Descriptor<'f>> {
        self.nodes.get(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Descriptor<'f>> {
        self.nodes.iter()
    }

    /// First layer decoded by `protocol`.
    pub fn find(&self, protocol: &str) -> Option<&Descriptor<'f>> {
        self.nodes.iter().find(|n| n.protocol() == protocol)
    }

    /// Layer names, root first.
    pub fn protocols(&self) -> Vec<&'static str> {
        self.nodes.iter().map(Descriptor::protocol).collect()
    }

    /// Walk from `index` up to the root, `index` included.
    pub fn ancestors(&self, index: usize) -> Ancestors<'_, 'f> {
        Ancestors {
            tree: self,
            next: self.nodes.get(index).map(|_| index),
        }
    }
}

impl<'a, 'f> IntoIterator for &'a DescriptorTree<'f> {
    type Item = &'a Descriptor<'f>;
    type IntoIter = std::slice::Iter<'a, Descriptor<'f>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`DescriptorTree::ancestors`].
pub struct Ancestors<'a, 'f> {
    tree: &'a DescriptorTree<'f>,
    next: Option<usize>,
}

impl<'a, 'f> Iterator for Ancestors<'a, 'f> {
    type Item = &'a Descriptor<'f>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.tree.nodes.get(self.next?)?;
        self.next = node.parent;
        Some(node)
    }
}
