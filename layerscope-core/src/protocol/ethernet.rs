//! Ethernet II decoder.

use etherparse::Ethernet2HeaderSlice;

use super::{Decoder, FieldValue, Layer, LayerContext, NextLayer};
use crate::dispatch::Frame;
use crate::error::DecodeError;
use crate::mux::TransportKind;

/// Ethernet II header length.
pub const ETHERNET_HEADER_LEN: usize = 14;

/// Link type of Ethernet captures.
pub const LINKTYPE_ETHERNET: u32 = 1;

#[derive(Debug, Clone, Copy, Default)]
pub struct EthernetDecoder;

impl Decoder for EthernetDecoder {
    fn name(&self) -> &'static str {
        "ethernet"
    }

    fn display_name(&self) -> &'static str {
        "Ethernet"
    }

    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        _cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        let header = frame.require(self.name(), ETHERNET_HEADER_LEN)?;
        let eth = Ethernet2HeaderSlice::from_slice(header)
            .map_err(|e| DecodeError::malformed(self.name(), e.to_string()))?;
        let ethertype = eth.ether_type().0;

        Ok(Layer::new(ETHERNET_HEADER_LEN, frame.wire_len() - ETHERNET_HEADER_LEN)
            .field("dst_mac", FieldValue::MacAddr(eth.destination()))
            .field("src_mac", FieldValue::MacAddr(eth.source()))
            .field("ethertype", FieldValue::UInt16(ethertype))
            .next(NextLayer::mux(TransportKind::EtherType, ethertype.into())))
    }
}
