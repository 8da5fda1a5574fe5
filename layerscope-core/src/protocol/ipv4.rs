//! IPv4 decoder.

use etherparse::Ipv4HeaderSlice;

use super::{Decoder, FieldValue, Layer, LayerContext, NextLayer};
use crate::dispatch::Frame;
use crate::error::DecodeError;
use crate::mux::TransportKind;

/// EtherType for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;

const MIN_HEADER_LEN: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct Ipv4Decoder;

impl Decoder for Ipv4Decoder {
    fn name(&self) -> &'static str {
        "ipv4"
    }

    fn display_name(&self) -> &'static str {
        "IPv4"
    }

    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        _cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        let fixed = frame.require(self.name(), MIN_HEADER_LEN)?;

        let version = fixed[0] >> 4;
        if version != 4 {
            return Err(DecodeError::malformed(self.name(), format!("version {version}")));
        }
        let header_len = usize::from(fixed[0] & 0x0f) * 4;
        if header_len < MIN_HEADER_LEN {
            return Err(DecodeError::malformed(
                self.name(),
                format!("header length {header_len} below minimum"),
            ));
        }
        let total_len = usize::from(u16::from_be_bytes([fixed[2], fixed[3]]));
        if total_len < header_len {
            return Err(DecodeError::malformed(
                self.name(),
                format!("total length {total_len} shorter than header {header_len}"),
            ));
        }
        if total_len > frame.wire_len() {
            return Err(DecodeError::malformed(
                self.name(),
                format!("total length {total_len} exceeds frame of {}", frame.wire_len()),
            ));
        }

        let header = frame.require(self.name(), header_len)?;
        let ip = Ipv4HeaderSlice::from_slice(header)
            .map_err(|e| DecodeError::malformed(self.name(), e.to_string()))?;

        let protocol = ip.protocol().0;
        let frag_offset = ip.fragments_offset().value();

        // Only the first fragment carries the transport header.
        let next = if frag_offset == 0 {
            NextLayer::mux(TransportKind::IpProto, protocol.into())
        } else {
            NextLayer::Stop
        };

        Ok(Layer::new(header_len, total_len - header_len)
            .field("header_length", FieldValue::UInt8(header_len as u8))
            .field("total_length", FieldValue::UInt16(total_len as u16))
            .field("identification", FieldValue::UInt16(ip.identification()))
            .field("dont_fragment", FieldValue::Bool(ip.dont_fragment()))
            .field("more_fragments", FieldValue::Bool(ip.more_fragments()))
            .field("fragment_offset", FieldValue::UInt16(frag_offset))
            .field("ttl", FieldValue::UInt8(ip.ttl()))
            .field("protocol", FieldValue::UInt8(protocol))
            .field("checksum", FieldValue::UInt16(ip.header_checksum()))
            .field("src_ip", FieldValue::ipv4(&ip.source()))
            .field("dst_ip", FieldValue::ipv4(&ip.destination()))
            .next(next))
    }
}
