//! UDP decoder.

use etherparse::UdpHeaderSlice;

use super::transport::bind_flow;
use super::{Decoder, FieldValue, Layer, LayerContext};
use crate::dispatch::Frame;
use crate::error::DecodeError;
use crate::mux::TransportKind;

/// IP protocol number for UDP.
pub const IP_PROTO_UDP: u8 = 17;

const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct UdpDecoder;

impl Decoder for UdpDecoder {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn display_name(&self) -> &'static str {
        "UDP"
    }

    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        let header = frame.require(self.name(), HEADER_LEN)?;
        let udp = UdpHeaderSlice::from_slice(header)
            .map_err(|e| DecodeError::malformed(self.name(), e.to_string()))?;

        let length = usize::from(udp.length());
        if length < HEADER_LEN || length > frame.wire_len() {
            return Err(DecodeError::malformed(
                self.name(),
                format!("length {length} out of bounds for {} byte datagram", frame.wire_len()),
            ));
        }

        let src_port = udp.source_port();
        let dst_port = udp.destination_port();
        let (flow, next) = bind_flow(cx, IP_PROTO_UDP, TransportKind::UdpPort, src_port, dst_port);

        let mut layer = Layer::new(HEADER_LEN, length - HEADER_LEN)
            .field("src_port", FieldValue::UInt16(src_port))
            .field("dst_port", FieldValue::UInt16(dst_port))
            .field("length", FieldValue::UInt16(udp.length()))
            .field("checksum", FieldValue::UInt16(udp.checksum()))
            .next(next);
        if let Some(flow) = flow {
            layer.push("flow_id", FieldValue::UInt64(flow.id()));
        }
        Ok(layer)
    }
}
