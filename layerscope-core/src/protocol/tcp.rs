//! TCP decoder.

use etherparse::TcpHeaderSlice;

use super::transport::bind_flow;
use super::{Decoder, FieldValue, Layer, LayerContext};
use crate::dispatch::Frame;
use crate::error::DecodeError;
use crate::mux::TransportKind;

/// IP protocol number for TCP.
pub const IP_PROTO_TCP: u8 = 6;

const MIN_HEADER_LEN: usize = 20;

/// TCP flag bits.
pub mod flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDecoder;

impl Decoder for TcpDecoder {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn display_name(&self) -> &'static str {
        "TCP"
    }

    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        let fixed = frame.require(self.name(), MIN_HEADER_LEN)?;
        let header_len = usize::from(fixed[12] >> 4) * 4;
        if header_len < MIN_HEADER_LEN {
            return Err(DecodeError::malformed(
                self.name(),
                format!("data offset {header_len} below minimum"),
            ));
        }

        let header = frame.require(self.name(), header_len)?;
        let tcp = TcpHeaderSlice::from_slice(header)
            .map_err(|e| DecodeError::malformed(self.name(), e.to_string()))?;

        let src_port = tcp.source_port();
        let dst_port = tcp.destination_port();
        let flag_bits = header[13];

        let (flow, next) = bind_flow(cx, IP_PROTO_TCP, TransportKind::TcpPort, src_port, dst_port);

        let mut layer = Layer::new(header_len, frame.wire_len() - header_len)
            .field("src_port", FieldValue::UInt16(src_port))
            .field("dst_port", FieldValue::UInt16(dst_port))
            .field("seq", FieldValue::UInt32(tcp.sequence_number()))
            .field("ack", FieldValue::UInt32(tcp.acknowledgment_number()))
            .field("data_offset", FieldValue::UInt8(tcp.data_offset()))
            .field("flags", FieldValue::UInt8(flag_bits))
            .field("window", FieldValue::UInt16(tcp.window_size()))
            .field("checksum", FieldValue::UInt16(tcp.checksum()))
            .next(next);

        if let Some(flow) = flow {
            layer.push("flow_id", FieldValue::UInt64(flow.id()));
            if let Some((src, _)) = cx.ip_endpoints() {
                layer.push(
                    "from_initiator",
                    FieldValue::Bool(flow.is_from_initiator(src, src_port)),
                );
            }
        }
        Ok(layer)
    }
}
