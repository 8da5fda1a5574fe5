//! ICMP decoder.
//!
//! Besides the fixed header this extracts the identifier of query messages
//! and, for error messages, the endpoints of the datagram that caused the
//! error from the IP header quoted in the body.

use std::net::{IpAddr, Ipv4Addr};

use super::{Decoder, FieldValue, Layer, LayerContext};
use crate::dispatch::Frame;
use crate::error::DecodeError;

/// IP protocol number for ICMP.
pub const IP_PROTO_ICMP: u8 = 1;

const HEADER_LEN: usize = 8;
const QUOTED_IP_MIN_LEN: usize = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpDecoder;

/// Whether messages of `icmp_type` carry an identifier and sequence number.
pub fn has_identifier(icmp_type: u8) -> bool {
    matches!(icmp_type, 0 | 8 | 13 | 14 | 17 | 18)
}

/// Whether `icmp_type` is an error message quoting the offending datagram.
pub fn is_error(icmp_type: u8) -> bool {
    !matches!(icmp_type, 0 | 8 | 9 | 10 | 13 | 14 | 15 | 16 | 17 | 18)
}

/// Symbolic name of a type/code pair.
pub fn type_name(icmp_type: u8, code: u8) -> &'static str {
    match icmp_type {
        0 => "EchoReply",
        3 => match code {
            0 => "NetUnreachable",
            1 => "HostUnreachable",
            2 => "ProtoUnreachable",
            3 => "PortUnreachable",
            4 => "NeedFragButCant",
            5 => "CantRouteSource",
            6 => "UnknownDestNet",
            7 => "UnknownDestHost",
            8 => "SrcHostAlone",
            9 => "DestNetForbidden",
            10 => "DestHostForbidden",
            11 => "BadTOSforNet",
            12 => "BadTOSforHost",
            13 => "Filtered",
            14 => "PrecPolicyViolation",
            15 => "CurrentPrecCut",
            _ => "Unreachable",
        },
        4 => "MaxThroughput",
        5 => match code {
            0 => "NetRedirected",
            1 => "HostRedirected",
            2 => "TOSRedirectedForNet",
            3 => "TOSRedirectedForHost",
            _ => "Redirected",
        },
        8 => "EchoRequest",
        9 => "GWReply",
        10 => "GWRequest",
        11 => match code {
            0 => "TTLReachedDuringTransit",
            1 => "TTLReachedDuringReassembly",
            _ => "TTLReached",
        },
        12 => match code {
            0 => "BadIPHeader",
            1 => "MissingRequiredOption",
            _ => "SyntaxError",
        },
        13 => "TSRequest",
        14 => "TSReply",
        15 => "InfoRequest",
        16 => "InfoReply",
        17 => "NetMaskRequest",
        18 => "NetMaskReply",
        _ => "UNKNOWN",
    }
}

/// Endpoints of the datagram quoted in an error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotedDatagram {
    pub protocol: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    /// Transport ports, when the quote is TCP or UDP and long enough
    pub ports: Option<(u16, u16)>,
}

impl QuotedDatagram {
    /// Read the quoted IP header at the start of `body`. Anything short or
    /// inconsistent yields `None`; a bad quote never fails the ICMP layer.
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < QUOTED_IP_MIN_LEN {
            return None;
        }
        let ihl = usize::from(body[0] & 0x0f) * 4;
        if ihl < QUOTED_IP_MIN_LEN || ihl > body.len() {
            return None;
        }
        let protocol = body[9];
        let src = Ipv4Addr::new(body[12], body[13], body[14], body[15]);
        let dst = Ipv4Addr::new(body[16], body[17], body[18], body[19]);
        let ports = match (protocol, body.get(ihl..ihl + 4)) {
            (6 | 17, Some(p)) => Some((
                u16::from_be_bytes([p[0], p[1]]),
                u16::from_be_bytes([p[2], p[3]]),
            )),
            _ => None,
        };
        Some(Self {
            protocol,
            src,
            dst,
            ports,
        })
    }
}

impl Decoder for IcmpDecoder {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn display_name(&self) -> &'static str {
        "ICMP"
    }

    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        _cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        let header = frame.require(self.name(), HEADER_LEN)?;
        let icmp_type = header[0];
        let code = header[1];

        let mut layer = Layer::new(HEADER_LEN, frame.wire_len() - HEADER_LEN)
            .field("type", FieldValue::UInt8(icmp_type))
            .field("code", FieldValue::UInt8(code))
            .field("type_name", FieldValue::Str(type_name(icmp_type, code)))
            .field(
                "checksum",
                FieldValue::UInt16(u16::from_be_bytes([header[2], header[3]])),
            );

        if has_identifier(icmp_type) {
            layer.push("id", FieldValue::UInt16(u16::from_be_bytes([header[4], header[5]])));
            layer.push("seq", FieldValue::UInt16(u16::from_be_bytes([header[6], header[7]])));
        }

        if is_error(icmp_type) {
            let body = frame.clipped(HEADER_LEN, frame.wire_len());
            if let Some(quoted) = QuotedDatagram::parse(body) {
                layer.push("err_proto", FieldValue::UInt8(quoted.protocol));
                layer.push("err_src", FieldValue::IpAddr(IpAddr::V4(quoted.src)));
                layer.push("err_dst", FieldValue::IpAddr(IpAddr::V4(quoted.dst)));
                if let Some((sport, dport)) = quoted.ports {
                    layer.push("err_src_port", FieldValue::UInt16(sport));
                    layer.push("err_dst_port", FieldValue::UInt16(dport));
                }
            }
        }

        Ok(layer)
    }
}
