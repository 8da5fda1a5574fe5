//! DNS decoder (also used for mDNS, LLMNR and NetBIOS name service).
//!
//! Only the header and the question section are decoded. The whole message
//! is reported as header; answers are not walked.

use compact_str::CompactString;

use super::{Decoder, FieldValue, Layer, LayerContext};
use crate::dispatch::{Descriptor, Frame};
use crate::error::DecodeError;

/// Well-known DNS port.
pub const DNS_PORT: u16 = 53;
/// NetBIOS name service port.
pub const NBNS_PORT: u16 = 137;
/// Multicast DNS port.
pub const MDNS_PORT: u16 = 5353;
/// Link-local multicast name resolution port.
pub const LLMNR_PORT: u16 = 5355;

const HEADER_LEN: usize = 12;
/// More records than this in any section is taken as garbage.
const MAX_SECTION_COUNT: u16 = 255;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
/// Bound on compression pointers followed while reading one name.
pub const MAX_POINTER_FOLLOWS: usize = 16;

const FLAG_QR: u16 = 0x8000;
const FLAG_RCODE: u16 = 0x000f;

const TYPE_NB: u16 = 0x0020;
const TYPE_SRV: u16 = 0x0021;

#[derive(Debug, Clone, Copy, Default)]
pub struct DnsDecoder;

pub fn type_name(qtype: u16) -> Option<&'static str> {
    Some(match qtype {
        0 => "UNSET",
        1 => "A",
        2 => "NS",
        3 => "MD",
        4 => "MF",
        5 => "CNAME",
        6 => "SOA",
        7 => "MB",
        8 => "MG",
        9 => "MR",
        10 => "NULL",
        11 => "WKS",
        12 => "PTR",
        13 => "HINFO",
        14 => "MINFO",
        15 => "MX",
        16 => "TXT",
        0x1c => "AAAA",
        TYPE_NB => "NB",
        TYPE_SRV => "SRV",
        0x26 => "A6",
        0xfb => "IXFR",
        0xfc => "AXFR",
        0xff => "ANY",
        _ => return None,
    })
}

pub fn class_name(class: u16) -> Option<&'static str> {
    Some(match class {
        0 => "UNSET",
        1 => "IN",
        2 => "CS",
        3 => "CH",
        4 => "HS",
        255 => "ANY",
        _ => return None,
    })
}

/// Bounds-checked reader over one message.
struct Message<'f> {
    frame: Frame<'f>,
}

impl<'f> Message<'f> {
    fn byte(&self, pos: usize) -> Result<u8, DecodeError> {
        Ok(self.frame.require("dns", pos + 1)?[pos])
    }

    fn u16(&self, pos: usize) -> Result<u16, DecodeError> {
        let bytes = self.frame.require("dns", pos + 2)?;
        Ok(u16::from_be_bytes([bytes[pos], bytes[pos + 1]]))
    }

    fn slice(&self, pos: usize, len: usize) -> Result<&'f [u8], DecodeError> {
        Ok(&self.frame.require("dns", pos + len)?[pos..])
    }

    /// Read the name starting at `start`, returning it and the number of
    /// bytes it occupies at `start`.
    ///
    /// Compression pointers must point strictly before the label they are
    /// found in, and at most [`MAX_POINTER_FOLLOWS`] are followed.
    fn name(&self, start: usize) -> Result<(CompactString, usize), DecodeError> {
        let mut name = CompactString::default();
        let mut pos = start;
        let mut consumed = None;
        let mut follows = 0;

        loop {
            let len = self.byte(pos)?;
            if len & 0xc0 == 0xc0 {
                let target = usize::from(self.u16(pos)? & 0x3fff);
                if target >= pos {
                    return Err(DecodeError::malformed(
                        "dns",
                        format!("compression pointer at {pos} does not point backwards"),
                    ));
                }
                follows += 1;
                if follows > MAX_POINTER_FOLLOWS {
                    return Err(DecodeError::malformed("dns", "too many compression pointers"));
                }
                consumed.get_or_insert_with(|| pos + 2 - start);
                pos = target;
                continue;
            }
            if len & 0xc0 != 0 {
                return Err(DecodeError::malformed("dns", format!("reserved label type {len:#04x}")));
            }

            let len = usize::from(len);
            if len == 0 {
                let consumed = consumed.unwrap_or_else(|| pos + 1 - start);
                return Ok((name, consumed));
            }
            if len > MAX_LABEL_LEN {
                return Err(DecodeError::malformed("dns", format!("label of {len} bytes")));
            }

            let label = self.slice(pos + 1, len)?;
            if name.len() + len + 1 > MAX_NAME_LEN {
                return Err(DecodeError::malformed("dns", "name longer than 255 bytes"));
            }
            if !name.is_empty() {
                name.push('.');
            }
            name.extend(label.iter().map(|&b| char::from(b)));
            pos += 1 + len;
        }
    }
}

/// Whether the first label of `name` is a first-level encoded NetBIOS name.
pub fn looks_like_netbios(name: &str) -> bool {
    let label = name.split('.').next().unwrap_or_default();
    label.len() >= 32 && label.bytes().all(|b| (b'A'..=b'P').contains(&b))
}

/// Undo NetBIOS first-level encoding of the first label, keeping any scope
/// suffix as is.
pub fn decode_netbios(name: &str) -> CompactString {
    let (label, scope) = match name.find('.') {
        Some(dot) => name.split_at(dot),
        None => (name, ""),
    };
    let mut out = CompactString::default();
    let mut rest = label.as_bytes();
    while let [hi @ b'A'..=b'P', lo @ b'A'..=b'P', tail @ ..] = rest {
        out.push(char::from(((hi - b'A') << 4) | (lo - b'A')));
        rest = tail;
    }
    out.push_str(&label[label.len() - rest.len()..]);
    out.push_str(scope);
    out
}

impl Decoder for DnsDecoder {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn display_name(&self) -> &'static str {
        "DNS"
    }

    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        _cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        let header = frame.require(self.name(), HEADER_LEN)?;
        let word = |i: usize| u16::from_be_bytes([header[i], header[i + 1]]);

        let transaction_id = word(0);
        let flags = word(2);
        let counts = [word(4), word(6), word(8), word(10)];
        if let Some(count) = counts.iter().find(|&&c| c > MAX_SECTION_COUNT) {
            return Err(DecodeError::malformed(
                self.name(),
                format!("improbable record count {count}"),
            ));
        }

        let mut layer = Layer::new(0, 0)
            .field("transaction_id", FieldValue::UInt16(transaction_id))
            .field("flags", FieldValue::UInt16(flags))
            .field("query", FieldValue::Bool(flags & FLAG_QR == 0))
            .field("error_code", FieldValue::UInt8((flags & FLAG_RCODE) as u8))
            .field("questions", FieldValue::UInt16(counts[0]))
            .field("answers", FieldValue::UInt16(counts[1]))
            .field("authorities", FieldValue::UInt16(counts[2]))
            .field("additionals", FieldValue::UInt16(counts[3]));

        let message = Message { frame };
        let mut pos = HEADER_LEN;
        for q in 0..counts[0] {
            let (name, len) = message.name(pos)?;
            pos += len;
            let qtype = message.u16(pos)?;
            let qclass = message.u16(pos + 2)?;
            pos += 4;

            if q > 0 {
                continue;
            }
            let name = if matches!(qtype, TYPE_NB | TYPE_SRV) && looks_like_netbios(&name) {
                decode_netbios(&name)
            } else {
                name
            };
            layer.push("name", FieldValue::OwnedString(name));
            layer.push("request_type", FieldValue::UInt16(qtype));
            layer.push("dns_class", FieldValue::UInt16(qclass));
        }

        // Header and questions are the decoded part; resource records are
        // left as an opaque payload, so a capture cut inside them keeps
        // this layer.
        layer.head_len = pos;
        layer.payload_len = frame.wire_len().saturating_sub(pos);
        Ok(layer)
    }

    fn describe(&self, node: &Descriptor<'_>) -> String {
        let get = |name| node.field(name).and_then(FieldValue::as_u64).unwrap_or(0);
        let query = node.field("query").and_then(FieldValue::as_bool).unwrap_or(true);
        let request_type = get("request_type") as u16;
        let dns_class = get("dns_class") as u16;
        format!(
            "{}: {}, tx_id={}, err_code={}, request_type={}, dns_class={}, name={}",
            self.display_name(),
            if query { "QUERY" } else { "ANSWER" },
            get("transaction_id"),
            get("error_code"),
            type_name(request_type)
                .map_or_else(|| format!("UNKNOWN({request_type:#06x})"), str::to_owned),
            class_name(dns_class)
                .map_or_else(|| format!("UNKNOWN({dns_class:#06x})"), str::to_owned),
            node.field("name").and_then(FieldValue::as_str).unwrap_or(""),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::test_utils::TestBench;

    fn field<'a>(layer: &'a Layer<'_>, name: &str) -> Option<&'a FieldValue<'a>> {
        layer.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    fn query(id: u16, labels: &[&str], qtype: u16) -> Vec<u8> {
        let mut msg = Vec::new();
        msg.extend_from_slice(&id.to_be_bytes());
        msg.extend_from_slice(&[0x01, 0x00]); // Standard query, RD
        msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        for label in labels {
            msg.push(label.len() as u8);
            msg.extend_from_slice(label.as_bytes());
        }
        msg.push(0);
        msg.extend_from_slice(&qtype.to_be_bytes());
        msg.extend_from_slice(&[0x00, 0x01]); // IN
        msg
    }

    #[test]
    fn test_parse_query() {
        let msg = query(0x1234, &["www", "example", "com"], 1);

        let bench = TestBench::new();
        let layer = bench.parse(DnsDecoder, Frame::complete(&msg)).unwrap();

        assert_eq!(layer.head_len, msg.len());
        assert_eq!(layer.payload_len, 0);
        assert_eq!(field(&layer, "transaction_id").and_then(FieldValue::as_u64), Some(0x1234));
        assert_eq!(field(&layer, "query").and_then(FieldValue::as_bool), Some(true));
        assert_eq!(
            field(&layer, "name").and_then(FieldValue::as_str),
            Some("www.example.com")
        );
        assert_eq!(field(&layer, "request_type").and_then(FieldValue::as_u64), Some(1));
        assert_eq!(field(&layer, "dns_class").and_then(FieldValue::as_u64), Some(1));
    }

    #[test]
    fn test_improbable_counts_are_malformed() {
        let mut msg = query(1, &["a"], 1);
        msg[6] = 0x01; // 256 answers
        let bench = TestBench::new();
        assert!(matches!(
            bench.parse(DnsDecoder, Frame::complete(&msg)),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_long_label_is_malformed() {
        let long = "x".repeat(64);
        let msg = query(1, &[&long], 1);
        let bench = TestBench::new();
        assert!(matches!(
            bench.parse(DnsDecoder, Frame::complete(&msg)),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_cut_question_is_truncated() {
        let msg = query(1, &["example", "org"], 1);
        let bench = TestBench::new();
        assert!(matches!(
            bench.parse(DnsDecoder, Frame::new(&msg[..16], msg.len())),
            Err(DecodeError::Truncated { .. })
        ));
        // The same bytes as the whole message are a protocol violation.
        assert!(matches!(
            bench.parse(DnsDecoder, Frame::complete(&msg[..16])),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_compression_pointers() {
        // Two questions, the second pointing back into the first name.
        let mut msg = query(7, &["mail", "example", "com"], 15);
        msg[5] = 2;
        msg.extend_from_slice(&[3, b'w', b'w', b'w', 0xc0, 17]); // www + ptr to "example.com"
        msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);

        let message = Message { frame: Frame::complete(&msg) };
        let (name, len) = message.name(34).unwrap();
        assert_eq!(name, "www.example.com");
        assert_eq!(len, 6);

        let bench = TestBench::new();
        let layer = bench.parse(DnsDecoder, Frame::complete(&msg)).unwrap();
        assert_eq!(field(&layer, "name").and_then(FieldValue::as_str), Some("mail.example.com"));
        assert_eq!(field(&layer, "request_type").and_then(FieldValue::as_u64), Some(15));
    }

    #[test]
    fn test_answers_are_payload() {
        let mut msg = query(9, &["example", "org"], 1);
        msg[7] = 1; // One answer
        let question_end = msg.len();
        msg.extend_from_slice(&[0xc0, 12, 0, 1, 0, 1, 0, 0, 0, 60, 0, 4, 10, 0, 0, 1]);

        let bench = TestBench::new();
        let layer = bench
            .parse(DnsDecoder, Frame::new(&msg[..question_end + 2], msg.len()))
            .unwrap();
        assert_eq!(layer.head_len, question_end);
        assert_eq!(layer.payload_len, msg.len() - question_end);
        assert_eq!(field(&layer, "name").and_then(FieldValue::as_str), Some("example.org"));
    }

    #[test]
    fn test_forward_and_looping_pointers_are_malformed() {
        let mut msg = query(1, &[], 1);
        msg.truncate(HEADER_LEN);
        msg.extend_from_slice(&[0xc0, 20, 0, 1, 0, 1, 0, 0, 0]);
        let bench = TestBench::new();
        assert!(matches!(
            bench.parse(DnsDecoder, Frame::complete(&msg)),
            Err(DecodeError::Malformed { .. })
        ));

        // A pointer to itself never moves backwards.
        let mut msg = query(1, &[], 1);
        msg.truncate(HEADER_LEN);
        msg.extend_from_slice(&[0xc0, HEADER_LEN as u8, 0, 1, 0, 1]);
        assert!(bench.parse(DnsDecoder, Frame::complete(&msg)).is_err());
    }

    #[test]
    fn test_pointer_chain_is_bounded() {
        // Each name at offset 12 + 2i points to the one before it.
        let mut msg = vec![0u8; HEADER_LEN];
        msg.push(0); // Root name at offset 12
        for i in 0..20u8 {
            let target = if i == 0 { 12 } else { 13 + 2 * (i - 1) };
            msg.extend_from_slice(&[0xc0, target]);
        }
        let message = Message { frame: Frame::complete(&msg) };
        assert!(message.name(13 + 2 * 5).is_ok());
        assert!(matches!(
            message.name(13 + 2 * 19),
            Err(DecodeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_netbios_name() {
        // "FHEPFCELEHFCEPFFFACACACACACACACA" is "WORKGROUP" padded with spaces.
        let encoded = "FHEPFCELEHFCEPFFFACACACACACACACA";
        assert!(looks_like_netbios(encoded));
        assert!(!looks_like_netbios("www"));
        assert_eq!(decode_netbios(encoded).trim_end(), "WORKGROUP");

        let msg = query(2, &[encoded, "lan"], TYPE_NB);
        let bench = TestBench::new();
        let layer = bench.parse(DnsDecoder, Frame::complete(&msg)).unwrap();
        assert_eq!(
            field(&layer, "name").and_then(FieldValue::as_str),
            Some("WORKGROUP       .lan")
        );
    }

    #[test]
    fn test_describe() {
        let msg = query(42, &["a", "b"], 28);
        let bench = TestBench::new();
        let tree = bench.dissect_one(DnsDecoder, Frame::complete(&msg));
        let text = tree.root().unwrap().describe();
        assert_eq!(
            text,
            "DNS: QUERY, tx_id=42, err_code=0, request_type=AAAA, dns_class=IN, name=a.b"
        );
    }
}
