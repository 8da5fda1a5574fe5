//! FTP control channel and the data connections it announces.
//!
//! Control text is reassembled into lines per direction. Passive mode
//! replies and `PORT` commands declare the data connection in advance, so
//! when it opens it is bound to an [`FtpDataDecoder`] object instead of
//! being resolved by port.

use std::net::{IpAddr, Ipv4Addr};

use bytes::Buf;
use compact_str::CompactString;
use tracing::debug;

use super::tcp::IP_PROTO_TCP;
use super::{Decoder, FieldValue, Layer, LayerContext, Parser};
use crate::dispatch::{Descriptor, Frame};
use crate::error::DecodeError;
use crate::mux::{Endpoint, Expectation};
use crate::scanner::{TokenScanner, COMMAS, LINES, SPACES};

/// FTP control port.
pub const FTP_PORT: u16 = 21;

/// Longest partial line kept between segments.
const MAX_LINE_LEN: usize = 4096;
const PASSIVE_MARKER: &[u8] = b"Entering Passive Mode";

#[derive(Debug, Clone, Copy, Default)]
pub struct FtpDecoder;

/// Payload of an announced data connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct FtpDataDecoder;

/// What the complete lines of one segment said.
#[derive(Debug, Default)]
struct Exchange {
    lines: u16,
    command: Option<CompactString>,
    reply_code: Option<u16>,
    /// Passive mode address announced by the server
    passive: Option<(Ipv4Addr, u16)>,
    /// Active mode address announced by the client
    active: Option<(Ipv4Addr, u16)>,
}

impl Exchange {
    fn line(&mut self, text: &[u8]) {
        self.lines = self.lines.saturating_add(1);
        if text.len() >= 3 && text[..3].iter().all(u8::is_ascii_digit) {
            let (code, _) = crate::scanner::parse_u64(&text[..3], 10);
            self.reply_code = Some(code as u16);
            if let Some(addr) = passive_address(text) {
                self.passive = Some(addr);
            }
            return;
        }

        let words = TokenScanner::new(text, SPACES);
        let mut verb = CompactString::from_utf8_lossy(words.token());
        verb.make_ascii_uppercase();
        if verb == "PORT" {
            self.active = host_port(words.rest());
        }
        self.command = Some(verb);
    }
}

/// `h1,h2,h3,h4,p1,p2` as an address and port.
pub fn host_port(text: &[u8]) -> Option<(Ipv4Addr, u16)> {
    let mut fields = TokenScanner::new(text, COMMAS);
    let mut parts = [0u8; 6];
    for (i, part) in parts.iter_mut().enumerate() {
        if i > 0 {
            if fields.delim_len() == 0 {
                return None;
            }
            fields.next_token();
        }
        let (value, end) = fields.parse_int(10);
        if end == 0 {
            return None;
        }
        *part = u8::try_from(value).ok()?;
    }
    let addr = Ipv4Addr::new(parts[0], parts[1], parts[2], parts[3]);
    Some((addr, u16::from_be_bytes([parts[4], parts[5]])))
}

/// The address in `... Entering Passive Mode (h1,h2,h3,h4,p1,p2)`.
fn passive_address(line: &[u8]) -> Option<(Ipv4Addr, u16)> {
    let at = line
        .windows(PASSIVE_MARKER.len())
        .position(|w| w == PASSIVE_MARKER)?;
    let mut rest = &line[at + PASSIVE_MARKER.len()..];
    if let Some(stripped) = rest.strip_prefix(b".") {
        rest = stripped;
    }
    let blanks = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
    let rest = rest[blanks..].strip_prefix(b"(")?;
    host_port(rest)
}

impl FtpDecoder {
    fn announce(&self, cx: &LayerContext<'_, '_>, ours: Endpoint, theirs: Endpoint) {
        let data = cx.domain().alloc(Parser::new(FtpDataDecoder.into()));
        debug!(%ours, %theirs, "ftp data connection announced");
        cx.expect(Expectation::new(IP_PROTO_TCP, ours, theirs, data));
    }
}

impl Decoder for FtpDecoder {
    fn name(&self) -> &'static str {
        "ftp"
    }

    fn display_name(&self) -> &'static str {
        "FTP"
    }

    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        let tcp = cx.ancestor("tcp");
        let way = match tcp.and_then(|t| t.field("from_initiator")?.as_bool()) {
            Some(true) => 0,
            Some(false) => 1,
            None => usize::from(cx.way() & 1),
        };

        let mut exchange = Exchange::default();
        {
            let mut session = cx.session();
            let stream = &mut session.streams[way];
            if frame.is_truncated() {
                // A gap in the stream; resynchronize on the next segment.
                stream.clear();
            } else {
                stream.extend_from_slice(frame.captured());
                let consumed = {
                    let mut lines = TokenScanner::new(&stream[..], LINES);
                    while lines.delim_len() > 0 {
                        exchange.line(lines.token());
                        lines.next_token();
                    }
                    lines.tot_len() - lines.rem_len()
                };
                stream.advance(consumed);
                if stream.len() > MAX_LINE_LEN {
                    stream.clear();
                }
            }
        }

        let mut layer = Layer::new(0, frame.wire_len())
            .field("lines", FieldValue::UInt16(exchange.lines));
        if let Some(command) = exchange.command {
            layer.push("command", FieldValue::OwnedString(command));
        }
        if let Some(code) = exchange.reply_code {
            layer.push("reply_code", FieldValue::UInt16(code));
        }

        let endpoints = cx.ip_endpoints();
        if let (Some((addr, port)), Some((_, client))) = (exchange.passive, endpoints) {
            // The client connects to the announced address.
            self.announce(cx, Endpoint::exact(IpAddr::V4(addr), port), Endpoint::host(client));
            layer.push("data_addr", FieldValue::IpAddr(IpAddr::V4(addr)));
            layer.push("data_port", FieldValue::UInt16(port));
        }
        let control_port = tcp.and_then(|t| t.field("dst_port")?.as_u64());
        if let (Some((addr, port)), Some((_, server)), Some(control)) =
            (exchange.active, endpoints, control_port)
        {
            // The server connects back from the port below its control port.
            let server_port = (control as u16).wrapping_sub(1);
            self.announce(
                cx,
                Endpoint::exact(IpAddr::V4(addr), port),
                Endpoint::exact(server, server_port),
            );
            layer.push("data_addr", FieldValue::IpAddr(IpAddr::V4(addr)));
            layer.push("data_port", FieldValue::UInt16(port));
        }

        Ok(layer)
    }

    fn raw_view<'f>(&self, node: &Descriptor<'f>) -> &'f [u8] {
        node.payload()
    }
}

impl Decoder for FtpDataDecoder {
    fn name(&self) -> &'static str {
        "ftp-data"
    }

    fn display_name(&self) -> &'static str {
        "FTP-DATA"
    }

    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        _cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        Ok(Layer::new(0, frame.wire_len())
            .field("bytes", FieldValue::UInt64(frame.wire_len() as u64)))
    }

    fn raw_view<'f>(&self, node: &Descriptor<'f>) -> &'f [u8] {
        node.payload()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ParseOutcome;
    use crate::protocol::test_utils::{tcp_frame, TestBench};

    const CLIENT: [u8; 4] = [192, 168, 0, 10];
    const SERVER: [u8; 4] = [192, 168, 0, 1];

    fn ftp_node<'a, 'f>(outcome: &'a ParseOutcome<'f>) -> &'a Descriptor<'f> {
        outcome.tree().find("ftp").expect("ftp layer")
    }

    #[test]
    fn test_host_port() {
        assert_eq!(
            host_port(b"10,0,0,7,4,1"),
            Some((Ipv4Addr::new(10, 0, 0, 7), 1025))
        );
        assert_eq!(host_port(b"10,0,0,7,4"), None);
        assert_eq!(host_port(b"10,0,0,256,4,1"), None);
        assert_eq!(host_port(b"10,,0,7,4,1"), None);
        assert_eq!(
            passive_address(b"227 Entering Passive Mode. (1,2,3,4,0,21)."),
            Some((Ipv4Addr::new(1, 2, 3, 4), 21))
        );
    }

    #[test]
    fn test_lines_split_across_segments() {
        let bench = TestBench::with_defaults();

        let first = tcp_frame((CLIENT, 40000), (SERVER, 21), b"USER anon");
        let outcome = bench.dissect(&first);
        let ftp = ftp_node(&outcome);
        assert_eq!(ftp.field("lines").and_then(FieldValue::as_u64), Some(0));
        assert!(ftp.field("command").is_none());

        let second = tcp_frame((CLIENT, 40000), (SERVER, 21), b"ymous\r\nPASS x\r\n");
        let outcome = bench.dissect(&second);
        let ftp = ftp_node(&outcome);
        assert_eq!(ftp.field("lines").and_then(FieldValue::as_u64), Some(2));
        assert_eq!(ftp.field("command").and_then(FieldValue::as_str), Some("PASS"));
    }

    #[test]
    fn test_passive_reply_binds_data_connection() {
        let bench = TestBench::with_defaults();

        bench.dissect(&tcp_frame((CLIENT, 40000), (SERVER, 21), b"PASV\r\n"));
        let reply = tcp_frame(
            (SERVER, 21),
            (CLIENT, 40000),
            b"227 Entering Passive Mode (192,168,0,1,195,80).\r\n",
        );
        let outcome = bench.dissect(&reply);
        let ftp = ftp_node(&outcome);
        assert_eq!(ftp.field("reply_code").and_then(FieldValue::as_u64), Some(227));
        assert_eq!(ftp.field("data_port").and_then(FieldValue::as_u64), Some(50000));
        assert_eq!(bench.muxer.expectations().len(), 1);

        let data = tcp_frame((CLIENT, 40001), (SERVER, 50000), b"file contents");
        let outcome = bench.dissect(&data);
        assert!(matches!(outcome, ParseOutcome::Parsed(_)));
        assert_eq!(outcome.tree().protocols(), ["ethernet", "ipv4", "tcp", "ftp-data"]);
        assert!(bench.muxer.expectations().is_empty());
    }

    #[test]
    fn test_port_command_expects_server_connection() {
        let bench = TestBench::with_defaults();

        let command = tcp_frame((CLIENT, 40000), (SERVER, 21), b"PORT 192,168,0,10,7,208\r\n");
        let outcome = bench.dissect(&command);
        assert_eq!(
            ftp_node(&outcome).field("command").and_then(FieldValue::as_str),
            Some("PORT")
        );

        // Some other host does not match.
        let stray = tcp_frame(([10, 9, 9, 9], 20), (CLIENT, 2000), b"x");
        assert_eq!(
            bench.dissect(&stray).tree().protocols(),
            ["ethernet", "ipv4", "tcp"]
        );

        let data = tcp_frame((SERVER, 20), (CLIENT, 2000), b"listing");
        assert_eq!(
            bench.dissect(&data).tree().protocols(),
            ["ethernet", "ipv4", "tcp", "ftp-data"]
        );
    }

    #[test]
    fn test_oversized_partial_line_is_dropped() {
        let bench = TestBench::with_defaults();
        let junk = vec![b'a'; MAX_LINE_LEN + 1];
        let oversized = tcp_frame((CLIENT, 40000), (SERVER, 21), &junk);
        let outcome = bench.dissect(&oversized);
        assert_eq!(
            ftp_node(&outcome).field("lines").and_then(FieldValue::as_u64),
            Some(0)
        );

        let noop = tcp_frame((CLIENT, 40000), (SERVER, 21), b"NOOP\r\n");
        let outcome = bench.dissect(&noop);
        assert_eq!(
            ftp_node(&outcome).field("command").and_then(FieldValue::as_str),
            Some("NOOP")
        );
    }
}
