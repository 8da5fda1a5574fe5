//! Test utilities for decoders.
//!
//! Provides packet builders and a [`TestBench`] that runs a decoder with the
//! same services the dispatch chain hands it.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use super::{
    register_defaults, BuiltinDecoder, Decoder, FieldList, Layer, LayerContext, NextLayer, Parser,
};
use crate::dispatch::{Descriptor, DescriptorTree, DispatchChain, Frame, ParseOutcome};
use crate::error::DecodeError;
use crate::flow::FlowTracker;
use crate::mux::{KeyRange, Muxer, TransportKind};
use crate::protocol::{FieldValue, Ipv4Decoder};
use crate::reclaim::{ReclaimDomain, Ref};

/// Builder for constructing Ethernet frames.
#[derive(Debug, Clone)]
pub struct EthernetBuilder {
    src_mac: [u8; 6],
    dst_mac: [u8; 6],
    ethertype: u16,
    payload: Vec<u8>,
}

impl Default for EthernetBuilder {
    fn default() -> Self {
        Self {
            src_mac: [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            dst_mac: [0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb],
            ethertype: 0x0800, // IPv4
            payload: Vec::new(),
        }
    }
}

impl EthernetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.ethertype = ethertype;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(14 + self.payload.len());
        frame.extend_from_slice(&self.dst_mac);
        frame.extend_from_slice(&self.src_mac);
        frame.extend_from_slice(&self.ethertype.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// Builder for constructing IPv4 packets.
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    ttl: u8,
    protocol: u8,
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    payload: Vec<u8>,
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self {
            ttl: 64,
            protocol: 6, // TCP
            src_ip: [192, 168, 1, 1],
            dst_ip: [192, 168, 1, 2],
            payload: Vec::new(),
        }
    }
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn tcp(self) -> Self {
        self.protocol(6)
    }

    pub fn udp(self) -> Self {
        self.protocol(17)
    }

    pub fn icmp(self) -> Self {
        self.protocol(1)
    }

    pub fn src_ip(mut self, ip: [u8; 4]) -> Self {
        self.src_ip = ip;
        self
    }

    pub fn dst_ip(mut self, ip: [u8; 4]) -> Self {
        self.dst_ip = ip;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let total_length = 20 + self.payload.len() as u16;
        let mut packet = Vec::with_capacity(usize::from(total_length));

        packet.push(0x45); // Version 4, IHL 5
        packet.push(0x00);
        packet.extend_from_slice(&total_length.to_be_bytes());
        packet.extend_from_slice(&[0x00, 0x01]); // Identification
        packet.extend_from_slice(&[0x40, 0x00]); // Don't fragment
        packet.push(self.ttl);
        packet.push(self.protocol);
        packet.extend_from_slice(&[0x00, 0x00]); // Checksum (not calculated)
        packet.extend_from_slice(&self.src_ip);
        packet.extend_from_slice(&self.dst_ip);
        packet.extend_from_slice(&self.payload);
        packet
    }
}

/// Builder for constructing TCP segments.
#[derive(Debug, Clone)]
pub struct TcpBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: Vec<u8>,
}

impl Default for TcpBuilder {
    fn default() -> Self {
        Self {
            src_port: 12345,
            dst_port: 80,
            seq: 1,
            ack: 0,
            flags: 0x18, // PSH, ACK
            payload: Vec::new(),
        }
    }
}

impl TcpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn syn(mut self) -> Self {
        self.flags = 0x02;
        self
    }

    pub fn syn_ack(mut self) -> Self {
        self.flags = 0x12;
        self.ack = 1;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut segment = Vec::with_capacity(20 + self.payload.len());
        segment.extend_from_slice(&self.src_port.to_be_bytes());
        segment.extend_from_slice(&self.dst_port.to_be_bytes());
        segment.extend_from_slice(&self.seq.to_be_bytes());
        segment.extend_from_slice(&self.ack.to_be_bytes());
        segment.push(0x50); // Data offset 5
        segment.push(self.flags);
        segment.extend_from_slice(&0xffffu16.to_be_bytes());
        segment.extend_from_slice(&[0x00, 0x00]); // Checksum
        segment.extend_from_slice(&[0x00, 0x00]); // Urgent pointer
        segment.extend_from_slice(&self.payload);
        segment
    }
}

/// Builder for constructing UDP datagrams.
#[derive(Debug, Clone)]
pub struct UdpBuilder {
    src_port: u16,
    dst_port: u16,
    payload: Vec<u8>,
}

impl Default for UdpBuilder {
    fn default() -> Self {
        Self {
            src_port: 49152,
            dst_port: 53,
            payload: Vec::new(),
        }
    }
}

impl UdpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let length = 8 + self.payload.len() as u16;
        let mut datagram = Vec::with_capacity(usize::from(length));
        datagram.extend_from_slice(&self.src_port.to_be_bytes());
        datagram.extend_from_slice(&self.dst_port.to_be_bytes());
        datagram.extend_from_slice(&length.to_be_bytes());
        datagram.extend_from_slice(&[0x00, 0x00]);
        datagram.extend_from_slice(&self.payload);
        datagram
    }
}

/// Builder for constructing ICMP messages.
#[derive(Debug, Clone)]
pub struct IcmpBuilder {
    icmp_type: u8,
    code: u8,
    rest: [u8; 4],
    payload: Vec<u8>,
}

impl IcmpBuilder {
    pub fn new(icmp_type: u8, code: u8) -> Self {
        Self {
            icmp_type,
            code,
            rest: [0; 4],
            payload: Vec::new(),
        }
    }

    pub fn echo_request(id: u16, seq: u16) -> Self {
        let mut builder = Self::new(8, 0);
        builder.rest[..2].copy_from_slice(&id.to_be_bytes());
        builder.rest[2..].copy_from_slice(&seq.to_be_bytes());
        builder
    }

    pub fn payload(mut self, payload: &[u8]) -> Self {
        self.payload = payload.to_vec();
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut message = vec![self.icmp_type, self.code, 0x00, 0x00];
        message.extend_from_slice(&self.rest);
        message.extend_from_slice(&self.payload);
        message
    }
}

/// Ethernet/IPv4/TCP frame from `src` to `dst`.
pub fn tcp_frame(src: ([u8; 4], u16), dst: ([u8; 4], u16), payload: &[u8]) -> Vec<u8> {
    let segment = TcpBuilder::new()
        .src_port(src.1)
        .dst_port(dst.1)
        .payload(payload)
        .build();
    let packet = Ipv4Builder::new()
        .tcp()
        .src_ip(src.0)
        .dst_ip(dst.0)
        .payload(segment)
        .build();
    EthernetBuilder::new().payload(packet).build()
}

/// Ethernet/IPv4/UDP frame from `src` to `dst`.
pub fn udp_frame(src: ([u8; 4], u16), dst: ([u8; 4], u16), payload: &[u8]) -> Vec<u8> {
    let datagram = UdpBuilder::new()
        .src_port(src.1)
        .dst_port(dst.1)
        .payload(payload)
        .build();
    let packet = Ipv4Builder::new()
        .udp()
        .src_ip(src.0)
        .dst_ip(dst.0)
        .payload(datagram)
        .build();
    EthernetBuilder::new().payload(packet).build()
}

/// Decoder with a fixed header length, for exercising the machinery around
/// decoders.
#[derive(Debug, Clone)]
pub struct FixedDecoder {
    name: &'static str,
    head_len: usize,
    next: Option<(TransportKind, u32)>,
    fail: bool,
}

impl FixedDecoder {
    pub fn new(name: &'static str, head_len: usize) -> Self {
        Self {
            name,
            head_len,
            next: None,
            fail: false,
        }
    }

    /// Continue through the muxer with `key` after this layer.
    pub fn then(mut self, kind: TransportKind, key: u32) -> Self {
        self.next = Some((kind, key));
        self
    }

    /// Report every packet as malformed.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

impl Decoder for FixedDecoder {
    fn name(&self) -> &'static str {
        self.name
    }

    fn display_name(&self) -> &'static str {
        self.name
    }

    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        _cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        if self.fail {
            return Err(DecodeError::malformed(self.name, "always fails"));
        }
        let header = frame.require(self.name, self.head_len)?;
        let next = match self.next {
            Some((kind, key)) => NextLayer::mux(kind, key),
            None => NextLayer::Stop,
        };
        Ok(Layer::new(self.head_len, frame.wire_len() - self.head_len)
            .field("head", FieldValue::Bytes(header))
            .next(next))
    }
}

impl From<FixedDecoder> for BuiltinDecoder {
    fn from(d: FixedDecoder) -> Self {
        BuiltinDecoder::Custom(Arc::new(d))
    }
}

/// A decoder object for `decoder` allocated in `domain`.
pub fn custom_parser(domain: &ReclaimDomain, decoder: impl Decoder + 'static) -> Ref<Parser> {
    let decoder: Arc<dyn Decoder> = Arc::new(decoder);
    domain.alloc(Parser::new(decoder.into()))
}

/// The services a decoder runs with, outside of an engine.
pub struct TestBench {
    pub domain: ReclaimDomain,
    pub muxer: Muxer,
    pub flows: FlowTracker,
    clock: AtomicI64,
}

impl TestBench {
    /// A bench with an empty muxer.
    pub fn new() -> Self {
        let domain = ReclaimDomain::manual();
        Self {
            muxer: Muxer::new(domain.clone()),
            flows: FlowTracker::new(domain.clone()),
            domain,
            clock: AtomicI64::new(0),
        }
    }

    /// A bench with the default bindings registered.
    pub fn with_defaults() -> Self {
        let bench = Self::new();
        register_defaults(&bench.muxer).unwrap();
        bench
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1_000, Ordering::Relaxed)
    }

    /// Run `decoder` on `frame` as the first layer of a packet.
    pub fn parse<'f>(
        &self,
        decoder: impl Into<BuiltinDecoder>,
        frame: Frame<'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        self.parse_under(decoder, frame, &DescriptorTree::new())
    }

    /// Run `decoder` on `frame` below the leaf of `parent`.
    pub fn parse_under<'f>(
        &self,
        decoder: impl Into<BuiltinDecoder>,
        frame: Frame<'f>,
        parent: &DescriptorTree<'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        let parser = self.domain.alloc(Parser::new(decoder.into()));
        let cx = LayerContext {
            tree: parent,
            parent: parent.len().checked_sub(1),
            parser: &parser,
            muxer: &self.muxer,
            flows: &self.flows,
            way: 0,
            timestamp: self.tick(),
            expectation_ttl_us: 60_000_000,
        };
        parser.decoder().parse(frame, &cx)
    }

    /// A one-node tree holding an IPv4 layer from `src` to `dst`.
    pub fn ipv4_parent<'f>(
        &self,
        src: [u8; 4],
        dst: [u8; 4],
        payload_len: usize,
    ) -> DescriptorTree<'f> {
        let mut fields = FieldList::new();
        fields.push(("src_ip", FieldValue::ipv4(&src)));
        fields.push(("dst_ip", FieldValue::ipv4(&dst)));
        let mut tree = DescriptorTree::new();
        tree.push(Descriptor::new(
            Ipv4Decoder.into(),
            None,
            0,
            0,
            20,
            payload_len,
            &[],
            &[],
            fields,
        ))
        .unwrap();
        tree
    }

    /// Run a whole Ethernet frame through the dispatch chain.
    pub fn dissect<'f>(&self, frame: &'f [u8]) -> ParseOutcome<'f> {
        DispatchChain::new(&self.muxer, &self.flows).dissect(
            crate::protocol::LINKTYPE_ETHERNET,
            0,
            Frame::complete(frame),
            self.tick(),
        )
    }

    /// The tree of a packet made of a single `decoder` layer.
    pub fn dissect_one<'f>(
        &self,
        decoder: impl Into<BuiltinDecoder>,
        frame: Frame<'f>,
    ) -> DescriptorTree<'f> {
        let parser = self.domain.alloc(Parser::new(decoder.into()));
        DispatchChain::new(&self.muxer, &self.flows)
            .dissect_with(parser, 0, frame, self.tick())
            .into_tree()
    }
}

impl Default for TestBench {
    fn default() -> Self {
        Self::new()
    }
}

/// Bind `decoder` on `kind`/`key` of `bench`, panicking on conflicts.
pub fn bind(bench: &TestBench, decoder: impl Into<BuiltinDecoder>, kind: TransportKind, key: u32) {
    bench
        .muxer
        .register(decoder, kind, KeyRange::exact(key))
        .unwrap();
}
