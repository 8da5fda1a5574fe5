//! Decoder contract and built-in decoders.
//!
//! A [`Decoder`] turns the bytes of one layer into a [`Layer`]: header and
//! payload lengths, named fields, and how to continue. Decoders run inside
//! [`Parser`] objects owned by the reclaim domain, so the muxer can swap them
//! out while packets are in flight.

mod context;
mod decoder;
mod dns;
mod ethernet;
mod field;
mod ftp;
mod icmp;
mod ipv4;
mod registry;
mod tcp;
mod transport;
mod udp;

// Test utilities (only compiled for tests)
#[cfg(test)]
pub mod test_utils;

pub use context::{Layer, LayerContext, NextLayer};
pub use decoder::{Decoder, Parser, Session};
pub use field::{FieldList, FieldValue};
pub use registry::{default_bindings, register_defaults, BuiltinDecoder};

// Re-export protocol implementations
pub use dns::DnsDecoder;
pub use ethernet::EthernetDecoder;
pub use ftp::{FtpDataDecoder, FtpDecoder};
pub use icmp::IcmpDecoder;
pub use ipv4::Ipv4Decoder;
pub use tcp::TcpDecoder;
pub use udp::UdpDecoder;

// Protocol constants and helpers
pub use dns::{
    class_name as dns_class_name, type_name as dns_type_name, DNS_PORT, LLMNR_PORT,
    MAX_POINTER_FOLLOWS, MDNS_PORT, NBNS_PORT,
};
pub use ethernet::{ETHERNET_HEADER_LEN, LINKTYPE_ETHERNET};
pub use ftp::{host_port as ftp_host_port, FTP_PORT};
pub use icmp::{type_name as icmp_type_name, QuotedDatagram, IP_PROTO_ICMP};
pub use ipv4::ETHERTYPE_IPV4;
pub use tcp::{flags as tcp_flags, IP_PROTO_TCP};
pub use udp::IP_PROTO_UDP;
