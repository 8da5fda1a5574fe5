//! Packet builders shared by the integration tests.

#![allow(dead_code)]

pub const CLIENT: [u8; 4] = [192, 168, 10, 20];
pub const SERVER: [u8; 4] = [192, 168, 10, 1];

/// Ethernet II + IPv4 around `payload`.
pub fn eth_ipv4(protocol: u8, src: [u8; 4], dst: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(34 + payload.len());

    // Ethernet header (14 bytes)
    packet.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x02]); // dst MAC
    packet.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]); // src MAC
    packet.extend_from_slice(&[0x08, 0x00]); // ethertype: IPv4

    // IPv4 header (20 bytes)
    let total_len = (20 + payload.len()) as u16;
    packet.push(0x45); // Version 4, IHL 5
    packet.push(0x00);
    packet.extend_from_slice(&total_len.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x01]); // Identification
    packet.extend_from_slice(&[0x40, 0x00]); // Don't fragment
    packet.push(64); // TTL
    packet.push(protocol);
    packet.extend_from_slice(&[0x00, 0x00]); // Checksum
    packet.extend_from_slice(&src);
    packet.extend_from_slice(&dst);

    packet.extend_from_slice(payload);
    packet
}

/// TCP segment with PSH|ACK set and no options.
pub fn tcp_segment(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut segment = Vec::with_capacity(20 + payload.len());
    segment.extend_from_slice(&src_port.to_be_bytes());
    segment.extend_from_slice(&dst_port.to_be_bytes());
    segment.extend_from_slice(&1u32.to_be_bytes()); // Seq
    segment.extend_from_slice(&0u32.to_be_bytes()); // Ack
    segment.push(0x50); // Data offset: 5
    segment.push(0x18); // Flags: PSH, ACK
    segment.extend_from_slice(&[0xff, 0xff]); // Window
    segment.extend_from_slice(&[0x00, 0x00]); // Checksum
    segment.extend_from_slice(&[0x00, 0x00]); // Urgent pointer
    segment.extend_from_slice(payload);
    segment
}

pub fn udp_datagram(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(8 + payload.len());
    datagram.extend_from_slice(&src_port.to_be_bytes());
    datagram.extend_from_slice(&dst_port.to_be_bytes());
    datagram.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    datagram.extend_from_slice(&[0x00, 0x00]); // Checksum
    datagram.extend_from_slice(payload);
    datagram
}

pub fn tcp_frame(src: ([u8; 4], u16), dst: ([u8; 4], u16), payload: &[u8]) -> Vec<u8> {
    eth_ipv4(6, src.0, dst.0, &tcp_segment(src.1, dst.1, payload))
}

pub fn udp_frame(src: ([u8; 4], u16), dst: ([u8; 4], u16), payload: &[u8]) -> Vec<u8> {
    eth_ipv4(17, src.0, dst.0, &udp_datagram(src.1, dst.1, payload))
}

/// Standard query for an A record of `name`.
pub fn dns_query(id: u16, name: &str) -> Vec<u8> {
    let mut message = Vec::new();
    message.extend_from_slice(&id.to_be_bytes());
    message.extend_from_slice(&[0x01, 0x00]); // Flags: recursion desired
    message.extend_from_slice(&[0x00, 0x01]); // Questions
    message.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00]); // RR counts
    for label in name.split('.') {
        message.push(label.len() as u8);
        message.extend_from_slice(label.as_bytes());
    }
    message.push(0);
    message.extend_from_slice(&[0x00, 0x01]); // Type: A
    message.extend_from_slice(&[0x00, 0x01]); // Class: IN
    message
}
