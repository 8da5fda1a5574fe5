//! Field values attached to descriptors.
//!
//! Values borrow from the frame where the bytes exist verbatim (`Str`,
//! `Bytes`) and own their data only when it has to be constructed, like a
//! decoded DNS name.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use compact_str::CompactString;
use smallvec::SmallVec;

/// One protocol field value.
///
/// The lifetime ties borrowed variants to the frame being dissected.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'data> {
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Bool(bool),

    IpAddr(IpAddr),
    MacAddr([u8; 6]),

    /// Zero-copy string inside the frame
    Str(&'data str),
    /// Zero-copy bytes inside the frame
    Bytes(&'data [u8]),

    /// Constructed string (decoded names, enum labels)
    OwnedString(CompactString),

    Null,
}

/// Fields of one layer, in extraction order.
pub type FieldList<'data> = SmallVec<[(&'static str, FieldValue<'data>); 16]>;

impl FieldValue<'_> {
    /// MAC address from the first 6 bytes, `Null` if too short.
    pub fn mac(bytes: &[u8]) -> Self {
        match bytes.get(..6) {
            Some(b) => {
                let mut mac = [0u8; 6];
                mac.copy_from_slice(b);
                FieldValue::MacAddr(mac)
            }
            None => FieldValue::Null,
        }
    }

    /// IPv4 address from the first 4 bytes, `Null` if too short.
    pub fn ipv4(bytes: &[u8]) -> Self {
        match bytes.get(..4) {
            Some(b) => FieldValue::IpAddr(IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3]))),
            None => FieldValue::Null,
        }
    }

    pub fn owned(s: impl AsRef<str>) -> Self {
        FieldValue::OwnedString(CompactString::new(s.as_ref()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt8(v) => Some(*v as u64),
            FieldValue::UInt16(v) => Some(*v as u64),
            FieldValue::UInt32(v) => Some(*v as u64),
            FieldValue::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ip(&self) -> Option<IpAddr> {
        match self {
            FieldValue::IpAddr(ip) => Some(*ip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            FieldValue::OwnedString(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::UInt8(v) => write!(f, "{v}"),
            FieldValue::UInt16(v) => write!(f, "{v}"),
            FieldValue::UInt32(v) => write!(f, "{v}"),
            FieldValue::UInt64(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::IpAddr(ip) => write!(f, "{ip}"),
            FieldValue::MacAddr(m) => write!(
                f,
                "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
                m[0], m[1], m[2], m[3], m[4], m[5]
            ),
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::OwnedString(s) => f.write_str(s),
            FieldValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            FieldValue::Null => f.write_str("null"),
        }
    }
}
