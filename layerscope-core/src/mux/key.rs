//! Transport kinds and key ranges.

use std::fmt;

/// Namespace a muxing key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransportKind {
    /// Capture link type (1 = Ethernet)
    LinkType,
    /// Ethernet type field
    EtherType,
    /// IP protocol number
    IpProto,
    TcpPort,
    UdpPort,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::LinkType => "link type",
            TransportKind::EtherType => "ethertype",
            TransportKind::IpProto => "ip proto",
            TransportKind::TcpPort => "tcp port",
            TransportKind::UdpPort => "udp port",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys a muxing entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRange {
    /// Inclusive range; `lo == hi` is an exact key
    Span { lo: u32, hi: u32 },
    /// Catch-all, only used when nothing more specific matches
    Any,
}

impl KeyRange {
    pub const fn exact(key: u32) -> Self {
        KeyRange::Span { lo: key, hi: key }
    }

    pub fn span(lo: u32, hi: u32) -> Self {
        if lo <= hi {
            KeyRange::Span { lo, hi }
        } else {
            KeyRange::Span { lo: hi, hi: lo }
        }
    }

    pub fn contains(&self, key: u32) -> bool {
        match *self {
            KeyRange::Span { lo, hi } => lo <= key && key <= hi,
            KeyRange::Any => true,
        }
    }

    /// Number of keys covered. Smaller is more specific; wildcards sort
    /// after every span.
    pub fn width(&self) -> u64 {
        match *self {
            KeyRange::Span { lo, hi } => u64::from(hi - lo) + 1,
            KeyRange::Any => u64::MAX,
        }
    }

    pub fn is_exact(&self) -> bool {
        self.width() == 1
    }

    pub fn overlaps(&self, other: &KeyRange) -> bool {
        match (*self, *other) {
            (KeyRange::Span { lo: a, hi: b }, KeyRange::Span { lo: c, hi: d }) => a <= d && c <= b,
            _ => true,
        }
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            KeyRange::Span { lo, hi } if lo == hi => write!(f, "{lo}"),
            KeyRange::Span { lo, hi } => write!(f, "{lo}-{hi}"),
            KeyRange::Any => f.write_str("*"),
        }
    }
}
