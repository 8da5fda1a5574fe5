//! Built-in decoders and their default bindings.

use std::fmt;
use std::sync::Arc;

use super::{
    Decoder, DnsDecoder, EthernetDecoder, FtpDataDecoder, FtpDecoder, IcmpDecoder, Ipv4Decoder,
    Layer, LayerContext, Session, TcpDecoder, UdpDecoder,
};
use crate::dispatch::{Descriptor, Frame};
use crate::error::{DecodeError, MuxError};
use crate::mux::{KeyRange, Muxer, TransportKind};

/// Every decoder the engine can run.
///
/// Built-ins dispatch statically; anything else goes through `Custom`.
#[derive(Clone)]
pub enum BuiltinDecoder {
    Ethernet(EthernetDecoder),
    Ipv4(Ipv4Decoder),
    Tcp(TcpDecoder),
    Udp(UdpDecoder),
    Icmp(IcmpDecoder),
    Dns(DnsDecoder),
    Ftp(FtpDecoder),
    FtpData(FtpDataDecoder),
    Custom(Arc<dyn Decoder>),
}

macro_rules! delegate_decoder {
    ($self:expr, $method:ident $(, $arg:expr)*) => {
        match $self {
            BuiltinDecoder::Ethernet(d) => d.$method($($arg),*),
            BuiltinDecoder::Ipv4(d) => d.$method($($arg),*),
            BuiltinDecoder::Tcp(d) => d.$method($($arg),*),
            BuiltinDecoder::Udp(d) => d.$method($($arg),*),
            BuiltinDecoder::Icmp(d) => d.$method($($arg),*),
            BuiltinDecoder::Dns(d) => d.$method($($arg),*),
            BuiltinDecoder::Ftp(d) => d.$method($($arg),*),
            BuiltinDecoder::FtpData(d) => d.$method($($arg),*),
            BuiltinDecoder::Custom(d) => d.$method($($arg),*),
        }
    };
}

impl Decoder for BuiltinDecoder {
    #[inline]
    fn name(&self) -> &'static str {
        delegate_decoder!(self, name)
    }

    #[inline]
    fn display_name(&self) -> &'static str {
        delegate_decoder!(self, display_name)
    }

    #[inline]
    fn parse<'f>(
        &self,
        frame: Frame<'f>,
        cx: &LayerContext<'_, 'f>,
    ) -> Result<Layer<'f>, DecodeError> {
        delegate_decoder!(self, parse, frame, cx)
    }

    fn new_session(&self) -> Session {
        delegate_decoder!(self, new_session)
    }

    fn describe(&self, node: &Descriptor<'_>) -> String {
        delegate_decoder!(self, describe, node)
    }

    fn raw_view<'f>(&self, node: &Descriptor<'f>) -> &'f [u8] {
        delegate_decoder!(self, raw_view, node)
    }
}

impl BuiltinDecoder {
    /// Whether both wrap the same decoder: the same built-in, or the very
    /// same plugin object. Two plugins sharing a name are different.
    pub fn same_decoder(&self, other: &BuiltinDecoder) -> bool {
        match (self, other) {
            (BuiltinDecoder::Custom(a), BuiltinDecoder::Custom(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl fmt::Debug for BuiltinDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BuiltinDecoder").field(&self.name()).finish()
    }
}

impl From<EthernetDecoder> for BuiltinDecoder {
    fn from(d: EthernetDecoder) -> Self {
        BuiltinDecoder::Ethernet(d)
    }
}

impl From<Ipv4Decoder> for BuiltinDecoder {
    fn from(d: Ipv4Decoder) -> Self {
        BuiltinDecoder::Ipv4(d)
    }
}

impl From<TcpDecoder> for BuiltinDecoder {
    fn from(d: TcpDecoder) -> Self {
        BuiltinDecoder::Tcp(d)
    }
}

impl From<UdpDecoder> for BuiltinDecoder {
    fn from(d: UdpDecoder) -> Self {
        BuiltinDecoder::Udp(d)
    }
}

impl From<IcmpDecoder> for BuiltinDecoder {
    fn from(d: IcmpDecoder) -> Self {
        BuiltinDecoder::Icmp(d)
    }
}

impl From<DnsDecoder> for BuiltinDecoder {
    fn from(d: DnsDecoder) -> Self {
        BuiltinDecoder::Dns(d)
    }
}

impl From<FtpDecoder> for BuiltinDecoder {
    fn from(d: FtpDecoder) -> Self {
        BuiltinDecoder::Ftp(d)
    }
}

impl From<FtpDataDecoder> for BuiltinDecoder {
    fn from(d: FtpDataDecoder) -> Self {
        BuiltinDecoder::FtpData(d)
    }
}

impl From<Arc<dyn Decoder>> for BuiltinDecoder {
    fn from(d: Arc<dyn Decoder>) -> Self {
        BuiltinDecoder::Custom(d)
    }
}

/// The bindings a default engine starts with.
pub fn default_bindings() -> Vec<(BuiltinDecoder, TransportKind, KeyRange)> {
    use TransportKind::*;

    vec![
        (EthernetDecoder.into(), LinkType, KeyRange::exact(1)),
        (Ipv4Decoder.into(), EtherType, KeyRange::exact(0x0800)),
        (TcpDecoder.into(), IpProto, KeyRange::exact(6)),
        (UdpDecoder.into(), IpProto, KeyRange::exact(17)),
        (IcmpDecoder.into(), IpProto, KeyRange::exact(1)),
        (DnsDecoder.into(), UdpPort, KeyRange::exact(53)),
        // mDNS, NetBIOS name service, LLMNR
        (DnsDecoder.into(), UdpPort, KeyRange::exact(5353)),
        (DnsDecoder.into(), UdpPort, KeyRange::exact(137)),
        (DnsDecoder.into(), UdpPort, KeyRange::exact(5355)),
        (FtpDecoder.into(), TcpPort, KeyRange::exact(21)),
    ]
}

/// Register [`default_bindings`] on `muxer`.
pub fn register_defaults(muxer: &Muxer) -> Result<(), MuxError> {
    for (decoder, kind, range) in default_bindings() {
        muxer.register(decoder, kind, range)?;
    }
    Ok(())
}
