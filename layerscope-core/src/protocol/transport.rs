//! Flow binding shared by the TCP and UDP decoders.

use super::{LayerContext, NextLayer};
use crate::flow::Flow;
use crate::mux::{ObservedFlow, TransportKind};
use crate::reclaim::Ref;

/// Find the flow of this segment and the decoder object its payload goes
/// to.
///
/// Without an enclosing IP layer there is no flow to track, and the payload
/// is resolved by port alone (destination first).
pub(crate) fn bind_flow(
    cx: &LayerContext<'_, '_>,
    ip_proto: u8,
    kind: TransportKind,
    src_port: u16,
    dst_port: u16,
) -> (Option<Ref<Flow>>, NextLayer) {
    let ports = [u32::from(dst_port), u32::from(src_port)];
    let Some((src, dst)) = cx.ip_endpoints() else {
        return (None, NextLayer::mux_any(kind, &ports));
    };

    let observed = ObservedFlow {
        ip_proto,
        src,
        src_port,
        dst,
        dst_port,
    };
    let flow = cx.flows().observe(cx.muxer(), &observed, cx.timestamp());
    let next = flow
        .parser_or_bind(|| {
            cx.muxer()
                .resolve_any(kind, &ports)
                .map(|service| service.new_session(cx.domain()))
        })
        .map_or(NextLayer::Stop, NextLayer::Parser);
    (Some(flow), next)
}
