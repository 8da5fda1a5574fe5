//! Transport flow tracking.
//!
//! Flows are keyed by a normalized 5-tuple so both directions land on the
//! same entry. Each flow is a reclaim-domain object that may be bound to one
//! decoder object: either the requester of a matching connection
//! expectation, found when the flow is first seen, or a fresh session of the
//! decoder its ports resolve to.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::OnceLock;

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::mux::{Muxer, ObservedFlow};
use crate::protocol::Parser;
use crate::reclaim::{ReclaimDomain, Ref};

/// Direction-independent flow identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    ip_proto: u8,
    lo: (IpAddr, u16),
    hi: (IpAddr, u16),
}

impl FlowKey {
    pub fn new(ip_proto: u8, a: (IpAddr, u16), b: (IpAddr, u16)) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self { ip_proto, lo, hi }
    }

    pub fn from_observed(flow: &ObservedFlow) -> Self {
        Self::new(
            flow.ip_proto,
            (flow.src, flow.src_port),
            (flow.dst, flow.dst_port),
        )
    }

    pub fn ip_proto(&self) -> u8 {
        self.ip_proto
    }
}

/// One tracked flow.
pub struct Flow {
    id: u64,
    key: FlowKey,
    initiator: (IpAddr, u16),
    parser: OnceLock<Ref<Parser>>,
    first_seen: i64,
    last_seen: AtomicI64,
    packets: AtomicU64,
}

impl Flow {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    /// Whether a packet from `src` travels in the direction of the first
    /// packet seen.
    pub fn is_from_initiator(&self, src: IpAddr, src_port: u16) -> bool {
        self.initiator == (src, src_port)
    }

    /// Decoder object bound to this flow.
    pub fn parser(&self) -> Option<Ref<Parser>> {
        self.parser.get().cloned()
    }

    /// The bound decoder object, binding the one `bind` yields if there is
    /// none yet. `bind` may run on several threads at once; one result wins.
    pub fn parser_or_bind(&self, bind: impl FnOnce() -> Option<Ref<Parser>>) -> Option<Ref<Parser>> {
        if let Some(parser) = self.parser.get() {
            return Some(parser.clone());
        }
        let candidate = bind()?;
        if self.parser.set(candidate).is_ok() {
            trace!(flow = self.id, "flow bound");
        }
        self.parser.get().cloned()
    }

    pub fn first_seen(&self) -> i64 {
        self.first_seen
    }

    pub fn last_seen(&self) -> i64 {
        self.last_seen.load(Ordering::Relaxed)
    }

    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    fn touch(&self, now: i64) {
        self.last_seen.fetch_max(now, Ordering::Relaxed);
        self.packets.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("bound", &self.parser.get().map(|p| p.name()))
            .field("packets", &self.packets())
            .finish()
    }
}

/// Concurrent table of live flows.
pub struct FlowTracker {
    domain: ReclaimDomain,
    flows: DashMap<FlowKey, Ref<Flow>>,
    next_id: AtomicU64,
}

impl FlowTracker {
    pub fn new(domain: ReclaimDomain) -> Self {
        Self {
            domain,
            flows: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Record a packet of `observed` and return its flow.
    ///
    /// A flow seen for the first time consumes the best matching connection
    /// expectation, if any, and is bound to its requester.
    pub fn observe(&self, muxer: &Muxer, observed: &ObservedFlow, now: i64) -> Ref<Flow> {
        let key = FlowKey::from_observed(observed);
        let flow = self
            .flows
            .entry(key)
            .or_insert_with(|| {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let parser = OnceLock::new();
                if let Some(requester) = muxer.consume_if_matching(observed, now) {
                    debug!(flow = id, requester = requester.name(), "flow claimed by expectation");
                    let _ = parser.set(requester);
                }
                self.domain.alloc(Flow {
                    id,
                    key,
                    initiator: (observed.src, observed.src_port),
                    parser,
                    first_seen: now,
                    last_seen: AtomicI64::new(now),
                    packets: AtomicU64::new(0),
                })
            })
            .value()
            .clone();
        flow.touch(now);
        flow
    }

    pub fn get(&self, key: &FlowKey) -> Option<Ref<Flow>> {
        self.flows.get(key).map(|f| f.value().clone())
    }

    /// Forget flows idle for longer than `timeout_us`. Their objects go to
    /// death row once the last in-flight reference is dropped.
    pub fn expire_idle(&self, now: i64, timeout_us: i64) -> usize {
        let before = self.flows.len();
        self.flows
            .retain(|_, flow| now.saturating_sub(flow.last_seen()) <= timeout_us);
        let expired = before.saturating_sub(self.flows.len());
        if expired > 0 {
            debug!(expired, remaining = self.flows.len(), "idle flows expired");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Drop every flow.
    pub fn clear(&self) {
        self.flows.clear();
    }
}

impl fmt::Debug for FlowTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowTracker")
            .field("flows", &self.flows.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::{Endpoint, Expectation};
    use crate::protocol::test_utils::{custom_parser, FixedDecoder};
    use std::net::Ipv4Addr;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    fn observed(src: u8, src_port: u16, dst: u8, dst_port: u16) -> ObservedFlow {
        ObservedFlow {
            ip_proto: 6,
            src: ip(src),
            src_port,
            dst: ip(dst),
            dst_port,
        }
    }

    #[test]
    fn test_key_is_direction_independent() {
        let a = FlowKey::from_observed(&observed(1, 40000, 2, 80));
        let b = FlowKey::from_observed(&observed(2, 80, 1, 40000));
        assert_eq!(a, b);
        assert_ne!(a, FlowKey::from_observed(&observed(1, 40001, 2, 80)));
    }

    #[test]
    fn test_observe_tracks_both_directions() {
        let domain = ReclaimDomain::manual();
        let muxer = Muxer::new(domain.clone());
        let tracker = FlowTracker::new(domain);

        let f1 = tracker.observe(&muxer, &observed(1, 40000, 2, 80), 100);
        let f2 = tracker.observe(&muxer, &observed(2, 80, 1, 40000), 200);
        assert!(Ref::ptr_eq(&f1, &f2));
        assert_eq!(tracker.len(), 1);
        assert_eq!(f2.packets(), 2);
        assert_eq!(f2.first_seen(), 100);
        assert_eq!(f2.last_seen(), 200);
        assert!(f1.is_from_initiator(ip(1), 40000));
        assert!(!f1.is_from_initiator(ip(2), 80));
    }

    #[test]
    fn test_new_flow_consumes_expectation() {
        let domain = ReclaimDomain::manual();
        let muxer = Muxer::new(domain.clone());
        let tracker = FlowTracker::new(domain.clone());
        let data = custom_parser(&domain, FixedDecoder::new("data", 0));

        muxer.dynamic_expect(
            Expectation::new(6, Endpoint::exact(ip(2), 2000), Endpoint::host(ip(1)), data.clone()),
            1_000_000,
            0,
        );

        let flow = tracker.observe(&muxer, &observed(1, 50000, 2, 2000), 10);
        assert!(flow.parser().is_some_and(|p| Ref::ptr_eq(&p, &data)));
        assert!(muxer.expectations().is_empty());

        // A second flow on the same endpoints finds nothing left.
        let other = tracker.observe(&muxer, &observed(1, 50001, 2, 2000), 20);
        assert!(other.parser().is_none());
    }

    #[test]
    fn test_bind_once() {
        let domain = ReclaimDomain::manual();
        let muxer = Muxer::new(domain.clone());
        let tracker = FlowTracker::new(domain.clone());
        let first = custom_parser(&domain, FixedDecoder::new("first", 0));
        let second = custom_parser(&domain, FixedDecoder::new("second", 0));

        let flow = tracker.observe(&muxer, &observed(1, 1, 2, 2), 0);
        assert!(flow.parser_or_bind(|| None).is_none());
        let bound = flow.parser_or_bind(|| Some(first.clone())).unwrap();
        assert!(Ref::ptr_eq(&bound, &first));
        let bound = flow.parser_or_bind(|| Some(second.clone())).unwrap();
        assert!(Ref::ptr_eq(&bound, &first));
    }

    #[test]
    fn test_expire_idle_releases_flows() {
        let domain = ReclaimDomain::manual();
        let muxer = Muxer::new(domain.clone());
        let tracker = FlowTracker::new(domain.clone());

        drop(tracker.observe(&muxer, &observed(1, 1, 2, 2), 0));
        drop(tracker.observe(&muxer, &observed(1, 3, 2, 4), 900));

        assert_eq!(tracker.expire_idle(1_000, 500), 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(domain.pending(), 1);
        assert_eq!(domain.collect(), 1);
    }
}
