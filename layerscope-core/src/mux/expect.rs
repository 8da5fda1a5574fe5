//! Connection expectations.
//!
//! A decoder that learns about an upcoming connection (an FTP passive-mode
//! data channel, say) declares it here. The flow tracker consults the table
//! when it sees a new flow; the first matching flow consumes the expectation
//! and gets bound to the requested parser. Entries that are never matched
//! expire and are purged lazily.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::protocol::Parser;
use crate::reclaim::Ref;

/// One side of an expected connection. `None` matches anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: Option<IpAddr>,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(addr: Option<IpAddr>, port: Option<u16>) -> Self {
        Self { addr, port }
    }

    pub fn exact(addr: IpAddr, port: u16) -> Self {
        Self::new(Some(addr), Some(port))
    }

    /// Any port on `addr`.
    pub fn host(addr: IpAddr) -> Self {
        Self::new(Some(addr), None)
    }

    fn matches(&self, addr: IpAddr, port: u16) -> bool {
        self.addr.map_or(true, |a| a == addr) && self.port.map_or(true, |p| p == port)
    }

    fn specificity(&self) -> u8 {
        u8::from(self.addr.is_some()) + u8::from(self.port.is_some())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(addr) => write!(f, "{addr}")?,
            None => f.write_str("*")?,
        }
        match self.port {
            Some(port) => write!(f, ":{port}"),
            None => f.write_str(":*"),
        }
    }
}

/// Which way the expected connection is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectDirection {
    /// From `endpoints[0]` to `endpoints[1]`
    Forward,
    /// From `endpoints[1]` to `endpoints[0]`
    Reverse,
    Either,
}

/// A forward declaration that some future flow belongs to a given parser.
#[derive(Debug)]
pub struct Expectation {
    pub ip_proto: u8,
    pub endpoints: [Endpoint; 2],
    pub direction: ExpectDirection,
    /// Parser the matching flow gets bound to
    pub requester: Ref<Parser>,
}

impl Expectation {
    pub fn new(ip_proto: u8, a: Endpoint, b: Endpoint, requester: Ref<Parser>) -> Self {
        Self {
            ip_proto,
            endpoints: [a, b],
            direction: ExpectDirection::Either,
            requester,
        }
    }

    pub fn with_direction(mut self, direction: ExpectDirection) -> Self {
        self.direction = direction;
        self
    }

    fn matches(&self, flow: &ObservedFlow) -> bool {
        if self.ip_proto != flow.ip_proto {
            return false;
        }
        let [a, b] = &self.endpoints;
        let forward = a.matches(flow.src, flow.src_port) && b.matches(flow.dst, flow.dst_port);
        let reverse = || b.matches(flow.src, flow.src_port) && a.matches(flow.dst, flow.dst_port);
        match self.direction {
            ExpectDirection::Forward => forward,
            ExpectDirection::Reverse => reverse(),
            ExpectDirection::Either => forward || reverse(),
        }
    }

    fn specificity(&self) -> u8 {
        self.endpoints[0].specificity() + self.endpoints[1].specificity()
    }
}

/// The first packet of a flow, as seen by the flow tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedFlow {
    pub ip_proto: u8,
    pub src: IpAddr,
    pub src_port: u16,
    pub dst: IpAddr,
    pub dst_port: u16,
}

struct Pending {
    expectation: Expectation,
    expires_at: i64,
    seq: u64,
}

/// Pending expectations, consumed at most once each.
#[derive(Default)]
pub struct ExpectationTable {
    pending: Mutex<Vec<Pending>>,
    next_seq: AtomicU64,
}

impl ExpectationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an expectation valid until `now + ttl_us` (microseconds).
    pub fn insert(&self, expectation: Expectation, ttl_us: i64, now: i64) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        debug!(
            proto = expectation.ip_proto,
            a = %expectation.endpoints[0],
            b = %expectation.endpoints[1],
            requester = expectation.requester.name(),
            ttl_us,
            "connection expected"
        );
        self.pending.lock().push(Pending {
            expectation,
            expires_at: now.saturating_add(ttl_us),
            seq,
        });
    }

    /// Find, remove and return the requester of the best matching
    /// expectation for `flow`.
    ///
    /// The most specific match wins; among equally specific ones, the
    /// oldest. Expired entries are dropped first and never match.
    pub fn consume_if_matching(&self, flow: &ObservedFlow, now: i64) -> Option<Ref<Parser>> {
        let mut pending = self.pending.lock();
        Self::purge_locked(&mut pending, now);

        let (index, _) = pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.expectation.matches(flow))
            .max_by(|(_, a), (_, b)| {
                a.expectation
                    .specificity()
                    .cmp(&b.expectation.specificity())
                    .then(b.seq.cmp(&a.seq))
            })?;

        let matched = pending.remove(index);
        debug!(
            src = %flow.src,
            src_port = flow.src_port,
            dst = %flow.dst,
            dst_port = flow.dst_port,
            requester = matched.expectation.requester.name(),
            "expectation consumed"
        );
        Some(matched.expectation.requester)
    }

    /// Drop expectations whose deadline is at or before `now`.
    pub fn purge_expired(&self, now: i64) -> usize {
        Self::purge_locked(&mut self.pending.lock(), now)
    }

    fn purge_locked(pending: &mut Vec<Pending>, now: i64) -> usize {
        let before = pending.len();
        pending.retain(|p| p.expires_at > now);
        let purged = before - pending.len();
        if purged > 0 {
            trace!(purged, "expired expectations dropped");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ExpectationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpectationTable")
            .field("pending", &self.len())
            .finish()
    }
}
