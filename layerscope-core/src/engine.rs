//! The engine: one reclaim domain, its muxer, flow table and subscribers.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::dispatch::{
    DispatchChain, Frame, PacketEvent, ParseOutcome, Subscriber, SubscriberId, SubscriberSet,
    DEFAULT_EXPECTATION_TTL_US, DEFAULT_MAX_DEPTH,
};
use crate::error::Result;
use crate::flow::FlowTracker;
use crate::mux::{KeyRange, Muxer, TransportKind};
use crate::protocol::{register_defaults, BuiltinDecoder};
use crate::reclaim::{ReclaimDomain, ReclaimStats};

/// Configuration for the [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How often the background reclaimer drains death row. `None` runs
    /// without a reclaimer thread; death row is then drained by sweeps.
    pub reclaim_interval: Option<Duration>,
    /// Layers decoded per packet before giving up.
    pub max_depth: usize,
    /// Lifetime of connection expectations (microseconds).
    pub expectation_ttl_us: i64,
    /// Flows idle for longer than this are forgotten (microseconds).
    pub flow_idle_timeout_us: i64,
    /// Capture time between two sweeps of idle flows and stale
    /// expectations (microseconds). 0 disables automatic sweeps.
    pub flow_sweep_interval_us: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reclaim_interval: Some(Duration::from_millis(10)),
            max_depth: DEFAULT_MAX_DEPTH,
            expectation_ttl_us: DEFAULT_EXPECTATION_TTL_US,
            flow_idle_timeout_us: 300_000_000, // 5 minutes
            flow_sweep_interval_us: 10_000_000, // 10 seconds
        }
    }
}

/// Snapshot of engine counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub parsed: u64,
    pub truncated: u64,
    pub malformed: u64,
    pub flows: usize,
    pub expectations: usize,
    pub bindings: usize,
    pub subscribers: usize,
    pub reclaim: ReclaimStats,
}

impl EngineStats {
    pub fn packets(&self) -> u64 {
        self.parsed + self.truncated + self.malformed
    }
}

#[derive(Debug, Default)]
struct OutcomeCounters {
    parsed: AtomicU64,
    truncated: AtomicU64,
    malformed: AtomicU64,
}

/// Decodes packets from any number of threads.
///
/// Everything that outlives a packet (decoder objects, flows, expectations)
/// belongs to the engine's [`ReclaimDomain`]. Each call to
/// [`dissect`](Self::dissect) runs inside a shared region, so objects
/// released while a packet is in flight are freed only after it is done.
pub struct Engine {
    // Declared before `domain` so their references are released first.
    muxer: Muxer,
    flows: FlowTracker,
    subscribers: SubscriberSet,
    domain: ReclaimDomain,
    config: EngineConfig,
    last_sweep: AtomicI64,
    counters: OutcomeCounters,
}

impl Engine {
    /// Create an engine with no decoders bound.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let domain = match config.reclaim_interval {
            Some(interval) => ReclaimDomain::spawn(interval)?,
            None => ReclaimDomain::manual(),
        };
        debug!(domain = domain.id(), ?config, "engine created");
        Ok(Self {
            muxer: Muxer::new(domain.clone()),
            flows: FlowTracker::new(domain.clone()),
            subscribers: SubscriberSet::new(),
            domain,
            config,
            last_sweep: AtomicI64::new(i64::MIN),
            counters: OutcomeCounters::default(),
        })
    }

    /// Create an engine with the built-in decoders bound.
    pub fn with_default_decoders(config: EngineConfig) -> Result<Self> {
        let engine = Self::new(config)?;
        register_defaults(&engine.muxer)?;
        info!(bindings = engine.muxer.len(), "default decoders registered");
        Ok(engine)
    }

    /// Bind `decoder` to `range` of `kind`.
    pub fn register(
        &self,
        decoder: impl Into<BuiltinDecoder>,
        kind: TransportKind,
        range: KeyRange,
    ) -> Result<()> {
        self.muxer.register(decoder, kind, range)?;
        Ok(())
    }

    pub fn unregister(&self, decoder: &str, kind: TransportKind, range: KeyRange) -> bool {
        self.muxer.unregister(decoder, kind, range)
    }

    pub fn subscribe(&self, subscriber: impl Subscriber + 'static) -> SubscriberId {
        self.subscribers.subscribe(Arc::new(subscriber))
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    pub fn muxer(&self) -> &Muxer {
        &self.muxer
    }

    pub fn flows(&self) -> &FlowTracker {
        &self.flows
    }

    pub fn domain(&self) -> &ReclaimDomain {
        &self.domain
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn chain(&self) -> DispatchChain<'_> {
        DispatchChain::new(&self.muxer, &self.flows)
            .with_max_depth(self.config.max_depth)
            .with_expectation_ttl(self.config.expectation_ttl_us)
    }

    /// Decode one frame and hand the result to every subscriber.
    ///
    /// `timestamp` is the capture time in microseconds. `way` is a direction
    /// hint for decoders that cannot tell direction from a flow.
    pub fn dissect<'f>(
        &self,
        link_type: u32,
        way: u8,
        frame: Frame<'f>,
        timestamp: i64,
    ) -> ParseOutcome<'f> {
        let outcome = {
            let _region = self.domain.enter_shared_region();
            let outcome = self.chain().dissect(link_type, way, frame, timestamp);
            if !self.subscribers.is_empty() {
                self.subscribers.notify(&PacketEvent {
                    outcome: &outcome,
                    timestamp,
                    link_type,
                    data: frame.captured(),
                    wire_len: frame.wire_len(),
                });
            }
            outcome
        };

        let counter = match &outcome {
            ParseOutcome::Parsed(_) => &self.counters.parsed,
            ParseOutcome::Truncated { .. } => &self.counters.truncated,
            ParseOutcome::Malformed { .. } => &self.counters.malformed,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        self.maybe_sweep(timestamp);
        outcome
    }

    /// Sweep once per `flow_sweep_interval_us` of capture time. Only one
    /// thread wins each interval.
    fn maybe_sweep(&self, now: i64) {
        let interval = self.config.flow_sweep_interval_us;
        if interval <= 0 {
            return;
        }
        let last = self.last_sweep.load(Ordering::Relaxed);
        if now.saturating_sub(last) < interval {
            return;
        }
        if self
            .last_sweep
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.sweep(now);
        }
    }

    /// Forget idle flows and expired expectations as of `now`, returning how
    /// many of each were dropped. Without a background reclaimer this also
    /// drains death row.
    pub fn sweep(&self, now: i64) -> (usize, usize) {
        let flows = self.flows.expire_idle(now, self.config.flow_idle_timeout_us);
        let expectations = self.muxer.expectations().purge_expired(now);
        if self.config.reclaim_interval.is_none() && !self.domain.in_shared_region() {
            self.domain.collect();
        }
        (flows, expectations)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            parsed: self.counters.parsed.load(Ordering::Relaxed),
            truncated: self.counters.truncated.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
            flows: self.flows.len(),
            expectations: self.muxer.expectations().len(),
            bindings: self.muxer.len(),
            subscribers: self.subscribers.len(),
            reclaim: self.domain.stats(),
        }
    }

    /// Drop all flows, stop the reclaimer and free death row.
    ///
    /// The engine keeps decoding afterwards, but released objects are then
    /// freed inline instead of in the background.
    pub fn shutdown(&self) {
        self.flows.clear();
        self.domain.stop();
        debug!(stats = ?self.domain.stats(), "engine shut down");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
