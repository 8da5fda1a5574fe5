//! Snapshot-and-swap muxing tables.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::debug;

use super::expect::{Expectation, ExpectationTable, ObservedFlow};
use super::key::{KeyRange, TransportKind};
use crate::error::MuxError;
use crate::protocol::{BuiltinDecoder, Decoder, Parser};
use crate::reclaim::{ReclaimDomain, Ref};

/// One registered (key range, decoder) pair.
struct MuxEntry {
    range: KeyRange,
    decoder: BuiltinDecoder,
    /// Instantiated on first matching traffic
    parser: OnceLock<Ref<Parser>>,
    seq: u64,
}

impl MuxEntry {
    fn parser(&self, domain: &ReclaimDomain) -> Ref<Parser> {
        self.parser
            .get_or_init(|| domain.alloc(Parser::new(self.decoder.clone())))
            .clone()
    }

    fn rank(&self) -> (u64, u64) {
        (self.range.width(), self.seq)
    }
}

/// Entries per transport kind, most specific first.
#[derive(Clone, Default)]
struct MuxTable {
    buckets: HashMap<TransportKind, Vec<Arc<MuxEntry>>>,
}

/// A registered binding, as listed by [`Muxer::bindings`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub kind: TransportKind,
    pub range: KeyRange,
    pub decoder: &'static str,
    /// Whether the decoder object was already created
    pub instantiated: bool,
}

/// Maps transport keys to decoder objects.
///
/// Lookups load the current table snapshot and never block. Writers build a
/// modified copy and swap it in, serialized by a writer lock, so an entry
/// removed while a lookup is in flight stays valid for that lookup.
///
/// Resolution precedence within a transport kind: exact key, then the
/// narrowest range containing the key, then wildcards in registration order.
pub struct Muxer {
    domain: ReclaimDomain,
    table: ArcSwap<MuxTable>,
    /// Serializes writers; holds the next sequence number
    writer: Mutex<u64>,
    expectations: ExpectationTable,
}

impl Muxer {
    pub fn new(domain: ReclaimDomain) -> Self {
        Self {
            domain,
            table: ArcSwap::from_pointee(MuxTable::default()),
            writer: Mutex::new(0),
            expectations: ExpectationTable::new(),
        }
    }

    pub fn domain(&self) -> &ReclaimDomain {
        &self.domain
    }

    /// Bind `decoder` to `range` within `kind`.
    ///
    /// Binding the same decoder to the same range twice is a no-op. A
    /// different decoder is rejected even when it reports the same name.
    /// Wildcards stack as fallbacks. Any other conflict is rejected and the
    /// existing binding is left untouched.
    pub fn register(
        &self,
        decoder: impl Into<BuiltinDecoder>,
        kind: TransportKind,
        range: KeyRange,
    ) -> Result<(), MuxError> {
        let decoder = decoder.into();
        let mut seq = self.writer.lock();
        let current = self.table.load_full();

        let entries = current.buckets.get(&kind).map(Vec::as_slice).unwrap_or_default();
        for entry in entries {
            if entry.range == range {
                if entry.decoder.same_decoder(&decoder) {
                    return Ok(());
                }
                if range != KeyRange::Any {
                    return Err(MuxError::DuplicateBinding {
                        kind,
                        range,
                        existing: entry.decoder.name(),
                        requested: decoder.name(),
                    });
                }
            } else if range != KeyRange::Any
                && entry.range != KeyRange::Any
                && entry.range.width() == range.width()
                && entry.range.overlaps(&range)
            {
                return Err(MuxError::OverlappingBinding {
                    kind,
                    range,
                    other: entry.range,
                    existing: entry.decoder.name(),
                });
            }
        }

        *seq += 1;
        let name = decoder.name();
        let mut next = MuxTable::clone(&current);
        let bucket = next.buckets.entry(kind).or_default();
        bucket.push(Arc::new(MuxEntry {
            range,
            decoder,
            parser: OnceLock::new(),
            seq: *seq,
        }));
        bucket.sort_by_key(|e| e.rank());
        self.table.store(Arc::new(next));

        debug!(%kind, %range, decoder = name, "decoder bound");
        Ok(())
    }

    /// Remove the binding of `decoder` (by name) to exactly `range`.
    ///
    /// The decoder object is released once the last snapshot referencing the
    /// entry goes away. Returns whether a binding was removed.
    pub fn unregister(&self, decoder: &str, kind: TransportKind, range: KeyRange) -> bool {
        let _writer = self.writer.lock();
        let current = self.table.load_full();
        let Some(entries) = current.buckets.get(&kind) else {
            return false;
        };
        let Some(pos) = entries
            .iter()
            .position(|e| e.range == range && e.decoder.name() == decoder)
        else {
            return false;
        };

        let mut next = MuxTable::clone(&current);
        if let Some(bucket) = next.buckets.get_mut(&kind) {
            bucket.remove(pos);
            if bucket.is_empty() {
                next.buckets.remove(&kind);
            }
        }
        self.table.store(Arc::new(next));

        debug!(%kind, %range, decoder, "decoder unbound");
        true
    }

    /// Most specific decoder object bound to `key`, creating it on first use.
    pub fn resolve(&self, kind: TransportKind, key: u32) -> Option<Ref<Parser>> {
        let table = self.table.load();
        let entry = table
            .buckets
            .get(&kind)?
            .iter()
            .find(|e| e.range.contains(key))?;
        Some(entry.parser(&self.domain))
    }

    /// Resolve over several candidate keys (e.g. destination then source
    /// port). The most specific match across all keys wins; on a tie, the
    /// earlier key.
    pub fn resolve_any(&self, kind: TransportKind, keys: &[u32]) -> Option<Ref<Parser>> {
        let table = self.table.load();
        let entries = table.buckets.get(&kind)?;

        let mut best: Option<(&Arc<MuxEntry>, (u64, u64, usize))> = None;
        for (i, key) in keys.iter().enumerate() {
            let Some(entry) = entries.iter().find(|e| e.range.contains(*key)) else {
                continue;
            };
            let (width, seq) = entry.rank();
            let rank = (width, seq, i);
            if best.map_or(true, |(_, r)| (rank.0, rank.2) < (r.0, r.2)) {
                best = Some((entry, rank));
            }
        }
        best.map(|(entry, _)| entry.parser(&self.domain))
    }

    /// Declare an expected connection, valid for `ttl_us` from `now`.
    pub fn dynamic_expect(&self, expectation: Expectation, ttl_us: i64, now: i64) {
        self.expectations.insert(expectation, ttl_us, now);
    }

    /// Remove and return the requester of the best expectation matching
    /// `flow`. At most one caller ever receives a given expectation.
    pub fn consume_if_matching(&self, flow: &ObservedFlow, now: i64) -> Option<Ref<Parser>> {
        self.expectations.consume_if_matching(flow, now)
    }

    pub fn expectations(&self) -> &ExpectationTable {
        &self.expectations
    }

    /// Current bindings, grouped by kind, most specific first.
    pub fn bindings(&self) -> Vec<Binding> {
        let table = self.table.load();
        let mut kinds: Vec<_> = table.buckets.keys().copied().collect();
        kinds.sort();
        kinds
            .into_iter()
            .flat_map(|kind| {
                table.buckets[&kind].iter().map(move |e| Binding {
                    kind,
                    range: e.range,
                    decoder: e.decoder.name(),
                    instantiated: e.parser.get().is_some(),
                })
            })
            .collect()
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.table.load().buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Muxer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Muxer")
            .field("bindings", &self.len())
            .field("expectations", &self.expectations.len())
            .finish()
    }
}
