//! Delivery of parse outcomes to interested parties.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::ParseOutcome;

/// One dissected packet, as seen by subscribers.
#[derive(Debug)]
pub struct PacketEvent<'e, 'f> {
    pub outcome: &'e ParseOutcome<'f>,
    /// Capture timestamp in microseconds
    pub timestamp: i64,
    pub link_type: u32,
    /// The captured bytes of the whole frame
    pub data: &'f [u8],
    pub wire_len: usize,
}

impl PacketEvent<'_, '_> {
    pub fn captured_len(&self) -> usize {
        self.data.len()
    }
}

/// Receives every dissected packet, including partial ones.
///
/// Called on the worker thread that decoded the packet, possibly from
/// several threads at once.
pub trait Subscriber: Send + Sync {
    fn on_packet(&self, event: &PacketEvent<'_, '_>);
}

impl<F> Subscriber for F
where
    F: Fn(&PacketEvent<'_, '_>) + Send + Sync,
{
    fn on_packet(&self, event: &PacketEvent<'_, '_>) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

type Entries = Vec<(SubscriberId, Arc<dyn Subscriber>)>;

/// Subscriber list readable without locks while it is being changed.
pub struct SubscriberSet {
    entries: ArcSwap<Entries>,
    next_id: AtomicU64,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.rcu(|current| {
            let mut next = Entries::clone(current);
            next.push((id, subscriber.clone()));
            next
        });
        id
    }

    /// Remove a subscriber. Packets already being delivered may still reach
    /// it.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut found = false;
        self.entries.rcu(|current| {
            let next: Entries = current.iter().filter(|(i, _)| *i != id).cloned().collect();
            found = next.len() != current.len();
            next
        });
        found
    }

    pub fn notify(&self, event: &PacketEvent<'_, '_>) {
        for (_, subscriber) in self.entries.load().iter() {
            subscriber.on_packet(event);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}

impl Default for SubscriberSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("subscribers", &self.len())
            .finish()
    }
}
