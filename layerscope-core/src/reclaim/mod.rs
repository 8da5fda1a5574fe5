//! Reference counting with deferred, quiescence-gated reclamation.
//!
//! Objects allocated in a [`ReclaimDomain`] are handed out as [`Ref`]s.
//! Dropping the last `Ref` does not free the object. It moves it to the
//! domain's death row, and the reclaimer frees death-row entries only while
//! it holds the exclusive region, i.e. once no worker can still be looking at
//! them through a [`Bare`] reference taken inside a shared region.
//!
//! ```text
//!  worker threads                      reclaimer
//!  --------------                      ---------
//!  enter_shared_region()
//!    touch Bare<T> / clone Ref<T>
//!    drop Ref<T> (count -> 0) ------>  death row
//!  leave (guard drop)
//!                                      enter_exclusive_region()
//!                                      drain death row, destroy count == 0
//!                                      leave
//! ```
//!
//! An object whose count is brought back above zero while it is queued (via
//! [`Bare::acquire`]) is rescued: the reclaimer takes it off death row
//! without destroying it.

mod object;
mod reclaimer;
mod region;

pub use object::{Bare, Ref, RowState};
pub use region::{ExclusiveGuard, SharedGuard};

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::error::{RefcountInvariantViolation, Result};
use object::{Doomed, Verdict};
use reclaimer::Reclaimer;
use region::Region;

static NEXT_DOMAIN_ID: AtomicU64 = AtomicU64::new(1);

/// Report a broken reference counting invariant and abort.
#[cold]
pub(crate) fn fatal(violation: RefcountInvariantViolation) -> ! {
    error!(%violation, "reference count invariant violated, aborting");
    std::process::abort()
}

/// Counters describing a domain's activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Objects allocated
    pub created: u64,
    /// Objects freed by the domain
    pub destroyed: u64,
    /// Death-row entries revived before they could be freed
    pub rescued: u64,
    /// Completed drain passes
    pub cycles: u64,
    /// Entries currently on death row
    pub pending: usize,
}

impl ReclaimStats {
    /// Objects allocated and not yet freed.
    pub fn live(&self) -> u64 {
        self.created - self.destroyed
    }
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    destroyed: AtomicU64,
    rescued: AtomicU64,
    cycles: AtomicU64,
}

pub(crate) struct DomainInner {
    id: u64,
    region: Region,
    death_row: Mutex<Vec<Doomed>>,
    stopped: AtomicBool,
    counters: Counters,
    reclaimer: Mutex<Option<Reclaimer>>,
}

impl DomainInner {
    fn new() -> Self {
        let id = NEXT_DOMAIN_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id,
            region: Region::new(id),
            death_row: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            counters: Counters::default(),
            reclaimer: Mutex::new(None),
        }
    }

    /// The only way onto death row.
    pub(crate) fn condemn(&self, doomed: Doomed) {
        self.death_row.lock().push(doomed);
        if self.stopped.load(Ordering::Acquire) {
            // No reclaimer any more: free right away if nobody is in a
            // shared region, otherwise leave it for teardown.
            if let Some(guard) = self.region.try_enter_exclusive() {
                self.drain(&guard);
            }
        }
    }

    /// Drain death row until it stays empty. Destructors may release more
    /// objects, which land back on the queue and are handled in the next
    /// pass.
    fn drain(&self, _proof: &ExclusiveGuard<'_>) -> usize {
        let mut freed = 0;
        loop {
            let batch = mem::take(&mut *self.death_row.lock());
            if batch.is_empty() {
                break;
            }
            for doomed in batch {
                freed += self.reap(doomed);
            }
        }
        self.counters.cycles.fetch_add(1, Ordering::Relaxed);
        freed
    }

    fn reap(&self, doomed: Doomed) -> usize {
        let type_name = doomed.type_name();
        // SAFETY: only called from `drain`, which holds the exclusive region.
        match unsafe { doomed.reap() } {
            Verdict::Destroyed => {
                self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
                1
            }
            Verdict::Rescued => {
                self.counters.rescued.fetch_add(1, Ordering::Relaxed);
                debug!(type_name, "object rescued from death row");
                0
            }
        }
    }

    pub(crate) fn collect(&self) -> usize {
        if self.region.in_shared_region() {
            debug!("collect skipped: caller is inside a shared region");
            return 0;
        }
        let guard = self.region.enter_exclusive();
        self.drain(&guard)
    }
}

impl Drop for DomainInner {
    fn drop(&mut self) {
        if let Some(reclaimer) = self.reclaimer.get_mut().take() {
            reclaimer.stop();
        }
        // Nobody else can reach the domain now. Releases triggered by the
        // destructors below find the domain gone and free immediately.
        let batch = mem::take(self.death_row.get_mut());
        for doomed in batch {
            // SAFETY: teardown is single-threaded.
            let _ = unsafe { doomed.reap() };
        }
    }
}

/// Owner of refcounted objects, their death row and their reclaimer.
///
/// Cloning a `ReclaimDomain` clones a handle to the same domain.
#[derive(Clone)]
pub struct ReclaimDomain {
    inner: Arc<DomainInner>,
}

impl ReclaimDomain {
    /// Create a domain with a background reclaimer that drains death row
    /// every `interval`.
    pub fn spawn(interval: Duration) -> Result<Self> {
        let domain = Self::manual();
        let reclaimer = Reclaimer::spawn(Arc::downgrade(&domain.inner), interval)?;
        *domain.inner.reclaimer.lock() = Some(reclaimer);
        Ok(domain)
    }

    /// Create a domain without a background thread. Death row is only
    /// drained by explicit [`collect`](Self::collect) calls.
    pub fn manual() -> Self {
        Self {
            inner: Arc::new(DomainInner::new()),
        }
    }

    /// Identifier of this domain, unique within the process.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Allocate `value` as a domain object with a count of one.
    pub fn alloc<T: Send + Sync + 'static>(&self, value: T) -> Ref<T> {
        self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
        object::allocate(Arc::downgrade(&self.inner), self.inner.id, value)
    }

    /// Enter a shared region. Leaving happens when the guard is dropped.
    /// Regions nest on the same thread.
    pub fn enter_shared_region(&self) -> SharedGuard<'_> {
        self.inner.region.enter_shared()
    }

    /// Block until no thread is inside a shared region, then hold the
    /// region alone.
    ///
    /// # Panics
    ///
    /// Panics when called from inside a shared region of this domain, which
    /// would otherwise deadlock.
    pub fn enter_exclusive_region(&self) -> ExclusiveGuard<'_> {
        self.inner.region.enter_exclusive()
    }

    /// Take the exclusive region only if it is free right now.
    pub fn try_enter_exclusive_region(&self) -> Option<ExclusiveGuard<'_>> {
        self.inner.region.try_enter_exclusive()
    }

    /// Whether the calling thread is inside a shared region of this domain.
    pub fn in_shared_region(&self) -> bool {
        self.inner.region.in_shared_region()
    }

    /// Number of exclusive grants so far.
    pub fn generation(&self) -> u64 {
        self.inner.region.generation()
    }

    /// Run one reclaim pass now and return the number of objects freed.
    /// Returns 0 without blocking when called from inside a shared region.
    pub fn collect(&self) -> usize {
        self.inner.collect()
    }

    /// Like [`collect`](Self::collect), but give up if the exclusive region
    /// cannot be obtained within `timeout`.
    pub fn collect_timeout(&self, timeout: Duration) -> Option<usize> {
        let guard = self.inner.region.enter_exclusive_timeout(timeout)?;
        Some(self.inner.drain(&guard))
    }

    /// Stop the background reclaimer and free whatever is queued.
    ///
    /// After this, objects reaching zero are freed on the spot when no
    /// shared region is held, and otherwise at domain teardown.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let reclaimer = self.inner.reclaimer.lock().take();
        if let Some(reclaimer) = reclaimer {
            reclaimer.stop();
        }
        let freed = self.collect();
        debug!(domain = self.inner.id, freed, "reclaim domain stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Entries currently waiting on death row.
    pub fn pending(&self) -> usize {
        self.inner.death_row.lock().len()
    }

    pub fn stats(&self) -> ReclaimStats {
        let c = &self.inner.counters;
        ReclaimStats {
            created: c.created.load(Ordering::Relaxed),
            destroyed: c.destroyed.load(Ordering::Relaxed),
            rescued: c.rescued.load(Ordering::Relaxed),
            cycles: c.cycles.load(Ordering::Relaxed),
            pending: self.pending(),
        }
    }
}

impl std::fmt::Debug for ReclaimDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReclaimDomain")
            .field("id", &self.inner.id)
            .field("stats", &self.stats())
            .finish()
    }
}
