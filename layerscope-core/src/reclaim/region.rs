//! Shared/exclusive quiescence regions.
//!
//! Workers sit in a shared region while they may hold bare references to
//! domain objects. The reclaimer takes the exclusive region, which is only
//! granted once every shared region entered before the request has been
//! left. Each grant bumps the region generation.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

thread_local! {
    /// Per-thread shared region nesting depth, keyed by domain id.
    static SHARED_DEPTH: RefCell<SmallVec<[(u64, usize); 4]>> = RefCell::new(SmallVec::new());
}

fn depth(domain_id: u64) -> usize {
    SHARED_DEPTH.with(|d| {
        d.borrow()
            .iter()
            .find(|(id, _)| *id == domain_id)
            .map_or(0, |(_, n)| *n)
    })
}

/// Adjust this thread's depth for `domain_id` and return the new depth.
fn bump_depth(domain_id: u64, up: bool) -> usize {
    SHARED_DEPTH.with(|d| {
        let mut d = d.borrow_mut();
        let pos = d.iter().position(|(id, _)| *id == domain_id);
        match (pos, up) {
            (Some(i), true) => {
                d[i].1 += 1;
                d[i].1
            }
            (None, true) => {
                d.push((domain_id, 1));
                1
            }
            (Some(i), false) => {
                d[i].1 -= 1;
                let left = d[i].1;
                if left == 0 {
                    d.swap_remove(i);
                }
                left
            }
            (None, false) => 0,
        }
    })
}

#[derive(Debug, Default)]
struct RegionState {
    shared: usize,
    exclusive: bool,
    exclusive_waiters: usize,
    generation: u64,
}

#[derive(Debug)]
pub(crate) struct Region {
    domain_id: u64,
    state: Mutex<RegionState>,
    cond: Condvar,
}

impl Region {
    pub(crate) fn new(domain_id: u64) -> Self {
        Self {
            domain_id,
            state: Mutex::new(RegionState::default()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub(crate) fn in_shared_region(&self) -> bool {
        depth(self.domain_id) > 0
    }

    pub(crate) fn enter_shared(&self) -> SharedGuard<'_> {
        // Nested entries never block, otherwise a waiting reclaimer would
        // deadlock against a thread it is already waiting on.
        if depth(self.domain_id) == 0 {
            let mut st = self.state.lock();
            while st.exclusive || st.exclusive_waiters > 0 {
                self.cond.wait(&mut st);
            }
            st.shared += 1;
        }
        bump_depth(self.domain_id, true);
        SharedGuard {
            region: self,
            _not_send: PhantomData,
        }
    }

    fn leave_shared(&self) {
        if bump_depth(self.domain_id, false) == 0 {
            let mut st = self.state.lock();
            st.shared -= 1;
            if st.shared == 0 {
                self.cond.notify_all();
            }
        }
    }

    pub(crate) fn enter_exclusive(&self) -> ExclusiveGuard<'_> {
        assert!(
            !self.in_shared_region(),
            "exclusive region requested from inside a shared region"
        );
        let mut st = self.state.lock();
        st.exclusive_waiters += 1;
        while st.exclusive || st.shared > 0 {
            self.cond.wait(&mut st);
        }
        st.exclusive_waiters -= 1;
        self.grant(&mut st)
    }

    pub(crate) fn enter_exclusive_timeout(&self, timeout: Duration) -> Option<ExclusiveGuard<'_>> {
        if self.in_shared_region() {
            return None;
        }
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        st.exclusive_waiters += 1;
        while st.exclusive || st.shared > 0 {
            if self.cond.wait_until(&mut st, deadline).timed_out() {
                st.exclusive_waiters -= 1;
                // Let shared entrants parked behind us through.
                self.cond.notify_all();
                return None;
            }
        }
        st.exclusive_waiters -= 1;
        Some(self.grant(&mut st))
    }

    pub(crate) fn try_enter_exclusive(&self) -> Option<ExclusiveGuard<'_>> {
        if self.in_shared_region() {
            return None;
        }
        let mut st = self.state.lock();
        if st.exclusive || st.shared > 0 {
            return None;
        }
        Some(self.grant(&mut st))
    }

    fn grant(&self, st: &mut RegionState) -> ExclusiveGuard<'_> {
        st.exclusive = true;
        st.generation += 1;
        ExclusiveGuard {
            region: self,
            generation: st.generation,
        }
    }

    fn leave_exclusive(&self) {
        let mut st = self.state.lock();
        st.exclusive = false;
        self.cond.notify_all();
    }
}

/// Proof that the current thread is inside a shared region.
///
/// Leaving happens on drop. The guard is neither `Send` nor `Sync`: the
/// region is a property of the thread that entered it.
#[must_use = "the shared region is left as soon as the guard is dropped"]
pub struct SharedGuard<'r> {
    region: &'r Region,
    _not_send: PhantomData<*const ()>,
}

impl SharedGuard<'_> {
    pub(crate) fn domain_id(&self) -> u64 {
        self.region.domain_id
    }
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        self.region.leave_shared();
    }
}

impl std::fmt::Debug for SharedGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedGuard")
            .field("domain", &self.region.domain_id)
            .finish()
    }
}

/// Proof that no thread is inside a shared region of this domain.
#[must_use = "the exclusive region is left as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ExclusiveGuard<'r> {
    region: &'r Region,
    generation: u64,
}

impl ExclusiveGuard<'_> {
    /// Generation this exclusive grant opened.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.region.leave_exclusive();
    }
}
