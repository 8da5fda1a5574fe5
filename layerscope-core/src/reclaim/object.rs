//! Reference-counted domain objects.
//!
//! Every object is a heap [`Slot`] made of a [`Header`] followed by the
//! value. The header packs the reference count and the death-row marker in a
//! single atomic word so that "count reached zero" and "queue it" happen as
//! one transition.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Weak;

use super::region::SharedGuard;
use super::{fatal, DomainInner};
use crate::error::RefcountInvariantViolation;

const ROW_MASK: usize = 0b11;
const COUNT_SHIFT: u32 = 2;
const COUNT_ONE: usize = 1 << COUNT_SHIFT;

/// Death-row marker carried by every object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    /// Not on death row
    NotQueued,
    /// Linked into the death-row queue
    Queued,
    /// Taken off the queue by the reclaimer and about to be destroyed
    Draining,
}

impl RowState {
    fn of(word: usize) -> Self {
        match word & ROW_MASK {
            0 => RowState::NotQueued,
            1 => RowState::Queued,
            _ => RowState::Draining,
        }
    }

    fn bits(self) -> usize {
        match self {
            RowState::NotQueued => 0,
            RowState::Queued => 1,
            RowState::Draining => 2,
        }
    }
}

#[inline]
fn count_of(word: usize) -> usize {
    word >> COUNT_SHIFT
}

pub(crate) struct Header {
    state: AtomicUsize,
    domain: Weak<DomainInner>,
    domain_id: u64,
    type_name: &'static str,
    destroy: unsafe fn(NonNull<Header>),
}

#[repr(C)]
pub(crate) struct Slot<T> {
    header: Header,
    value: T,
}

unsafe fn destroy_slot<T>(header: NonNull<Header>) {
    // SAFETY: the header is the first field of a `#[repr(C)] Slot<T>` that
    // was allocated with `Box::new` in `allocate`.
    drop(unsafe { Box::from_raw(header.cast::<Slot<T>>().as_ptr()) });
}

/// What the reclaimer decided for one death-row entry.
pub(crate) enum Verdict {
    Destroyed,
    Rescued,
}

/// A death-row entry. Only ever handled under the death-row lock or by the
/// reclaimer.
pub(crate) struct Doomed(NonNull<Header>);

// SAFETY: objects are `Send + Sync` (enforced by `Ref`), and a `Doomed`
// entry is only dereferenced by the thread currently draining the queue.
unsafe impl Send for Doomed {}

impl Doomed {
    pub(crate) fn type_name(&self) -> &'static str {
        // SAFETY: queued objects stay allocated until `reap` destroys them.
        unsafe { self.0.as_ref() }.type_name
    }

    /// Destroy the object if nobody revived it while it sat on death row.
    ///
    /// # Safety
    ///
    /// Callers must hold the exclusive region of the owning domain, or be
    /// tearing the domain down with no other thread left to touch it.
    pub(crate) unsafe fn reap(self) -> Verdict {
        // SAFETY: see above; the object is still allocated.
        let header = unsafe { self.0.as_ref() };
        let type_name = header.type_name;
        let previous = header
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                if RowState::of(word) != RowState::Queued {
                    return None;
                }
                let count = word & !ROW_MASK;
                if count_of(word) == 0 {
                    Some(count | RowState::Draining.bits())
                } else {
                    Some(count | RowState::NotQueued.bits())
                }
            })
            .unwrap_or_else(|_| fatal(RefcountInvariantViolation::NotQueued { type_name }));

        if count_of(previous) == 0 {
            // SAFETY: the count is zero and the marker is Draining, so no
            // `Ref` exists and no new one can be made.
            unsafe { (header.destroy)(self.0) };
            Verdict::Destroyed
        } else {
            Verdict::Rescued
        }
    }

    /// Destroy unconditionally. Only used once the owning domain is gone.
    unsafe fn destroy_orphan(self) {
        // SAFETY: the count is zero and the domain, the only other place that
        // could reach the object, no longer exists.
        unsafe {
            let destroy = self.0.as_ref().destroy;
            destroy(self.0)
        }
    }
}

pub(crate) fn allocate<T: Send + Sync + 'static>(
    domain: Weak<DomainInner>,
    domain_id: u64,
    value: T,
) -> Ref<T> {
    let slot = Box::new(Slot {
        header: Header {
            state: AtomicUsize::new(COUNT_ONE),
            domain,
            domain_id,
            type_name: std::any::type_name::<T>(),
            destroy: destroy_slot::<T>,
        },
        value,
    });
    Ref {
        ptr: NonNull::from(Box::leak(slot)),
        _marker: PhantomData,
    }
}

fn acquire_header(header: &Header) {
    let previous = header.state.fetch_add(COUNT_ONE, Ordering::Relaxed);
    if RowState::of(previous) == RowState::Draining {
        fatal(RefcountInvariantViolation::UseAfterReclaim {
            type_name: header.type_name,
        });
    }
}

fn release_header(ptr: NonNull<Header>) {
    // SAFETY: the caller owns one reference, so the object is alive.
    let header = unsafe { ptr.as_ref() };
    let previous = header
        .state
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
            if count_of(word) == 0 {
                return None;
            }
            let next = word - COUNT_ONE;
            if count_of(next) == 0 && RowState::of(next) == RowState::NotQueued {
                Some(next | RowState::Queued.bits())
            } else {
                Some(next)
            }
        })
        .unwrap_or_else(|_| {
            fatal(RefcountInvariantViolation::Underflow {
                type_name: header.type_name,
            })
        });

    // Only the release that flips the marker enqueues. A rescued object that
    // drops back to zero while still queued is already on death row.
    if count_of(previous) == 1 && RowState::of(previous) == RowState::NotQueued {
        condemn(ptr, header);
    }
}

fn condemn(ptr: NonNull<Header>, header: &Header) {
    let doomed = Doomed(ptr);
    match header.domain.upgrade() {
        Some(domain) => domain.condemn(doomed),
        // SAFETY: the domain is gone and this was the last reference.
        None => unsafe { doomed.destroy_orphan() },
    }
}

/// A counted reference to an object owned by a [`ReclaimDomain`].
///
/// Cloning acquires, dropping releases. The release that takes the count to
/// zero moves the object to death row; it is only freed after a later
/// quiescence barrier.
///
/// [`ReclaimDomain`]: super::ReclaimDomain
pub struct Ref<T: Send + Sync + 'static> {
    ptr: NonNull<Slot<T>>,
    _marker: PhantomData<Slot<T>>,
}

// SAFETY: `T: Send + Sync` and the count is atomic.
unsafe impl<T: Send + Sync + 'static> Send for Ref<T> {}
// SAFETY: as above.
unsafe impl<T: Send + Sync + 'static> Sync for Ref<T> {}

impl<T: Send + Sync + 'static> Ref<T> {
    fn header(&self) -> &Header {
        // SAFETY: we hold a reference, so the slot is alive.
        unsafe { &self.ptr.as_ref().header }
    }

    /// Current reference count. Only a hint under concurrency.
    pub fn count(this: &Self) -> usize {
        count_of(this.header().state.load(Ordering::Acquire))
    }

    /// Death-row marker of the object.
    pub fn row_state(this: &Self) -> RowState {
        RowState::of(this.header().state.load(Ordering::Acquire))
    }

    /// Whether two references point to the same object.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        a.ptr == b.ptr
    }

    /// Borrow the object without touching the count, for as long as `guard`
    /// keeps this thread in a shared region.
    pub fn bare<'g>(this: &Self, guard: &'g SharedGuard<'_>) -> Bare<'g, T> {
        assert_eq!(
            this.header().domain_id,
            guard.domain_id(),
            "bare reference requested under another domain's shared region"
        );
        Bare {
            ptr: this.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Clone for Ref<T> {
    fn clone(&self) -> Self {
        acquire_header(self.header());
        Ref {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Drop for Ref<T> {
    fn drop(&mut self) {
        release_header(self.ptr.cast::<Header>());
    }
}

impl<T: Send + Sync + 'static> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: we hold a reference, so the slot is alive.
        unsafe { &self.ptr.as_ref().value }
    }
}

impl<T: Send + Sync + fmt::Debug + 'static> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("count", &Ref::count(self))
            .field("value", &**self)
            .finish()
    }
}

/// An uncounted reference that is valid while its shared region lasts.
///
/// This is the cheap way to touch a domain object on a hot path: the
/// reclaimer cannot free anything until the region is left, even if the
/// last counted reference is dropped in the meantime.
pub struct Bare<'g, T: Send + Sync + 'static> {
    ptr: NonNull<Slot<T>>,
    _marker: PhantomData<(&'g T, *const ())>,
}

impl<T: Send + Sync + 'static> Bare<'_, T> {
    /// Turn the bare reference into a counted one.
    ///
    /// This may revive an object whose count already dropped to zero; the
    /// reclaimer then takes it back off death row instead of freeing it.
    pub fn acquire(&self) -> Ref<T> {
        // SAFETY: the shared region keeps the slot alive.
        acquire_header(unsafe { &self.ptr.as_ref().header });
        Ref {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: Send + Sync + 'static> Clone for Bare<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Send + Sync + 'static> Copy for Bare<'_, T> {}

impl<T: Send + Sync + 'static> Deref for Bare<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the shared region keeps the slot alive.
        unsafe { &self.ptr.as_ref().value }
    }
}
