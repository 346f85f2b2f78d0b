//! Slot state machine for the MPMC FIFO.
//!
//! Each slot pairs a payload cell with a one-byte atomic state tag:
//!
//! ```text
//!          producer commit
//! EMPTY ────────────────────► READY
//!   ▲                           │
//!   │                           │ consumer claim (CAS)
//!   │                           ▼
//!   └──────────────────────── DONE
//!          head sweep (CAS)
//! ```
//!
//! Every transition is owned by exactly one party: the producer that
//! reserved the slot's id commits it, the consumer that wins the claim CAS
//! extracts it, and the head sweep reclaims it. The release store on
//! commit and the acquire CAS on claim are the happens-before edge that
//! carries the payload between threads.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU8, Ordering};

/// No payload; the slot is free for the producer that reserves its id.
const EMPTY: u8 = 0;
/// A producer committed a payload that no consumer has claimed yet.
const READY: u8 = 1;
/// A consumer extracted the payload; the slot awaits the head sweep.
const DONE: u8 = 2;

/// A cell in the queue's backing array.
pub(crate) struct Slot<V> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<V>>,
}

// SAFETY: the state machine hands the payload cell to exactly one thread
// at a time (see the module docs), so sharing `&Slot` across threads only
// requires the payload itself to be sendable.
unsafe impl<V: Send> Sync for Slot<V> {}
unsafe impl<V: Send> Send for Slot<V> {}

impl<V> Slot<V> {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Stores `value` and publishes the slot as ready.
    ///
    /// # Safety
    ///
    /// The caller must own the `EMPTY -> READY` transition: it reserved
    /// this slot's id from the write counter and no other thread touches
    /// the cell until a consumer claims it.
    pub(crate) unsafe fn commit(&self, value: V) {
        // SAFETY: sole writer per the contract above.
        unsafe {
            (*self.value.get()).write(value);
        }
        self.state.store(READY, Ordering::Release);
    }

    /// Attempts the `READY -> DONE` claim, moving the payload out on
    /// success.
    pub(crate) fn claim(&self) -> Option<V> {
        if self
            .state
            .compare_exchange(READY, DONE, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        // SAFETY: winning the CAS makes this thread the sole claimer, and
        // its acquire edge pairs with the committing producer's release
        // store, so the payload is initialized and fully visible.
        Some(unsafe { (*self.value.get()).assume_init_read() })
    }

    /// Attempts the `DONE -> EMPTY` reclamation performed by the head
    /// sweep. Returns whether this thread won the transition.
    pub(crate) fn reclaim(&self) -> bool {
        self.state
            .compare_exchange(DONE, EMPTY, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Marks a reserved-but-never-committed slot as claimed so consumers
    /// skip it and the head sweep can pass it. Used when a push unwinds
    /// after reserving an id.
    pub(crate) fn abandon(&self) {
        self.state.store(DONE, Ordering::Release);
    }

    /// Drops a committed payload, if any, and rewinds the slot to empty.
    ///
    /// Takes `&mut self`: callers are single-threaded over the array
    /// (queue teardown, or an exclusive section with zero shared holders).
    pub(crate) fn purge(&mut self) {
        if *self.state.get_mut() == READY {
            // SAFETY: READY means a committed, unclaimed payload, and
            // `&mut self` rules out any concurrent claimer.
            unsafe {
                self.value.get_mut().assume_init_drop();
            }
        }
        *self.state.get_mut() = EMPTY;
    }
}
