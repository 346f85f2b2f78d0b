//! MPMC unbounded FIFO queue.
//!
//! A multi-producer multi-consumer queue over a growable slot array,
//! intended as the hot path of a job system.
//!
//! # Algorithm
//!
//! - Producers reserve a slot id with a single `fetch_add` on the write
//!   counter, then commit the payload and publish the slot as ready.
//! - Consumers scan from the read counter and claim the first ready slot
//!   with a CAS; the claim order across producers is the id order.
//! - The consumer that claimed the current head sweeps contiguous claimed
//!   slots back to empty and advances the read counter past them.
//! - When a sweep drains the queue (`read == write`), both counters rewind
//!   to zero so the same slots are reused from the front. This is what
//!   keeps the array bounded in steady state.
//! - A producer whose id lands past the end of the array doubles it first.
//!
//! Slot traffic runs under the shared side of a [`SharedMutex`]; only the
//! two structural operations, growth and the counter rewind, take the
//! exclusive side. The common path therefore adds a shared acquire and
//! release on the lock word to the slot operations themselves, never a
//! full mutex.
//!
//! # Ordering
//!
//! Ids are assigned strict FIFO across producers and claimed in id order
//! within a scan, but a slow consumer can complete after a faster one that
//! claimed a higher id. Delivery is FIFO per claim, not across concurrent
//! consumers.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use conveyor::Fifo;
//!
//! let queue = Arc::new(Fifo::new());
//!
//! let producer = {
//!     let queue = Arc::clone(&queue);
//!     thread::spawn(move || {
//!         for i in 0..100u64 {
//!             queue.push(i).unwrap();
//!         }
//!     })
//! };
//!
//! producer.join().unwrap();
//!
//! let mut drained = Vec::new();
//! queue.pop_all(&mut drained);
//! assert_eq!(drained.len(), 100);
//! assert!(queue.is_empty());
//! ```

mod slot;

use std::cell::UnsafeCell;
use std::cmp;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::sync::shared_mutex::SharedMutex;
use self::slot::Slot;

/// Initial slot count used by [`Fifo::new`].
pub const DEFAULT_CAPACITY: usize = 1024;

/// Error returned by [`Fifo::push`] when the id space is exhausted.
///
/// Carries the rejected payload back to the caller. Only reachable after
/// `usize::MAX` reservations without an intervening drain, so on 64-bit
/// targets it is a theoretical condition.
#[derive(thiserror::Error)]
#[error("queue id space exhausted")]
pub struct QueueFull<V>(pub V);

impl<V> fmt::Debug for QueueFull<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueFull(..)")
    }
}

/// Pads a value out to its own cache line to avoid false sharing between
/// the producer and consumer cursors.
#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Multi-producer multi-consumer unbounded FIFO queue.
///
/// All operations take `&self`; share the queue between threads with
/// `Arc`. See the [module docs](self) for the algorithm.
pub struct Fifo<V> {
    /// Next id a producer will reserve. Monotonic except at the rewind.
    write: CachePadded<AtomicUsize>,
    /// Next id a consumer will examine. Monotonic except at the rewind.
    read: CachePadded<AtomicUsize>,
    /// Current length of `storage`. Grows monotonically, never shrinks.
    size: AtomicUsize,
    /// Slot array. Read through `&` under the shared lock; resized through
    /// `&mut` only inside an exclusive section, which is what makes the
    /// `UnsafeCell` sound.
    storage: UnsafeCell<Vec<Slot<V>>>,
    /// Guards the storage identity and the counter rewind against slot
    /// traffic. Never guards individual payloads; slot states do that.
    lock: SharedMutex,
}

// SAFETY: payloads move through the queue by value and every slot cell is
// handed to exactly one thread at a time by the slot state machine, so
// sharing the queue only requires `V: Send`.
unsafe impl<V: Send> Send for Fifo<V> {}
unsafe impl<V: Send> Sync for Fifo<V> {}

impl<V> Fifo<V> {
    /// Creates a queue with [`DEFAULT_CAPACITY`] slots.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a queue with `initial` slots.
    ///
    /// Zero is allowed; the first push grows the array to one slot.
    #[must_use]
    pub fn with_capacity(initial: usize) -> Self {
        let mut storage = Vec::new();
        storage.resize_with(initial, Slot::new);
        Self {
            write: CachePadded(AtomicUsize::new(0)),
            read: CachePadded(AtomicUsize::new(0)),
            size: AtomicUsize::new(initial),
            storage: UnsafeCell::new(storage),
            lock: SharedMutex::new(),
        }
    }

    /// Enqueues one value at the logical tail.
    ///
    /// May grow the backing array when producers have outrun it.
    ///
    /// # Errors
    ///
    /// [`QueueFull`] iff the write counter has reached `usize::MAX`,
    /// returning the value to the caller.
    pub fn push(&self, value: V) -> Result<(), QueueFull<V>> {
        if self.write.load(Ordering::Relaxed) == usize::MAX {
            return Err(QueueFull(value));
        }

        // Reserve the slot id. From here on this thread owns the
        // EMPTY -> READY transition for `id`.
        let id = self.write.fetch_add(1, Ordering::AcqRel);

        if id >= self.size.load(Ordering::Acquire) {
            // Growth can unwind (capacity overflow). Consumers must never
            // wait on a reserved slot that will not be committed, so mark
            // it claimed if we fall out of here.
            let reservation = AbandonReservation { fifo: self, id };
            self.grow_storage(id);
            mem::forget(reservation);
        }

        let guard = self.lock.lock_shared();
        // SAFETY: shared holders may read the array; resizes take the
        // exclusive side and wait for us to drop the guard.
        let slots = unsafe { &*self.storage.get() };
        // SAFETY: the `fetch_add` above made this thread the sole owner of
        // the EMPTY -> READY transition for `id`, and `grow_storage`
        // guaranteed `id < slots.len()`.
        unsafe { slots[id].commit(value) };
        drop(guard);

        Ok(())
    }

    /// Dequeues one value, if any slot is ready.
    ///
    /// Returns `None` when there is nothing to claim right now; never
    /// blocks indefinitely.
    #[must_use]
    pub fn pop(&self) -> Option<V> {
        let guard = self.lock.lock_shared();
        // SAFETY: shared holders may read the array; resizes take the
        // exclusive side and wait for us to drop the guard.
        let slots = unsafe { &*self.storage.get() };

        // Ids past `size` have not been committed yet (their producers are
        // still growing the array), so the scan stops at the shorter of
        // the two bounds.
        let limit = cmp::min(
            self.write.load(Ordering::Acquire),
            self.size.load(Ordering::Acquire),
        );

        let mut id = self.read.load(Ordering::Acquire);
        while id < limit {
            if let Some(value) = slots[id].claim() {
                if self.read.load(Ordering::Acquire) == id {
                    if self.sweep_head(id, slots) {
                        drop(guard);
                        self.reset_counters();
                    }
                } else {
                    // Claimed ahead of the head; give the thread holding
                    // the head a chance to finish before handing back.
                    thread::yield_now();
                }
                return Some(value);
            }
            id += 1;
        }

        // Nothing claimable. A head claimer's single check above can lose
        // its race with a concurrent sweep and leave a claimed slot parked
        // at the head; reclaim it here so `read` cannot stall behind
        // completed work.
        if self.sweep_head(self.read.load(Ordering::Acquire), slots) {
            drop(guard);
            self.reset_counters();
        }
        None
    }

    /// Drains the queue into `sink` until a pop comes up empty.
    ///
    /// Best effort, not atomic: concurrent producers may enqueue more
    /// items mid-drain.
    pub fn pop_all(&self, sink: &mut Vec<V>) {
        while let Some(value) = self.pop() {
            sink.push(value);
        }
    }

    /// Whether the queue is logically empty. Observably racy,
    /// informational only.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read.load(Ordering::Acquire) == self.write.load(Ordering::Acquire)
    }

    /// Current slot count. Observably racy, informational only.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Discards all pending values and rewinds both counters to zero.
    ///
    /// Pending payloads are dropped. Concurrent consumers are safe.
    /// Producers must be quiescent: a push that has reserved an id but not
    /// yet committed it cannot be told apart from consumed history, so its
    /// payload would land on a recycled slot. A reservation that slips in
    /// between the purge and the rewind is kept (the rewind backs off
    /// rather than orphan it).
    pub fn clear(&self) {
        self.lock.exclusive(|| {
            // SAFETY: exclusive section with zero shared holders; nothing
            // else touches the array.
            let slots = unsafe { &mut *self.storage.get() };
            for slot in slots.iter_mut() {
                slot.purge();
            }

            let write = self.write.load(Ordering::Relaxed);
            // Producers reserve ids with a bare fetch_add, outside any
            // lock, so rewind via CAS: if a reservation slipped in, leave
            // `write` alone and park `read` at the pre-race tail instead.
            // Everything below it is purged, everything at or above it
            // belongs to the racing producers.
            if self
                .write
                .compare_exchange(write, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.read.store(0, Ordering::Relaxed);
            } else {
                self.read.store(write, Ordering::Relaxed);
            }
        });
    }

    /// Reclaims contiguous claimed slots starting at `id` and advances the
    /// read counter past them.
    ///
    /// Concurrent sweeps are safe: the per-slot CAS lets exactly one
    /// thread count each slot. Returns true when this sweep reclaimed
    /// something and left the queue drained, i.e. the caller should try a
    /// counter rewind.
    fn sweep_head(&self, mut id: usize, slots: &[Slot<V>]) -> bool {
        let mut advanced = false;
        while id < slots.len() && slots[id].reclaim() {
            self.read.fetch_add(1, Ordering::AcqRel);
            advanced = true;
            id += 1;
        }
        advanced && self.read.load(Ordering::Acquire) == self.write.load(Ordering::Acquire)
    }

    /// Rewinds both counters to zero if the queue is still drained.
    ///
    /// Caller must not hold the shared lock.
    fn reset_counters(&self) {
        self.lock.exclusive(|| {
            let read = self.read.load(Ordering::Relaxed);
            if read != self.write.load(Ordering::Relaxed) {
                // A producer reserved a new id since the drain check.
                return;
            }
            // The reservation fetch_add runs outside any lock, so the
            // rewind must CAS: a failure means a producer slipped in
            // between the check and the rewind, and its id must survive.
            if self
                .write
                .compare_exchange(read, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.read.store(0, Ordering::Relaxed);
            }
        });
    }

    /// Grows the array until `id` is in range.
    ///
    /// Ids are dense, so exactly one producer holds `id == size`; it
    /// doubles the array inside an exclusive section while the rest yield
    /// until the new size lands.
    fn grow_storage(&self, id: usize) {
        loop {
            let size = self.size.load(Ordering::Acquire);
            if size > id {
                return;
            }
            if size == id {
                self.lock.exclusive(|| {
                    let size = self.size.load(Ordering::Relaxed);
                    if size > id {
                        return;
                    }
                    // SAFETY: exclusive section with zero shared holders;
                    // nothing else touches the array during the resize.
                    let slots = unsafe { &mut *self.storage.get() };
                    let new_size = cmp::max(1, size * 2);
                    slots.resize_with(new_size, Slot::new);
                    self.size.store(new_size, Ordering::Release);
                });
            } else {
                thread::yield_now();
            }
        }
    }
}

impl<V> Default for Fifo<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for Fifo<V> {
    fn drop(&mut self) {
        for slot in self.storage.get_mut() {
            slot.purge();
        }
    }
}

/// Unwind guard armed across the growth call in `push`: a reserved id
/// whose push never commits must still be marked claimed, or consumers
/// would wait on it forever.
struct AbandonReservation<'a, V> {
    fifo: &'a Fifo<V>,
    id: usize,
}

impl<V> Drop for AbandonReservation<'_, V> {
    fn drop(&mut self) {
        let _guard = self.fifo.lock.lock_shared();
        // SAFETY: shared holders may read the array; see `Fifo::push`.
        let slots = unsafe { &*self.fifo.storage.get() };
        // If the growth itself failed the slot does not exist yet, and
        // there is nothing to mark.
        if let Some(slot) = slots.get(self.id) {
            slot.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_push_pop_roundtrip() {
        let queue = Fifo::new();

        queue.push(1u64).unwrap();
        queue.push(2).unwrap();
        queue.push(3).unwrap();

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_pop_empty_returns_none() {
        let queue: Fifo<u64> = Fifo::new();
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_all_drains_in_order() {
        let queue = Fifo::new();
        for i in 0..10u64 {
            queue.push(i).unwrap();
        }

        let mut sink = vec![100u64];
        queue.pop_all(&mut sink);

        // The sink is appended to, never rewritten.
        assert_eq!(sink[0], 100);
        assert_eq!(&sink[1..], (0..10).collect::<Vec<_>>().as_slice());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_all_on_empty_leaves_sink_untouched() {
        let queue: Fifo<u64> = Fifo::new();
        let mut sink = vec![7u64];
        queue.pop_all(&mut sink);
        assert_eq!(sink, vec![7]);
    }

    #[test]
    fn test_counters_rewind_after_drain() {
        let queue = Fifo::with_capacity(8);

        for cycle in 0..5 {
            for i in 0..6u64 {
                queue.push(cycle * 10 + i).unwrap();
            }
            let mut sink = Vec::new();
            queue.pop_all(&mut sink);
            assert_eq!(sink.len(), 6);

            // The drain rewinds both counters, so five cycles of six items
            // never outgrow eight slots.
            assert_eq!(queue.read.load(Ordering::Acquire), 0);
            assert_eq!(queue.write.load(Ordering::Acquire), 0);
        }
        assert_eq!(queue.capacity(), 8);
    }

    #[test]
    fn test_grows_by_doubling_from_one() {
        let queue = Fifo::with_capacity(1);
        for i in 0..100u64 {
            queue.push(i).unwrap();
        }

        let capacity = queue.capacity();
        assert!(capacity >= 100);
        assert!(capacity.is_power_of_two());

        let mut sink = Vec::new();
        queue.pop_all(&mut sink);
        assert_eq!(sink, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_grows_from_zero_capacity() {
        let queue = Fifo::with_capacity(0);
        queue.push(42u64).unwrap();
        assert_eq!(queue.pop(), Some(42));
        assert!(queue.capacity() >= 1);
    }

    #[test]
    fn test_push_fails_when_id_space_exhausted() {
        let queue = Fifo::with_capacity(4);
        queue.write.store(usize::MAX, Ordering::Release);

        let err = queue.push(9u64).unwrap_err();
        assert_eq!(err.0, 9);
        // The counter must not have moved.
        assert_eq!(queue.write.load(Ordering::Acquire), usize::MAX);
    }

    #[test]
    fn test_clear_drops_pending_payloads() {
        let token = Arc::new(());
        let queue = Fifo::with_capacity(4);
        for _ in 0..3 {
            queue.push(Arc::clone(&token)).unwrap();
        }
        assert_eq!(Arc::strong_count(&token), 4);

        queue.clear();
        assert_eq!(Arc::strong_count(&token), 1);
        assert!(queue.is_empty());
        assert_eq!(queue.read.load(Ordering::Acquire), 0);
        assert_eq!(queue.write.load(Ordering::Acquire), 0);
        assert_eq!(queue.pop(), None);

        // The queue stays usable after a clear.
        queue.push(Arc::clone(&token)).unwrap();
        assert!(queue.pop().is_some());
    }

    #[test]
    fn test_drop_releases_pending_payloads() {
        let token = Arc::new(());
        {
            let queue = Fifo::with_capacity(2);
            queue.push(Arc::clone(&token)).unwrap();
            queue.push(Arc::clone(&token)).unwrap();
            queue.push(Arc::clone(&token)).unwrap(); // forces growth
            assert_eq!(Arc::strong_count(&token), 4);
        }
        assert_eq!(Arc::strong_count(&token), 1);
    }

    #[test]
    fn test_interleaved_push_pop() {
        let queue = Fifo::with_capacity(4);

        queue.push(1u64).unwrap();
        queue.push(2).unwrap();
        assert_eq!(queue.pop(), Some(1));
        queue.push(3).unwrap();
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        queue.push(4).unwrap();
        assert_eq!(queue.pop(), Some(4));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_non_copy_payload() {
        let queue = Fifo::new();
        queue.push(String::from("hello")).unwrap();
        queue.push(String::from("world")).unwrap();

        assert_eq!(queue.pop().as_deref(), Some("hello"));
        assert_eq!(queue.pop().as_deref(), Some("world"));
        assert_eq!(queue.pop(), None);
    }
}
