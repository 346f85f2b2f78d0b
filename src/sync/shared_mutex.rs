//! A one-word reader/writer lock with a counted shared side.
//!
//! A single `AtomicUsize` encodes both sides: the highest bit is the
//! exclusive flag, the remaining bits count shared holders. Shared
//! acquisition is a single `fetch_add` in the uncontended case; exclusive
//! acquisition sets the flag and then spins until the shared count drains.
//!
//! # Fairness
//!
//! The lock is not fair. A continuous shower of readers can starve a
//! writer indefinitely; callers must keep exclusive sections rare and
//! short. The queue does: it only goes exclusive to grow storage or rewind
//! counters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Exclusive flag, packed into the highest bit of the lock word.
const EXCLUSIVE: usize = 1 << (usize::BITS - 1);

/// Reader/writer lock packed into one atomic word.
///
/// # Example
///
/// ```
/// use conveyor::SharedMutex;
///
/// let lock = SharedMutex::new();
///
/// let guard = lock.lock_shared();
/// assert_eq!(lock.use_count(), 1);
/// drop(guard);
///
/// let value = lock.exclusive(|| 7);
/// assert_eq!(value, 7);
/// ```
pub struct SharedMutex {
    state: AtomicUsize,
}

impl SharedMutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicUsize::new(0),
        }
    }

    /// Acquires the shared side, spinning while a writer holds the lock.
    ///
    /// On return the exclusive flag is clear and this thread is counted in
    /// [`use_count`](Self::use_count). The count is released when the guard
    /// drops.
    #[must_use]
    pub fn lock_shared(&self) -> SharedGuard<'_> {
        loop {
            let prev = self.state.fetch_add(1, Ordering::Acquire);
            if prev & EXCLUSIVE == 0 {
                return SharedGuard { lock: self };
            }
            // Backed into a writer. Undo the increment before waiting so
            // the writer's drain loop does not count a thread that is only
            // queued, then retry once the flag clears.
            self.state.fetch_sub(1, Ordering::Relaxed);
            while self.state.load(Ordering::Relaxed) & EXCLUSIVE != 0 {
                thread::yield_now();
            }
        }
    }

    /// Acquires the exclusive side.
    ///
    /// Spins until this thread wins the writer race, then spins until all
    /// in-flight shared holders drain. New shared acquisitions observe the
    /// flag and back out, so the drain terminates.
    #[must_use]
    pub fn lock(&self) -> ExclusiveGuard<'_> {
        while self.state.fetch_or(EXCLUSIVE, Ordering::Acquire) & EXCLUSIVE != 0 {
            thread::yield_now();
        }
        while self.use_count() != 0 {
            thread::yield_now();
        }
        ExclusiveGuard { lock: self }
    }

    /// Number of shared holders. Meaningful while no writer is mid-drain;
    /// otherwise it still bounds the holders a writer is waiting out.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.state.load(Ordering::Acquire) & !EXCLUSIVE
    }

    /// Runs `f` while holding the exclusive side.
    ///
    /// The lock is released on all exit paths, including unwinding out of
    /// `f`.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = self.lock();
        f()
    }
}

impl Default for SharedMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared-side hold. Decrements the holder count on drop.
#[must_use]
pub struct SharedGuard<'a> {
    lock: &'a SharedMutex,
}

impl Drop for SharedGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.fetch_sub(1, Ordering::Release);
    }
}

/// Exclusive-side hold. Clears the flag on drop.
#[must_use]
pub struct ExclusiveGuard<'a> {
    lock: &'a SharedMutex,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.lock.state.fetch_and(!EXCLUSIVE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_shared_holders_are_counted() {
        let lock = SharedMutex::new();
        assert_eq!(lock.use_count(), 0);

        let a = lock.lock_shared();
        let b = lock.lock_shared();
        assert_eq!(lock.use_count(), 2);

        drop(a);
        assert_eq!(lock.use_count(), 1);
        drop(b);
        assert_eq!(lock.use_count(), 0);
    }

    #[test]
    fn test_exclusive_returns_closure_value() {
        let lock = SharedMutex::new();
        assert_eq!(lock.exclusive(|| 42), 42);
        assert_eq!(lock.use_count(), 0);
    }

    #[test]
    fn test_exclusive_observes_zero_shared_holders() {
        // Instrument the shared critical section with a plain counter and
        // assert every exclusive section sees it at zero.
        let lock = Arc::new(SharedMutex::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let iterations = 2_000;

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..iterations {
                        let guard = lock.lock_shared();
                        inside.fetch_add(1, Ordering::Relaxed);
                        std::hint::spin_loop();
                        inside.fetch_sub(1, Ordering::Relaxed);
                        drop(guard);
                    }
                })
            })
            .collect();

        let writers: Vec<_> = (0..2)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..200 {
                        lock.exclusive(|| {
                            assert_eq!(inside.load(Ordering::Relaxed), 0);
                        });
                        thread::yield_now();
                    }
                })
            })
            .collect();

        for handle in readers.into_iter().chain(writers) {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_readers_back_out_while_writer_holds() {
        let lock = Arc::new(SharedMutex::new());
        let released = Arc::new(AtomicUsize::new(0));

        let writer_lock = Arc::clone(&lock);
        let writer_released = Arc::clone(&released);
        let writer = thread::spawn(move || {
            writer_lock.exclusive(|| {
                thread::sleep(Duration::from_millis(50));
                writer_released.store(1, Ordering::Release);
            });
        });

        // Give the writer time to take the lock.
        thread::sleep(Duration::from_millis(10));

        let guard = lock.lock_shared();
        assert_eq!(
            released.load(Ordering::Acquire),
            1,
            "shared acquisition must wait out the writer"
        );
        drop(guard);

        writer.join().unwrap();
    }

    #[test]
    fn test_lock_released_after_panic_in_exclusive() {
        let lock = SharedMutex::new();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            lock.exclusive(|| panic!("boom"));
        }));
        assert!(result.is_err());

        // The guard must have released on unwind; both sides are usable.
        lock.exclusive(|| ());
        drop(lock.lock_shared());
    }

    #[test]
    fn test_writers_serialize() {
        let lock = Arc::new(SharedMutex::new());
        let counter = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        lock.exclusive(|| {
                            // Non-atomic read-modify-write; only sound if
                            // exclusive sections never overlap.
                            let seen = counter.load(Ordering::Relaxed);
                            counter.store(seen + 1, Ordering::Relaxed);
                        });
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::Relaxed), 4_000);
    }
}
