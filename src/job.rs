//! Job capability abstraction.
//!
//! The queue is payload-agnostic; a job system runs it with boxed
//! callables. [`Job`] is the one-method capability a worker needs:
//! consume the box, run the work.

/// A unit of work that can be executed exactly once.
///
/// Blanket-implemented for closures, so any `FnOnce() + Send` can be
/// boxed straight into a queue of `Box<dyn Job>`.
pub trait Job: Send {
    /// Consumes the job and runs it.
    fn invoke(self: Box<Self>);
}

impl<F: FnOnce() + Send> Job for F {
    fn invoke(self: Box<Self>) {
        (*self)()
    }
}
