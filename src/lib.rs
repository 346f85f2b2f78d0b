//! A multi-producer multi-consumer unbounded FIFO queue for job systems.
//!
//! The hot path is [`Fifo`]: producers reserve slot ids with a single
//! `fetch_add`, consumers claim slots with a CAS, and the backing array
//! grows by doubling when producers outrun it. Structural changes (growth,
//! counter rewinds) are serialized through [`SharedMutex`], a one-word
//! reader/writer lock; everything else runs under its shared side.
//!
//! # Overview
//!
//! - [`Fifo`] - the MPMC queue
//! - [`SharedMutex`] - the shared/exclusive lock the queue's structural
//!   operations coordinate through
//! - [`Job`] / [`WorkerPool`] - a boxed-callable abstraction and a worker
//!   pool that drains a shared queue, for job-system use
//!
//! # Example
//!
//! ```
//! use conveyor::Fifo;
//!
//! let queue = Fifo::new();
//!
//! queue.push(1u64).unwrap();
//! queue.push(2).unwrap();
//!
//! assert_eq!(queue.pop(), Some(1));
//! assert_eq!(queue.pop(), Some(2));
//! assert_eq!(queue.pop(), None);
//! ```

pub mod fifo;
pub mod job;
pub mod pool;
pub mod sync;
pub mod trace;

pub use fifo::{Fifo, QueueFull};
pub use job::Job;
pub use pool::{PoolConfig, WorkerPool};
pub use sync::shared_mutex::SharedMutex;
