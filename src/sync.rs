//! Synchronization primitives.
//!
//! This module provides the shared/exclusive lock the queue uses to
//! coordinate structural changes with slot-level traffic.

pub mod shared_mutex;
