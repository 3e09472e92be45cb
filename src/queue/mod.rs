//! Priority job queue with bounded retries.
//!
//! Each named queue has a [`JobStore`], a set of handlers keyed by job name,
//! and per-state counters. Workers pop the lowest priority value first, FIFO
//! within a priority, and retry failing jobs with the job's own backoff.

pub mod engine;
pub mod store;
mod worker;

pub use engine::{JobHandler, JobQueueEngine};
pub use store::{JobStore, MemoryJobStore};
