//! Concurrent execution of block fetches.
//!
//! ## Structure
//!
//! - [`pool`] - [`WorkerPool`]: round-robin dispatch, fail-fast collection
//!   and graceful shutdown.
//! - [`worker`] - the per-worker receive loop.
//! - [`request`] - messages exchanged between the pool and its workers.

pub mod pool;
pub mod request;
pub mod worker;

pub use pool::{PoolConfig, RESERVED_CPUS, WorkerPool, default_num_workers};
pub use request::WorkRequest;

#[cfg(test)]
mod tests;
