//! Bounded pool of asynchronous block-fetch workers.
//!
//! [`WorkerPool`] owns a fixed set of worker tasks, each listening on its
//! own bounded [`mpsc`] channel. Work is handed out round-robin, and each
//! worker runs a single fetch at a time, which caps the number of concurrent
//! store reads at the pool size.
//!
//! The pool is created once per process and shared by every request.
//! Shutdown is cooperative: new dispatches are refused, in-flight dispatches
//! get a grace period, then remaining work is cancelled and every worker is
//! told to exit.

use crate::{
    dispatch::{request::WorkRequest, worker::worker_loop},
    error::{Error, Result},
    fetch::BlockLabels,
    grid::BlockSize,
    partition::WorkItem,
    store::SharedStore,
};
use core::time::Duration;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::{
    sync::{mpsc, oneshot},
    time::{sleep, timeout},
};
use tokio_util::sync::CancellationToken;

/// Workers kept free for the rest of the process when sizing the pool from
/// the CPU count.
pub const RESERVED_CPUS: usize = 5;

/// Default pool size: the logical CPU count minus [`RESERVED_CPUS`], at
/// least one.
pub fn default_num_workers() -> usize {
    num_cpus::get().saturating_sub(RESERVED_CPUS).max(1)
}

/// Sizing and timing of a [`WorkerPool`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of worker tasks, and so the maximum number of concurrent
    /// fetches. Values below 1 are raised to 1.
    pub num_workers: usize,
    /// Capacity of each worker's request channel.
    pub queue_depth: usize,
    pub block_size: BlockSize,
    /// Grace period for in-flight dispatches during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            queue_depth: 1,
            block_size: BlockSize::DEFAULT,
            shutdown_timeout: Duration::from_secs(3),
        }
    }
}

/// Pool of workers executing block fetches against one shared store.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<mpsc::Sender<WorkRequest>>,
    next_worker: AtomicUsize,
    inflight: AtomicUsize,
    closing: AtomicBool,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

/// Counts a dispatch as in flight until dropped.
struct InflightGuard<'a>(&'a AtomicUsize);

impl<'a> InflightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerPool {
    /// Spawns `config.num_workers` worker tasks reading from `store`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn spawn(store: SharedStore, config: &PoolConfig) -> Self {
        let num_workers = config.num_workers.max(1);
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
            workers.push(tx);
            tokio::spawn(worker_loop(
                worker_id,
                rx,
                SharedStore::clone(&store),
                config.block_size,
            ));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Spawned {num_workers} fetch workers (block size {})",
            config.block_size
        );

        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            closing: AtomicBool::new(false),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Number of dispatches currently running.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Returns the index of the next worker to receive work (round-robin).
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Sends a [`WorkRequest`] to the next worker in the pool, waiting for
    /// channel capacity if that worker is busy.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool is shutting down or the worker's channel
    /// is closed.
    pub async fn send_to_next_worker(&self, request: WorkRequest) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        self.workers[worker_idx]
            .send(request)
            .await
            .map_err(|_| Error::ChannelError {
                context: format!("Worker {worker_idx} channel closed"),
            })
    }

    /// Fetches every work item and returns the labels of each block.
    ///
    /// Blocks are fetched concurrently, at most [`num_workers`] at a time,
    /// and come back in completion order. The first failure is returned
    /// immediately: queued fetches for this call are skipped and results of
    /// fetches still running are discarded.
    ///
    /// Dropping the returned future cancels the call the same way.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::FetchFailure`] (or worker failure), or
    /// [`Error::ServiceShutdown`] if the pool is shutting down.
    ///
    /// [`num_workers`]: WorkerPool::num_workers
    pub async fn dispatch(&self, items: Vec<WorkItem>) -> Result<Vec<BlockLabels>> {
        if self.is_closing() || self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let _inflight = InflightGuard::enter(&self.inflight);
        let total = items.len();
        let cancel = self.shutdown_token.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();

        // Sized for every block so workers never wait on the collector.
        let (result_tx, mut result_rx) = mpsc::channel(total);

        let feed_cancel = cancel.clone();
        let feed = async move {
            for item in items {
                if feed_cancel.is_cancelled() {
                    break;
                }
                self.send_to_next_worker(WorkRequest::Fetch {
                    item,
                    cancel: feed_cancel.clone(),
                    result_tx: result_tx.clone(),
                })
                .await?;
            }
            Ok::<_, Error>(())
        };

        let collect = async {
            let mut parts = Vec::with_capacity(total);
            while parts.len() < total {
                match result_rx.recv().await {
                    Some(Ok(labels)) => parts.push(labels),
                    Some(Err(e)) => {
                        cancel.cancel();
                        return Err(e);
                    }
                    None if self.shutdown_token.is_cancelled() => {
                        return Err(Error::ServiceShutdown);
                    }
                    None => {
                        return Err(Error::ChannelError {
                            context: format!(
                                "result channel closed after {} of {total} blocks",
                                parts.len()
                            ),
                        });
                    }
                }
            }
            Ok(parts)
        };

        let ((), parts) = tokio::try_join!(feed, collect)?;
        Ok(parts)
    }

    /// Gracefully shuts down all workers in the pool.
    ///
    /// - Refuses new dispatches.
    /// - Waits up to the configured timeout for in-flight dispatches.
    /// - Cancels whatever is left and sends [`WorkRequest::Shutdown`] to each
    ///   worker, waiting up to 3 seconds per worker for acknowledgement.
    pub async fn shutdown(&self) -> Result<()> {
        // === Phase 0: Stop accepting new dispatches ===
        if self.closing.swap(true, Ordering::AcqRel) {
            #[cfg(feature = "tracing")]
            tracing::debug!("Worker pool already shutting down");
            return Ok(());
        }

        // === Phase 1: Let in-flight dispatches drain ===
        #[cfg(feature = "tracing")]
        tracing::info!("Draining in-flight lookups ({} active)", self.inflight());
        let drained = timeout(self.shutdown_timeout, async {
            while self.inflight() > 0 {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        if drained.is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Graceful drain timed out ({} lookups still active)",
                self.inflight()
            );
        }

        // === Phase 2: Cancel any remaining work ===
        self.shutdown_token.cancel();

        // === Phase 3: Stop the workers ===
        let mut acks = Vec::with_capacity(self.workers.len());
        for (i, worker) in self.workers.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            match worker.send(WorkRequest::Shutdown { response: tx }).await {
                Ok(()) => acks.push((i, rx)),
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Failed to send shutdown to worker {i}: {_e}");
                }
            }
        }

        let waits = acks.into_iter().map(|(_i, rx)| async move {
            match timeout(Duration::from_secs(3), rx).await {
                Ok(Ok(())) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Worker {_i} shutdown acknowledged");
                }
                Ok(Err(_e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {_i} dropped its shutdown ack: {_e}");
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Worker {_i} shutdown timed out");
                }
            }
        });
        futures::future::join_all(waits).await;

        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutdown complete");

        Ok(())
    }
}
