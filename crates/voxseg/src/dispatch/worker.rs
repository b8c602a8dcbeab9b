use crate::{
    dispatch::request::WorkRequest,
    error::{Error, Result},
    fetch::{BlockLabels, fetch_block},
    grid::BlockSize,
    partition::WorkItem,
    store::SharedStore,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Worker task that runs block fetches received over `rx`, one at a time.
///
/// Every fetch runs on Tokio's blocking pool since [`VolumeStore`] reads are
/// synchronous. The worker awaits each fetch before taking the next request,
/// so a pool of `n` workers never has more than `n` fetches in flight.
///
/// Runs until a [`WorkRequest::Shutdown`] arrives or every sender is dropped.
///
/// [`VolumeStore`]: crate::VolumeStore
pub async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<WorkRequest>,
    store: SharedStore,
    block_size: BlockSize,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            WorkRequest::Fetch {
                item,
                cancel,
                result_tx,
            } => {
                handle_fetch_request(worker_id, &store, block_size, item, cancel, result_tx).await;
            }
            WorkRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} stopped");
}

#[allow(clippy::used_underscore_binding)]
async fn handle_fetch_request(
    _worker_id: usize,
    store: &SharedStore,
    block_size: BlockSize,
    item: WorkItem,
    cancel: CancellationToken,
    result_tx: mpsc::Sender<Result<BlockLabels>>,
) {
    if cancel.is_cancelled() || result_tx.is_closed() {
        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {_worker_id} skipping block {} (cancelled)", item.key);
        return;
    }

    let key = item.key;
    let store = Arc::clone(store);
    let outcome =
        match tokio::task::spawn_blocking(move || fetch_block(store.as_ref(), &item, block_size))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::TaskFailed {
                context: format!("block {key}: {e}"),
            }),
        };

    // The dispatcher has already failed or gone away; drop the result.
    if cancel.is_cancelled() {
        #[cfg(feature = "tracing")]
        tracing::trace!("Worker {_worker_id} discarding late result for block {key}");
        return;
    }

    #[cfg(feature = "tracing")]
    if let Err(e) = &outcome {
        tracing::debug!("Worker {_worker_id} fetch failed: {e}");
    }

    if let Err(_e) = result_tx.send(outcome).await {
        #[cfg(feature = "tracing")]
        tracing::debug!("Worker {_worker_id} failed to send result: {_e}");
    }
}
