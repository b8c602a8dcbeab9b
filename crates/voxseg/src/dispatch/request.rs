use crate::{error::Result, fetch::BlockLabels, partition::WorkItem};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Messages accepted by a pool worker.
#[derive(Debug)]
pub enum WorkRequest {
    /// Fetch one block and send its labels (or the failure) to `result_tx`.
    ///
    /// Skipped without a reply if `cancel` is tripped before the fetch
    /// starts.
    Fetch {
        item: WorkItem,
        cancel: CancellationToken,
        result_tx: mpsc::Sender<Result<BlockLabels>>,
    },
    /// Stop the worker; acknowledged through `response`.
    Shutdown { response: oneshot::Sender<()> },
}
