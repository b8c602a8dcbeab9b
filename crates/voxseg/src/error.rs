//! Error types for segment lookups.
//!
//! [`Error`] is what every public lookup operation returns. Failures coming
//! out of a [`VolumeStore`](crate::VolumeStore) are described by
//! [`StoreError`] and reach callers wrapped in [`Error::FetchFailure`]
//! together with the block whose fetch failed.
//!
//! ## Error Cases
//! - `InvalidInput`: the query itself is malformed.
//! - `LimitExceeded`: the query holds more points than allowed.
//! - `FetchFailure`: the store could not produce a block's sub-region.
//! - `Assembly`: per-block results did not cover the query exactly once.
//! - `ChannelError` / `TaskFailed`: internal worker communication failed.
//! - `ServiceShutdown`: the worker pool is shutting down.

use crate::grid::{BlockKey, SubRegion};
use std::path::PathBuf;
use std::sync::Arc;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for segment lookups.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// The query was malformed (missing, non-numeric or wrongly shaped
    /// coordinates).
    #[error("{reason}")]
    InvalidInput { reason: String },

    /// The query holds more points than the configured ceiling.
    #[error("Max number of locations ({max}) exceeded")]
    LimitExceeded { max: usize, count: usize },

    /// The volume store failed to return the sub-region for one block.
    #[error("Failed to fetch block {key}: {source}")]
    FetchFailure {
        key: BlockKey,
        #[source]
        source: StoreError,
    },

    /// Per-block results did not map onto the query exactly once.
    #[error("Result assembly failed: {reason}")]
    Assembly { reason: String },

    /// Internal channel send/receive failure between dispatcher and workers.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// A blocking fetch task panicked or was aborted.
    #[error("Fetch task failed: {context}")]
    TaskFailed { context: String },

    /// The worker pool is shutting down and refuses new work.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// True for errors caused by the caller's input rather than by the
    /// service or its store.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput { .. } | Self::LimitExceeded { .. })
    }
}

/// Failures reported by a [`VolumeStore`](crate::VolumeStore).
#[derive(Clone, Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested region is not inside the volume.
    #[error("region {region} is outside volume bounds {bounds}")]
    OutOfBounds { region: SubRegion, bounds: SubRegion },

    /// A chunk file is absent and missing chunks are not zero-filled.
    #[error("missing chunk {}", path.display())]
    MissingChunk { path: PathBuf },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// Stored bytes or metadata could not be decoded.
    #[error("decode error: {reason}")]
    Decode { reason: String },

    /// The volume uses a format feature this store does not implement.
    #[error("unsupported volume: {reason}")]
    Unsupported { reason: String },

    /// The store returned a chunk whose shape differs from the request.
    #[error("chunk shape {got:?} does not match requested region {region}")]
    ShapeMismatch { region: SubRegion, got: [usize; 3] },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}
