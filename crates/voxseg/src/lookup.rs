use crate::{
    assemble::assemble,
    dispatch::{PoolConfig, WorkerPool},
    error::{Error, Result},
    grid::{BlockSize, Coordinate, is_addressable},
    partition::partition,
    store::{SegmentId, SharedStore},
};

/// Default ceiling on the number of points in one query.
pub const DEFAULT_MAX_LOCATIONS: usize = 1_000_000;

/// Configuration of a [`SegmentLookup`].
#[derive(Clone, Debug)]
pub struct LookupConfig {
    pub pool: PoolConfig,
    /// Queries with more points are rejected before any fetch.
    pub max_locations: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            max_locations: DEFAULT_MAX_LOCATIONS,
        }
    }
}

/// Labels for one query, plus the number of blocks fetched to produce them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LookupOutcome {
    pub ids: Vec<SegmentId>,
    pub blocks: usize,
}

/// Answers batched "which segment is at this voxel?" queries against one
/// volume store.
///
/// Construct once at startup and share; the worker pool lives as long as
/// the lookup and is stopped with [`shutdown`](SegmentLookup::shutdown).
#[derive(Debug)]
pub struct SegmentLookup {
    pool: WorkerPool,
    block_size: BlockSize,
    max_locations: usize,
}

impl SegmentLookup {
    /// Spawns the worker pool over `store`.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(store: SharedStore, config: &LookupConfig) -> Self {
        Self {
            pool: WorkerPool::spawn(store, &config.pool),
            block_size: config.pool.block_size,
            max_locations: config.max_locations,
        }
    }

    pub const fn block_size(&self) -> BlockSize {
        self.block_size
    }

    pub const fn max_locations(&self) -> usize {
        self.max_locations
    }

    pub const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Returns the segment ID at every coordinate of `query`, in order.
    ///
    /// # Errors
    ///
    /// - [`Error::LimitExceeded`] if `query` is longer than the configured
    ///   maximum; nothing is fetched.
    /// - [`Error::InvalidInput`] if a point is too close to the `i64` limits
    ///   to address any block; nothing is fetched.
    /// - Any dispatch error; no partial result is returned.
    pub async fn segment_ids(&self, query: &[Coordinate]) -> Result<Vec<SegmentId>> {
        self.lookup(query).await.map(|outcome| outcome.ids)
    }

    /// Like [`segment_ids`](Self::segment_ids) but also reports how many
    /// blocks were fetched.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(locations = query.len())))]
    pub async fn lookup(&self, query: &[Coordinate]) -> Result<LookupOutcome> {
        if query.len() > self.max_locations {
            return Err(Error::LimitExceeded {
                max: self.max_locations,
                count: query.len(),
            });
        }
        if query.is_empty() {
            return Ok(LookupOutcome {
                ids: Vec::new(),
                blocks: 0,
            });
        }

        if let Some(c) = query
            .iter()
            .find(|c| !is_addressable(**c, self.block_size))
        {
            return Err(Error::InvalidInput {
                reason: format!("Location {c} is outside the addressable coordinate range"),
            });
        }

        let items = partition(query, self.block_size).into_work_items();
        let blocks = items.len();

        #[cfg(feature = "tracing")]
        tracing::debug!("Fetching {blocks} blocks for {} locations", query.len());

        let parts = self.pool.dispatch(items).await?;
        let ids = assemble(query.len(), parts)?;
        Ok(LookupOutcome { ids, blocks })
    }

    /// Stops the worker pool. See [`WorkerPool::shutdown`].
    pub async fn shutdown(&self) -> Result<()> {
        self.pool.shutdown().await
    }
}
