use super::*;
use crate::{
    assemble::assemble,
    error::{Error, StoreError},
    grid::{BlockKey, BlockSize, Coordinate, SubRegion, block_key_of},
    partition::partition,
    store::{Chunk, InMemoryVolume, SegmentId, SharedStore, VolumeStore},
};
use core::time::Duration;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

fn label(c: Coordinate) -> SegmentId {
    (c.x * 1_000_000 + c.y * 1_000 + c.z) as SegmentId
}

fn bounds() -> SubRegion {
    SubRegion::new(Coordinate::new(0, 0, 0), Coordinate::new(512, 512, 128))
}

fn config(num_workers: usize) -> PoolConfig {
    PoolConfig {
        num_workers,
        queue_depth: 1,
        block_size: BlockSize::DEFAULT,
        shutdown_timeout: Duration::from_secs(1),
    }
}

fn spread_query() -> Vec<Coordinate> {
    let mut query = Vec::new();
    for x in (0..512).step_by(61) {
        for y in (0..512).step_by(97) {
            for z in (0..128).step_by(19) {
                query.push(Coordinate::new(x, y, z));
            }
        }
    }
    query
}

/// Wraps an in-memory volume, failing reads inside one block and tracking
/// how many reads run at once.
struct InstrumentedVolume {
    inner: InMemoryVolume,
    fail_block: Option<BlockKey>,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl InstrumentedVolume {
    fn new(fail_block: Option<BlockKey>, delay: Duration) -> Self {
        Self {
            inner: InMemoryVolume::from_fn(bounds(), label),
            fail_block,
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl VolumeStore for InstrumentedVolume {
    fn bounds(&self) -> SubRegion {
        self.inner.bounds()
    }

    fn read(&self, region: &SubRegion) -> Result<Chunk, StoreError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if Some(block_key_of(region.start, BlockSize::DEFAULT)) == self.fail_block {
            return Err(StoreError::Decode {
                reason: "corrupt chunk".to_string(),
            });
        }
        self.inner.read(region)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatch_returns_one_result_per_block() {
    let vol = Arc::new(InMemoryVolume::from_fn(bounds(), label));
    let pool = WorkerPool::spawn(vol.clone(), &config(3));

    let query = spread_query();
    let items = partition(&query, BlockSize::DEFAULT).into_work_items();
    let blocks = items.len();

    let parts = pool.dispatch(items).await.unwrap();
    assert_eq!(parts.len(), blocks);
    assert_eq!(vol.reads(), blocks);

    let ids = assemble(query.len(), parts).unwrap();
    for (c, id) in query.iter().zip(ids) {
        assert_eq!(id, label(*c));
    }
    pool.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn empty_dispatch_schedules_nothing() {
    let vol = Arc::new(InMemoryVolume::from_fn(bounds(), label));
    let pool = WorkerPool::spawn(vol.clone(), &config(2));
    assert!(pool.dispatch(Vec::new()).await.unwrap().is_empty());
    assert_eq!(vol.reads(), 0);
    pool.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn never_exceeds_worker_budget() {
    let vol = Arc::new(InstrumentedVolume::new(None, Duration::from_millis(5)));
    let store: SharedStore = vol.clone();
    let pool = WorkerPool::spawn(store, &config(2));

    let items = partition(&spread_query(), BlockSize::DEFAULT).into_work_items();
    assert!(items.len() > 4);
    pool.dispatch(items).await.unwrap();

    let peak = vol.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
    pool.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zero_workers_is_raised_to_one() {
    let vol = Arc::new(InstrumentedVolume::new(None, Duration::from_millis(1)));
    let store: SharedStore = vol.clone();
    let pool = WorkerPool::spawn(store, &config(0));
    assert_eq!(pool.num_workers(), 1);

    let items = partition(&spread_query(), BlockSize::DEFAULT).into_work_items();
    pool.dispatch(items).await.unwrap();
    assert_eq!(vol.peak.load(Ordering::SeqCst), 1);
    pool.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn first_failure_aborts_the_dispatch() {
    let bad = BlockKey { x: 1, y: 1, z: 1 };
    let vol = Arc::new(InstrumentedVolume::new(Some(bad), Duration::from_millis(1)));
    let store: SharedStore = vol.clone();
    let pool = WorkerPool::spawn(store, &config(3));

    let items = partition(&spread_query(), BlockSize::DEFAULT).into_work_items();
    assert!(items.iter().any(|item| item.key == bad));

    match pool.dispatch(items).await {
        Err(Error::FetchFailure { key, source }) => {
            assert_eq!(key, bad);
            assert!(matches!(source, StoreError::Decode { .. }));
        }
        other => panic!("expected fetch failure, got {other:?}"),
    }

    // The pool stays usable after a failed dispatch.
    let ok = partition(&[Coordinate::new(1, 2, 3)], BlockSize::DEFAULT).into_work_items();
    assert_eq!(
        pool.dispatch(ok).await.unwrap(),
        vec![vec![(0, label(Coordinate::new(1, 2, 3)))]]
    );
    pool.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refuses_work_after_shutdown() {
    let vol = Arc::new(InMemoryVolume::from_fn(bounds(), label));
    let pool = WorkerPool::spawn(vol.clone(), &config(2));
    pool.shutdown().await.unwrap();
    assert!(pool.is_closing());

    let items = partition(&[Coordinate::new(0, 0, 0)], BlockSize::DEFAULT).into_work_items();
    assert!(matches!(
        pool.dispatch(items).await,
        Err(Error::ServiceShutdown)
    ));
    assert_eq!(vol.reads(), 0);

    // A second shutdown is a no-op.
    pool.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_waits_for_inflight_dispatch() {
    let vol = Arc::new(InstrumentedVolume::new(None, Duration::from_millis(5)));
    let store: SharedStore = vol.clone();
    let pool = Arc::new(WorkerPool::spawn(
        store,
        &PoolConfig {
            shutdown_timeout: Duration::from_secs(30),
            ..config(1)
        },
    ));

    let items = partition(&spread_query(), BlockSize::DEFAULT).into_work_items();
    let blocks = items.len();
    let running = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.dispatch(items).await })
    };

    while pool.inflight() == 0 {
        tokio::task::yield_now().await;
    }
    pool.shutdown().await.unwrap();

    let parts = running.await.unwrap().unwrap();
    assert_eq!(parts.len(), blocks);
    assert_eq!(pool.inflight(), 0);
}
