use core::hint::black_box;
use core::time::Duration;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::Arc;
use tokio::runtime::Builder;
use voxseg::{
    BlockSize, Coordinate, InMemoryVolume, LookupConfig, PoolConfig, SegmentId, SegmentLookup,
    SubRegion, partition,
};

// Number of query points per benchmark iteration.
const LOCATIONS: [usize; 3] = [1_000, 10_000, 100_000];

fn bounds() -> SubRegion {
    SubRegion::new(Coordinate::new(0, 0, 0), Coordinate::new(512, 512, 64))
}

fn random_query(n: usize) -> Vec<Coordinate> {
    let mut rng = StdRng::seed_from_u64(0xB10C);
    (0..n)
        .map(|_| {
            Coordinate::new(
                rng.random_range(0..512),
                rng.random_range(0..512),
                rng.random_range(0..64),
            )
        })
        .collect()
}

/// Cost of grouping a query by block, without any fetching.
fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition");
    for n in LOCATIONS {
        let query = random_query(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_function(format!("elems/{n}"), |b| {
            b.iter(|| black_box(partition(black_box(&query), BlockSize::DEFAULT)));
        });
    }
    group.finish();
}

/// End-to-end lookup against an in-memory volume for several pool sizes.
fn bench_lookup(c: &mut Criterion) {
    let rt = Builder::new_multi_thread().enable_all().build().unwrap();
    let store = Arc::new(InMemoryVolume::from_fn(bounds(), |c| {
        (c.x ^ c.y ^ c.z) as SegmentId
    }));

    let mut group = c.benchmark_group("lookup");
    group.measurement_time(Duration::from_secs(10));

    for workers in [1, 4, 8] {
        let lookup = rt.block_on(async {
            SegmentLookup::new(
                store.clone(),
                &LookupConfig {
                    pool: PoolConfig {
                        num_workers: workers,
                        ..PoolConfig::default()
                    },
                    ..LookupConfig::default()
                },
            )
        });

        for n in LOCATIONS {
            let query = random_query(n);
            group.throughput(Throughput::Elements(n as u64));
            group.bench_function(format!("workers/{workers}/elems/{n}"), |b| {
                b.to_async(&rt)
                    .iter(|| async { black_box(lookup.segment_ids(&query).await.unwrap()) });
            });
        }

        rt.block_on(lookup.shutdown()).unwrap();
    }
    group.finish();
}

criterion_group!(benches, bench_partition, bench_lookup);
criterion_main!(benches);
