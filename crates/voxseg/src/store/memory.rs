use crate::{
    error::StoreError,
    grid::{Coordinate, SubRegion},
    store::{Chunk, SegmentId, VolumeStore},
};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A [`VolumeStore`] backed by a dense in-memory array.
///
/// Keeps a count of [`read`](VolumeStore::read) calls so callers can assert
/// how many store requests a lookup issued.
#[derive(Debug)]
pub struct InMemoryVolume {
    chunk: Chunk,
    reads: AtomicUsize,
}

impl InMemoryVolume {
    /// Builds a volume over `bounds` whose label at each voxel is `f(coord)`.
    pub fn from_fn(bounds: SubRegion, mut f: impl FnMut(Coordinate) -> SegmentId) -> Self {
        let mut chunk = Chunk::zeros(bounds);
        let [sx, sy, _] = bounds.shape();
        for (i, label) in chunk.data_mut().iter_mut().enumerate() {
            let offset = Coordinate::new(
                (i % sx) as i64,
                ((i / sx) % sy) as i64,
                (i / (sx * sy)) as i64,
            );
            *label = f(bounds.start + offset);
        }
        Self::from_chunk(chunk)
    }

    /// Builds a volume from an existing chunk.
    pub fn from_chunk(chunk: Chunk) -> Self {
        Self {
            chunk,
            reads: AtomicUsize::new(0),
        }
    }

    /// Label stored at `c`, or `None` outside the volume.
    pub fn get(&self, c: Coordinate) -> Option<SegmentId> {
        self.chunk.get_absolute(c)
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl VolumeStore for InMemoryVolume {
    fn bounds(&self) -> SubRegion {
        *self.chunk.region()
    }

    fn read(&self, region: &SubRegion) -> Result<Chunk, StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        if !self.chunk.region().encloses(region) {
            return Err(StoreError::OutOfBounds {
                region: *region,
                bounds: *self.chunk.region(),
            });
        }

        let mut out = Chunk::zeros(*region);
        out.copy_from(self.chunk.region(), self.chunk.as_slice());
        Ok(out)
    }
}
