use crate::{
    error::StoreError,
    grid::{Coordinate, SubRegion},
};
use std::sync::Arc;

/// Integer label of the object occupying a voxel; `0` is background.
pub type SegmentId = u64;

/// A read-only chunked label volume addressed by half-open voxel ranges.
///
/// Implementations may cache, decompress or retry internally; callers treat
/// [`read`](VolumeStore::read) as synchronous and either-succeeds-or-fails.
/// A store is shared read-only between all workers, hence `Send + Sync`.
pub trait VolumeStore: Send + Sync {
    /// The region of voxel space this store can serve.
    fn bounds(&self) -> SubRegion;

    /// Returns a dense [`Chunk`] covering exactly `region`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the region is outside [`bounds`] or the
    /// underlying data cannot be read or decoded.
    ///
    /// [`bounds`]: VolumeStore::bounds
    fn read(&self, region: &SubRegion) -> Result<Chunk, StoreError>;
}

/// Store handle shared by the worker pool for the life of the process.
pub type SharedStore = Arc<dyn VolumeStore>;

/// A dense block of [`SegmentId`]s covering one [`SubRegion`].
///
/// Voxels are laid out x-fastest, then y, then z.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    region: SubRegion,
    data: Vec<SegmentId>,
}

impl Chunk {
    /// Wraps `data` as the contents of `region`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] if `data` does not hold exactly one
    /// label per voxel of `region`.
    pub fn new(region: SubRegion, data: Vec<SegmentId>) -> Result<Self, StoreError> {
        if data.len() != region.volume() {
            return Err(StoreError::Decode {
                reason: format!(
                    "expected {} labels for region {region}, got {}",
                    region.volume(),
                    data.len()
                ),
            });
        }
        Ok(Self { region, data })
    }

    /// A chunk of background labels.
    pub fn zeros(region: SubRegion) -> Self {
        Self {
            region,
            data: vec![0; region.volume()],
        }
    }

    pub const fn region(&self) -> &SubRegion {
        &self.region
    }

    pub fn shape(&self) -> [usize; 3] {
        self.region.shape()
    }

    pub fn as_slice(&self) -> &[SegmentId] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [SegmentId] {
        &mut self.data
    }

    /// Label at a position relative to the chunk's start.
    pub fn get(&self, [x, y, z]: [usize; 3]) -> Option<SegmentId> {
        let [sx, sy, sz] = self.shape();
        if x >= sx || y >= sy || z >= sz {
            return None;
        }
        self.data.get(x + sx * (y + sy * z)).copied()
    }

    /// Label at an absolute voxel position.
    pub fn get_absolute(&self, c: Coordinate) -> Option<SegmentId> {
        if !self.region.contains(c) {
            return None;
        }
        let d = c - self.region.start;
        self.get([d.x as usize, d.y as usize, d.z as usize])
    }

    /// Copies the part of `src` that overlaps `self` into `self`.
    ///
    /// `src` is a flat x-fastest array covering `src_region`.
    pub(crate) fn copy_from(&mut self, src_region: &SubRegion, src: &[SegmentId]) {
        let Some(overlap) = self.region.intersect(src_region) else {
            return;
        };
        let [dsx, dsy, _] = self.shape();
        let [ssx, ssy, _] = src_region.shape();
        let run = overlap.shape()[0];

        for z in overlap.start.z..overlap.stop.z {
            for y in overlap.start.y..overlap.stop.y {
                let row = |region: &SubRegion, sx: usize, sy: usize| {
                    let dx = (overlap.start.x - region.start.x) as usize;
                    let dy = (y - region.start.y) as usize;
                    let dz = (z - region.start.z) as usize;
                    dx + sx * (dy + sy * dz)
                };
                let dst = row(&self.region, dsx, dsy);
                let from = row(src_region, ssx, ssy);
                self.data[dst..dst + run].copy_from_slice(&src[from..from + run]);
            }
        }
    }
}
