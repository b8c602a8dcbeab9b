use crate::{
    error::{Error, Result, StoreError},
    grid::{BlockSize, Coordinate, LocalOffset, SubRegion},
    partition::WorkItem,
    store::{SegmentId, VolumeStore},
};

/// Labels of one block's points, keyed by their index in the original query.
pub type BlockLabels = Vec<(usize, SegmentId)>;

/// The smallest region covering every point of `item`, in absolute voxel
/// coordinates, along with the per-axis minimum offset used to index into
/// it. `Ok(None)` for an item without points.
///
/// The region is `[origin + mn, origin + mx + 1)` per axis, so a single point
/// yields an extent-1 region.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the region cannot be expressed in
/// `i64` coordinates (a point at `i64::MAX`, or a block whose origin falls
/// below `i64::MIN`).
pub fn covering_region(
    item: &WorkItem,
    size: BlockSize,
) -> Result<Option<(SubRegion, LocalOffset)>> {
    let Some((mn, mx)) = item.offset_bounds() else {
        return Ok(None);
    };
    let at = |o: LocalOffset| Coordinate::new(o[0].into(), o[1].into(), o[2].into());
    let region = item.key.checked_origin(size).and_then(|origin| {
        let start = origin.checked_add(at(mn))?;
        let stop = origin
            .checked_add(at(mx))?
            .checked_add(Coordinate::new(1, 1, 1))?;
        Some(SubRegion::new(start, stop))
    });
    match region {
        Some(region) => Ok(Some((region, mn))),
        None => Err(Error::InvalidInput {
            reason: format!(
                "Block {} lies outside the addressable coordinate range",
                item.key
            ),
        }),
    }
}

/// Fetches the covering region of one block and reads out every point's
/// label.
///
/// Issues exactly one [`VolumeStore::read`] for a non-empty item and none
/// for an empty one. The chunk is dropped before returning.
///
/// # Errors
///
/// Any store failure, including a chunk whose shape does not match the
/// requested region, is returned as [`Error::FetchFailure`] carrying the
/// item's block key. Nothing is retried. A block outside the addressable
/// range is [`Error::InvalidInput`] and is never read.
pub fn fetch_block(
    store: &dyn VolumeStore,
    item: &WorkItem,
    size: BlockSize,
) -> Result<BlockLabels> {
    let Some((region, mn)) = covering_region(item, size)? else {
        return Ok(Vec::new());
    };
    let fail = |source| Error::FetchFailure {
        key: item.key,
        source,
    };

    let chunk = store.read(&region).map_err(fail)?;
    if chunk.shape() != region.shape() {
        return Err(fail(StoreError::ShapeMismatch {
            region,
            got: chunk.shape(),
        }));
    }

    item.points
        .iter()
        .map(|p| {
            let local = [
                (p.offset[0] - mn[0]) as usize,
                (p.offset[1] - mn[1]) as usize,
                (p.offset[2] - mn[2]) as usize,
            ];
            chunk
                .get(local)
                .map(|id| (p.index, id))
                .ok_or_else(|| {
                    fail(StoreError::ShapeMismatch {
                        region,
                        got: chunk.shape(),
                    })
                })
        })
        .collect()
}
