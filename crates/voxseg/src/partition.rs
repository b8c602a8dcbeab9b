//! Grouping of a query into per-block work items.

use crate::grid::{BlockKey, BlockSize, Coordinate, LocalOffset, block_key_of, local_offset};
use std::collections::HashMap;

/// One query point assigned to a block: its position in the original query
/// and its offset inside the block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LocalPoint {
    pub index: usize,
    pub offset: LocalOffset,
}

/// All query points falling into one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    pub key: BlockKey,
    /// Points in query order.
    pub points: Vec<LocalPoint>,
}

impl WorkItem {
    pub const fn new(key: BlockKey) -> Self {
        Self {
            key,
            points: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Per-axis minimum and maximum of the local offsets, or `None` if the
    /// item holds no points.
    pub fn offset_bounds(&self) -> Option<(LocalOffset, LocalOffset)> {
        let first = self.points.first()?.offset;
        let bounds = self.points[1..]
            .iter()
            .fold((first, first), |(mut mn, mut mx), p| {
                for axis in 0..3 {
                    mn[axis] = mn[axis].min(p.offset[axis]);
                    mx[axis] = mx[axis].max(p.offset[axis]);
                }
                (mn, mx)
            });
        Some(bounds)
    }
}

/// A query split by block. Every query index appears in exactly one
/// [`WorkItem`].
#[derive(Clone, Debug, Default)]
pub struct Partition {
    items: HashMap<BlockKey, WorkItem>,
    total: usize,
}

impl Partition {
    /// Number of occupied blocks.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of query points across all blocks.
    pub const fn total_points(&self) -> usize {
        self.total
    }

    pub fn get(&self, key: &BlockKey) -> Option<&WorkItem> {
        self.items.get(key)
    }

    /// Consumes the partition, returning its work items ordered by block
    /// key so dispatch order is reproducible.
    pub fn into_work_items(self) -> Vec<WorkItem> {
        let mut items: Vec<_> = self.items.into_values().collect();
        items.sort_unstable_by_key(|item| item.key);
        items
    }
}

/// Groups `query` by the block each coordinate falls into.
pub fn partition(query: &[Coordinate], size: BlockSize) -> Partition {
    let mut items: HashMap<BlockKey, WorkItem> = HashMap::new();

    for (index, &coord) in query.iter().enumerate() {
        let key = block_key_of(coord, size);
        items
            .entry(key)
            .or_insert_with(|| WorkItem::new(key))
            .points
            .push(LocalPoint {
                index,
                offset: local_offset(coord, size),
            });
    }

    Partition {
        items,
        total: query.len(),
    }
}
