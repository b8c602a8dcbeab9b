//! Voxel-space coordinates and the fixed block grid laid over them.
//!
//! The grid partitions voxel space into axis-aligned blocks of a fixed
//! [`BlockSize`]. A [`Coordinate`] maps to exactly one [`BlockKey`] by
//! element-wise floor division, so points on an exact multiple of the block
//! size belong to the block that *starts* there.

use core::fmt;
use core::ops::{Add, Sub};
use core::str::FromStr;

/// An absolute voxel position `(x, y, z)`.
///
/// Serialized as a three element array, `[x, y, z]`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(from = "[i64; 3]", into = "[i64; 3]")]
pub struct Coordinate {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Coordinate {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    pub const fn to_array(self) -> [i64; 3] {
        [self.x, self.y, self.z]
    }

    /// Component-wise addition, or `None` if any axis overflows.
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match (
            self.x.checked_add(rhs.x),
            self.y.checked_add(rhs.y),
            self.z.checked_add(rhs.z),
        ) {
            (Some(x), Some(y), Some(z)) => Some(Self::new(x, y, z)),
            _ => None,
        }
    }
}

impl From<[i64; 3]> for Coordinate {
    fn from([x, y, z]: [i64; 3]) -> Self {
        Self { x, y, z }
    }
}

impl From<Coordinate> for [i64; 3] {
    fn from(c: Coordinate) -> Self {
        c.to_array()
    }
}

impl Add for Coordinate {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Coordinate {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Extent of one grid block along each axis.
///
/// Every component is strictly positive; this is checked once in
/// [`BlockSize::new`] so the per-point math never has to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockSize {
    x: u32,
    y: u32,
    z: u32,
}

impl BlockSize {
    /// `128 x 128 x 32`, the storage block of the datasets this was tuned
    /// against.
    pub const DEFAULT: Self = Self {
        x: 128,
        y: 128,
        z: 32,
    };

    /// Returns `None` if any component is zero.
    pub const fn new(x: u32, y: u32, z: u32) -> Option<Self> {
        if x == 0 || y == 0 || z == 0 {
            None
        } else {
            Some(Self { x, y, z })
        }
    }

    pub const fn to_array(self) -> [u32; 3] {
        [self.x, self.y, self.z]
    }

    /// The block extent as a coordinate delta.
    pub const fn as_coordinate(self) -> Coordinate {
        Coordinate::new(self.x as i64, self.y as i64, self.z as i64)
    }
}

impl Default for BlockSize {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// Error returned when parsing a [`BlockSize`] from text.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid block size `{input}`: expected three positive integers like `128,128,32`")]
pub struct ParseBlockSizeError {
    input: String,
}

impl FromStr for BlockSize {
    type Err = ParseBlockSizeError;

    /// Accepts `128,128,32` or `128x128x32`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseBlockSizeError {
            input: s.to_string(),
        };

        let parts = s
            .split([',', 'x', 'X'])
            .map(|p| p.trim().parse::<u32>().map_err(|_| err()))
            .collect::<Result<Vec<_>, _>>()?;

        match parts[..] {
            [x, y, z] => Self::new(x, y, z).ok_or_else(err),
            _ => Err(err()),
        }
    }
}

/// Identifies one cell of the block grid.
///
/// Only used to group query points; it carries no storage identity.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl BlockKey {
    /// Absolute voxel position of this block's lowest corner.
    pub const fn origin(self, size: BlockSize) -> Coordinate {
        Coordinate::new(
            self.x * size.x as i64,
            self.y * size.y as i64,
            self.z * size.z as i64,
        )
    }

    /// Like [`origin`](Self::origin), but `None` if the corner does not fit
    /// in an `i64`.
    pub const fn checked_origin(self, size: BlockSize) -> Option<Coordinate> {
        match (
            self.x.checked_mul(size.x as i64),
            self.y.checked_mul(size.y as i64),
            self.z.checked_mul(size.z as i64),
        ) {
            (Some(x), Some(y), Some(z)) => Some(Coordinate::new(x, y, z)),
            _ => None,
        }
    }
}

impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

/// Offset of a point from the origin of its block. Each component is in
/// `0..block_size` on that axis.
pub type LocalOffset = [u32; 3];

/// Maps a coordinate to the block that contains it.
///
/// Uses Euclidean division, so negative coordinates floor toward negative
/// infinity (`-1` is in block `-1`, not block `0`).
#[inline]
pub const fn block_key_of(coord: Coordinate, size: BlockSize) -> BlockKey {
    BlockKey {
        x: coord.x.div_euclid(size.x as i64),
        y: coord.y.div_euclid(size.y as i64),
        z: coord.z.div_euclid(size.z as i64),
    }
}

/// True if the block holding `coord` and the one-voxel region at `coord`
/// can both be expressed without overflowing `i64`.
///
/// Points failing this can never be read from any store.
pub const fn is_addressable(coord: Coordinate, size: BlockSize) -> bool {
    coord.x < i64::MAX
        && coord.y < i64::MAX
        && coord.z < i64::MAX
        && block_key_of(coord, size).checked_origin(size).is_some()
}

/// Offset of `coord` inside its block.
#[inline]
pub const fn local_offset(coord: Coordinate, size: BlockSize) -> LocalOffset {
    [
        coord.x.rem_euclid(size.x as i64) as u32,
        coord.y.rem_euclid(size.y as i64) as u32,
        coord.z.rem_euclid(size.z as i64) as u32,
    ]
}

/// A half-open, axis-aligned box `[start, stop)` in absolute voxel space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubRegion {
    pub start: Coordinate,
    pub stop: Coordinate,
}

impl SubRegion {
    pub const fn new(start: Coordinate, stop: Coordinate) -> Self {
        Self { start, stop }
    }

    /// Number of voxels along each axis; zero for inverted or empty axes.
    pub fn shape(&self) -> [usize; 3] {
        let extent = |lo: i64, hi: i64| {
            hi.checked_sub(lo)
                .and_then(|d| usize::try_from(d).ok())
                .unwrap_or(0)
        };
        [
            extent(self.start.x, self.stop.x),
            extent(self.start.y, self.stop.y),
            extent(self.start.z, self.stop.z),
        ]
    }

    pub fn volume(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        (self.start.x..self.stop.x).contains(&c.x)
            && (self.start.y..self.stop.y).contains(&c.y)
            && (self.start.z..self.stop.z).contains(&c.z)
    }

    /// True if `other` lies entirely inside `self`.
    pub fn encloses(&self, other: &SubRegion) -> bool {
        other.is_empty()
            || (self.start.x <= other.start.x
                && self.start.y <= other.start.y
                && self.start.z <= other.start.z
                && other.stop.x <= self.stop.x
                && other.stop.y <= self.stop.y
                && other.stop.z <= self.stop.z)
    }

    /// The overlap of two regions, or `None` if they are disjoint.
    pub fn intersect(&self, other: &SubRegion) -> Option<SubRegion> {
        let start = Coordinate::new(
            self.start.x.max(other.start.x),
            self.start.y.max(other.start.y),
            self.start.z.max(other.start.z),
        );
        let stop = Coordinate::new(
            self.stop.x.min(other.stop.x),
            self.stop.y.min(other.stop.y),
            self.stop.z.min(other.stop.z),
        );
        let region = SubRegion::new(start, stop);
        (!region.is_empty()).then_some(region)
    }
}

impl fmt::Display for SubRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}, {}:{}, {}:{}]",
            self.start.x, self.stop.x, self.start.y, self.stop.y, self.start.z, self.stop.z
        )
    }
}
