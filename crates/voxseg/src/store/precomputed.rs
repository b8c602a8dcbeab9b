//! Local-filesystem reader for Neuroglancer "precomputed" label volumes.
//!
//! A precomputed volume is a directory holding an `info` JSON document and
//! one subdirectory per scale. Each scale directory contains chunk files
//! named `x0-x1_y0-y1_z0-z1` (absolute voxel ranges, half-open) whose
//! contents are the raw little-endian labels of that chunk, x-fastest.
//!
//! Only the `raw` encoding with a single channel and unsharded layout is
//! supported. Other layouts are rejected when the volume is opened.

use crate::{
    error::StoreError,
    grid::{Coordinate, SubRegion},
    store::{Chunk, SegmentId, VolumeStore},
};
use serde::Deserialize;
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

#[derive(Clone, Debug, Deserialize)]
struct Info {
    data_type: DataType,
    #[serde(default = "one")]
    num_channels: u32,
    scales: Vec<Scale>,
}

const fn one() -> u32 {
    1
}

#[derive(Clone, Debug, Deserialize)]
struct Scale {
    key: String,
    size: [i64; 3],
    #[serde(default)]
    voxel_offset: [i64; 3],
    chunk_sizes: Vec<[i64; 3]>,
    encoding: String,
    #[serde(default)]
    sharding: Option<serde_json::Value>,
}

/// Element type of the stored labels.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint8,
    Uint16,
    Uint32,
    Uint64,
}

impl DataType {
    pub const fn size(self) -> usize {
        match self {
            Self::Uint8 => 1,
            Self::Uint16 => 2,
            Self::Uint32 => 4,
            Self::Uint64 => 8,
        }
    }

    fn decode(self, bytes: &[u8]) -> Vec<SegmentId> {
        match self {
            Self::Uint8 => bytes.iter().map(|&b| SegmentId::from(b)).collect(),
            Self::Uint16 => bytes
                .chunks_exact(2)
                .map(|b| SegmentId::from(u16::from_le_bytes([b[0], b[1]])))
                .collect(),
            Self::Uint32 => bytes
                .chunks_exact(4)
                .map(|b| SegmentId::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]])))
                .collect(),
            Self::Uint64 => bytes
                .chunks_exact(8)
                .map(|b| {
                    let mut le = [0_u8; 8];
                    le.copy_from_slice(b);
                    SegmentId::from_le_bytes(le)
                })
                .collect(),
        }
    }
}

/// A read-only precomputed volume at one resolution level (mip).
#[derive(Clone, Debug)]
pub struct PrecomputedVolume {
    scale_dir: PathBuf,
    bounds: SubRegion,
    chunk_size: Coordinate,
    data_type: DataType,
    fill_missing: bool,
}

impl PrecomputedVolume {
    /// Opens the volume at `location` and selects scale `mip`.
    ///
    /// `location` is a directory path, optionally prefixed with
    /// `precomputed://` and/or `file://`. When `fill_missing` is set, chunk
    /// files that do not exist read as background (`0`).
    ///
    /// # Errors
    ///
    /// Fails if the `info` file cannot be read or parsed, if `mip` does not
    /// exist, or if the scale uses an unsupported layout.
    pub fn open(location: &str, mip: usize, fill_missing: bool) -> Result<Self, StoreError> {
        let root = resolve_location(location)?;
        let info_path = root.join("info");
        let raw = std::fs::read(&info_path).map_err(|e| StoreError::io(&info_path, e))?;
        let info: Info = serde_json::from_slice(&raw).map_err(|e| StoreError::Decode {
            reason: format!("invalid info file {}: {e}", info_path.display()),
        })?;

        if info.num_channels != 1 {
            return Err(StoreError::Unsupported {
                reason: format!("{} channels (only single-channel volumes)", info.num_channels),
            });
        }

        let scale = info
            .scales
            .get(mip)
            .ok_or_else(|| StoreError::Unsupported {
                reason: format!("mip {mip} not present ({} scales)", info.scales.len()),
            })?;

        if scale.encoding != "raw" {
            return Err(StoreError::Unsupported {
                reason: format!("`{}` encoding (only `raw`)", scale.encoding),
            });
        }
        if scale.sharding.is_some() {
            return Err(StoreError::Unsupported {
                reason: "sharded scales".to_string(),
            });
        }

        let chunk_size = scale
            .chunk_sizes
            .first()
            .copied()
            .filter(|cs| cs.iter().all(|&c| c > 0))
            .ok_or_else(|| StoreError::Decode {
                reason: format!("scale `{}` has no valid chunk size", scale.key),
            })?;

        let start = Coordinate::from(scale.voxel_offset);
        let stop = start
            .checked_add(Coordinate::from(scale.size))
            .ok_or_else(|| StoreError::Decode {
                reason: format!("scale `{}` extends past the i64 range", scale.key),
            })?;
        let bounds = SubRegion::new(start, stop);

        Ok(Self {
            scale_dir: root.join(&scale.key),
            bounds,
            chunk_size: Coordinate::from(chunk_size),
            data_type: info.data_type,
            fill_missing,
        })
    }

    pub const fn data_type(&self) -> DataType {
        self.data_type
    }

    pub const fn chunk_size(&self) -> Coordinate {
        self.chunk_size
    }

    /// Region covered by the storage chunk at grid cell `cell`, clipped to
    /// the volume bounds.
    fn chunk_region(&self, cell: Coordinate) -> SubRegion {
        let origin = self.bounds.start;
        let cs = self.chunk_size;
        let start = Coordinate::new(
            origin.x + cell.x * cs.x,
            origin.y + cell.y * cs.y,
            origin.z + cell.z * cs.z,
        );
        let stop = Coordinate::new(
            (start.x + cs.x).min(self.bounds.stop.x),
            (start.y + cs.y).min(self.bounds.stop.y),
            (start.z + cs.z).min(self.bounds.stop.z),
        );
        SubRegion::new(start, stop)
    }

    fn chunk_path(&self, region: &SubRegion) -> PathBuf {
        let (a, b) = (region.start, region.stop);
        self.scale_dir.join(format!(
            "{}-{}_{}-{}_{}-{}",
            a.x, b.x, a.y, b.y, a.z, b.z
        ))
    }

    /// Loads one storage chunk, or `None` if it is missing and missing
    /// chunks are zero-filled.
    fn load_chunk(&self, region: &SubRegion) -> Result<Option<Vec<SegmentId>>, StoreError> {
        let path = self.chunk_path(region);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                if self.fill_missing {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("Zero-filling missing chunk {}", path.display());
                    return Ok(None);
                }
                return Err(StoreError::MissingChunk { path });
            }
            Err(e) => return Err(StoreError::io(path, e)),
        };

        let expected = region.volume() * self.data_type.size();
        if bytes.len() != expected {
            return Err(StoreError::Decode {
                reason: format!(
                    "chunk {} holds {} bytes, expected {expected}",
                    path.display(),
                    bytes.len()
                ),
            });
        }

        Ok(Some(self.data_type.decode(&bytes)))
    }
}

impl VolumeStore for PrecomputedVolume {
    fn bounds(&self) -> SubRegion {
        self.bounds
    }

    fn read(&self, region: &SubRegion) -> Result<Chunk, StoreError> {
        if !self.bounds.encloses(region) {
            return Err(StoreError::OutOfBounds {
                region: *region,
                bounds: self.bounds,
            });
        }

        let mut out = Chunk::zeros(*region);
        if region.is_empty() {
            return Ok(out);
        }

        let origin = self.bounds.start;
        let cs = self.chunk_size;
        let first = Coordinate::new(
            (region.start.x - origin.x) / cs.x,
            (region.start.y - origin.y) / cs.y,
            (region.start.z - origin.z) / cs.z,
        );
        let last = Coordinate::new(
            (region.stop.x - 1 - origin.x) / cs.x,
            (region.stop.y - 1 - origin.y) / cs.y,
            (region.stop.z - 1 - origin.z) / cs.z,
        );

        for gz in first.z..=last.z {
            for gy in first.y..=last.y {
                for gx in first.x..=last.x {
                    let chunk_region = self.chunk_region(Coordinate::new(gx, gy, gz));
                    if let Some(labels) = self.load_chunk(&chunk_region)? {
                        out.copy_from(&chunk_region, &labels);
                    }
                }
            }
        }

        Ok(out)
    }
}

fn resolve_location(location: &str) -> Result<PathBuf, StoreError> {
    let location = location.strip_prefix("precomputed://").unwrap_or(location);
    if let Some(path) = location.strip_prefix("file://") {
        return Ok(Path::new(path).to_path_buf());
    }
    if location.contains("://") {
        return Err(StoreError::Unsupported {
            reason: format!("remote location `{location}` (only local paths)"),
        });
    }
    Ok(PathBuf::from(location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static FIXTURE: AtomicUsize = AtomicUsize::new(0);

    fn label(c: Coordinate) -> SegmentId {
        (c.x * 1_000_000 + c.y * 1_000 + c.z) as SegmentId
    }

    /// Writes a uint32 volume of `size` at `offset` with 4x4x2 chunks.
    /// Chunks listed in `skip` are not written.
    fn write_fixture(offset: [i64; 3], size: [i64; 3], skip: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "voxseg-precomputed-{}-{}",
            std::process::id(),
            FIXTURE.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(dir.join("s0")).unwrap();

        let info = serde_json::json!({
            "type": "segmentation",
            "data_type": "uint32",
            "num_channels": 1,
            "scales": [{
                "key": "s0",
                "size": size,
                "voxel_offset": offset,
                "chunk_sizes": [[4, 4, 2]],
                "encoding": "raw",
                "resolution": [8, 8, 40],
            }],
        });
        std::fs::write(dir.join("info"), info.to_string()).unwrap();

        let vol = PrecomputedVolume::open(dir.to_str().unwrap(), 0, true).unwrap();
        let bounds = vol.bounds();
        let cells = |axis: usize| (size[axis] + [4, 4, 2][axis] - 1) / [4, 4, 2][axis];
        for gz in 0..cells(2) {
            for gy in 0..cells(1) {
                for gx in 0..cells(0) {
                    let region = vol.chunk_region(Coordinate::new(gx, gy, gz));
                    assert!(bounds.encloses(&region));
                    let path = vol.chunk_path(&region);
                    let name = path.file_name().unwrap().to_str().unwrap().to_string();
                    if skip.contains(&name.as_str()) {
                        continue;
                    }
                    let mut bytes = Vec::new();
                    for z in region.start.z..region.stop.z {
                        for y in region.start.y..region.stop.y {
                            for x in region.start.x..region.stop.x {
                                let v = label(Coordinate::new(x, y, z)) as u32;
                                bytes.extend_from_slice(&v.to_le_bytes());
                            }
                        }
                    }
                    std::fs::write(path, bytes).unwrap();
                }
            }
        }
        dir
    }

    #[test]
    fn reads_across_chunk_boundaries() {
        let dir = write_fixture([0, 0, 0], [10, 9, 5], &[]);
        let vol = PrecomputedVolume::open(dir.to_str().unwrap(), 0, false).unwrap();
        assert_eq!(vol.data_type(), DataType::Uint32);

        let region = SubRegion::new(Coordinate::new(2, 3, 1), Coordinate::new(9, 9, 5));
        let chunk = vol.read(&region).unwrap();
        assert_eq!(chunk.shape(), [7, 6, 4]);
        for z in region.start.z..region.stop.z {
            for y in region.start.y..region.stop.y {
                for x in region.start.x..region.stop.x {
                    let c = Coordinate::new(x, y, z);
                    assert_eq!(chunk.get_absolute(c), Some(label(c) as u32 as SegmentId));
                }
            }
        }
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn honors_voxel_offset_and_file_scheme() {
        let dir = write_fixture([100, 200, 10], [8, 8, 4], &[]);
        let location = format!("precomputed://file://{}", dir.display());
        let vol = PrecomputedVolume::open(&location, 0, false).unwrap();
        assert_eq!(
            vol.bounds(),
            SubRegion::new(Coordinate::new(100, 200, 10), Coordinate::new(108, 208, 14))
        );

        let c = Coordinate::new(105, 203, 12);
        let chunk = vol.read(&SubRegion::new(c, c + Coordinate::new(1, 1, 1))).unwrap();
        assert_eq!(chunk.as_slice(), &[label(c) as u32 as SegmentId]);

        let outside = SubRegion::new(Coordinate::new(99, 200, 10), Coordinate::new(101, 201, 11));
        assert!(matches!(
            vol.read(&outside),
            Err(StoreError::OutOfBounds { .. })
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_chunks_fill_or_fail() {
        let dir = write_fixture([0, 0, 0], [8, 4, 2], &["4-8_0-4_0-2"]);
        let region = SubRegion::new(Coordinate::new(3, 0, 0), Coordinate::new(5, 1, 1));

        let filled = PrecomputedVolume::open(dir.to_str().unwrap(), 0, true).unwrap();
        let chunk = filled.read(&region).unwrap();
        assert_eq!(
            chunk.as_slice(),
            &[label(Coordinate::new(3, 0, 0)) as u32 as SegmentId, 0]
        );

        let strict = PrecomputedVolume::open(dir.to_str().unwrap(), 0, false).unwrap();
        assert!(matches!(
            strict.read(&region),
            Err(StoreError::MissingChunk { .. })
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn rejects_unknown_mip_and_remote_locations() {
        let dir = write_fixture([0, 0, 0], [4, 4, 2], &[]);
        assert!(matches!(
            PrecomputedVolume::open(dir.to_str().unwrap(), 3, true),
            Err(StoreError::Unsupported { .. })
        ));
        assert!(matches!(
            PrecomputedVolume::open("gs://bucket/volume", 0, true),
            Err(StoreError::Unsupported { .. })
        ));
        assert!(matches!(
            PrecomputedVolume::open("/definitely/not/here", 0, true),
            Err(StoreError::Io { .. })
        ));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn rejects_unreadable_scales() {
        let dir = write_fixture([0, 0, 0], [4, 4, 2], &[]);
        let info_path = dir.join("info");
        let info: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&info_path).unwrap()).unwrap();
        let open_with = |edit: &dyn Fn(&mut serde_json::Value)| {
            let mut info = info.clone();
            edit(&mut info["scales"][0]);
            std::fs::write(&info_path, info.to_string()).unwrap();
            PrecomputedVolume::open(dir.to_str().unwrap(), 0, true)
        };

        let err = open_with(&|s| s["encoding"] = "compressed_segmentation".into()).unwrap_err();
        assert!(matches!(err, StoreError::Unsupported { .. }));
        assert!(err.to_string().contains("compressed_segmentation"), "{err}");

        let err = open_with(&|s| {
            s["sharding"] = serde_json::json!({ "@type": "neuroglancer_uint64_sharded_v1" })
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::Unsupported { .. }));

        let err = open_with(&|s| s["voxel_offset"] = serde_json::json!([i64::MAX, 0, 0]))
            .unwrap_err();
        assert!(matches!(err, StoreError::Decode { .. }));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn decodes_every_width_little_endian() {
        assert_eq!(DataType::Uint8.decode(&[1, 255]), vec![1, 255]);
        assert_eq!(DataType::Uint16.decode(&[1, 2]), vec![0x0201]);
        assert_eq!(DataType::Uint32.decode(&[1, 0, 0, 1]), vec![0x0100_0001]);
        assert_eq!(
            DataType::Uint64.decode(&u64::MAX.to_le_bytes()),
            vec![u64::MAX]
        );
    }
}
