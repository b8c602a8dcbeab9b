//! Volume store collaborators.
//!
//! - [`VolumeStore`] - the read-only interface the fetch engine depends on.
//! - [`InMemoryVolume`] - dense in-memory volume that counts reads.
//! - [`PrecomputedVolume`] - local Neuroglancer precomputed volume.

mod interface;
mod memory;
mod precomputed;

pub use interface::*;
pub use memory::*;
pub use precomputed::*;
