#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod assemble;
pub mod dispatch;
mod error;
mod fetch;
mod grid;
mod lookup;
mod partition;
mod store;

pub use crate::assemble::*;
pub use crate::dispatch::{PoolConfig, WorkerPool, default_num_workers};
pub use crate::error::*;
pub use crate::fetch::*;
pub use crate::grid::*;
pub use crate::lookup::*;
pub use crate::partition::*;
pub use crate::store::*;
