//! TS-Buffer (C1) and Intersector (C2): the on-disk compressed
//! `(shard, tag, ts)` triple store and its sort-merge intersection
//! (`spec.md` §3, §4.1, §4.2).

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate tracing;

pub mod block;
pub mod buffer;
pub mod codec;
pub mod common;
pub mod intersect;

pub use buffer::{Cursor, Triple, TsBuffer, TsBufferConfig};
pub use codec::DeltaVarintCodec;
pub use intersect::{intersect, IntersectOutput, IntersectPolicy};
