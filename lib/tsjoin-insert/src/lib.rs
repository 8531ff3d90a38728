//! Row Parser (C3) and Insert Block Assembler (C4): turns a VALUES-tuple
//! token stream into typed column bytes, then batches rows into per-shard
//! wire-ready insert blocks (`spec.md` §4.3, §4.4).

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate tracing;

pub mod block;
pub mod parse;

pub use block::{BlockState, InsertBlockAssembler, ShardBatch, SubmitBlock, TsSource};
pub use parse::{parse_column, ColumnType, SchemaColumn, TzPrecision};
