//! Shared error taxonomy, byte-order primitives and collaborator traits used
//! across the join execution core.
//!
//! This crate has no knowledge of the buffer format, the row parser, or the
//! coordinator state machine; it only holds the pieces every other crate in
//! the workspace needs to agree on.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod collab;
pub mod error;
pub mod order;
pub mod temppath;

pub use collab::{FileTransfer, SchemaCatalog, SchemaInfo, SqlTransport, TsCodec};
pub use error::{BufferError, InsertError, JoinError, ParseError};
pub use order::Order;
pub use temppath::TempPathAllocator;
