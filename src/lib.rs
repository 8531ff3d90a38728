//! Join Coordinator (C5): drives a two-table join's first-stage and
//! second-stage subqueries to completion and releases the parent query
//! with either a matched-row outcome or a sticky error (`spec.md` §4.5,
//! §5, §6).

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate tracing;

pub mod coordinator;
pub mod shared_state;
pub mod supporter;

pub use coordinator::{JoinCoordinator, JoinCoordinatorConfig, JoinOutcome, JoinRequest};
pub use shared_state::{JoinSharedState, Release};
pub use supporter::{Supporter, SubqueryPlan};

pub use tsjoin_buffers::{intersect, IntersectOutput, IntersectPolicy, TsBuffer, TsBufferConfig};
pub use tsjoin_common::{
    collab::{FileTransfer, SchemaCatalog, SchemaInfo, SqlTransport, StdFileTransfer, SubqueryReply, SubqueryRequest, TsCodec},
    error::{BufferError, InsertError, JoinError, ParseError},
    order::{Order, OrderState},
    temppath::{DirTempPathAllocator, TempPathAllocator},
};
pub use tsjoin_insert::{parse_column, BlockState, ColumnType, InsertBlockAssembler, SchemaColumn, ShardBatch, SubmitBlock, TsSource, TzPrecision};
