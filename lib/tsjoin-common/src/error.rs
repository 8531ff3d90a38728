//! Error taxonomy, one `snafu`-derived enum per crate boundary rather than a
//! single monolithic error type — the same split the teacher uses between
//! `disk_v2::writer::WriterError` and `disk_v2::reader::ReaderError`.

use std::io;

use snafu::Snafu;

/// Errors surfaced by `tsjoin-buffers` (C1 TS-Buffer, C2 Intersector).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BufferError {
    /// A general I/O error occurred opening, seeking, reading, writing, or
    /// fsyncing a buffer file.
    #[snafu(display("buffer I/O error: {source}"))]
    Io { source: io::Error },

    /// The file header's magic value did not match.
    #[snafu(display("bad magic: expected {expected:#x}, found {found:#x}"))]
    BadMagic { expected: u32, found: u32 },

    /// The file header's `ts_order` field was outside `{-1, 0, 1}`.
    #[snafu(display("bad ts_order value: {value}"))]
    BadOrder { value: i32 },

    /// A block's trailing `comp_len` sentinel did not match its leading one.
    #[snafu(display(
        "corrupt block: leading comp_len {leading} does not match trailing comp_len {trailing}"
    ))]
    BadSentinel { leading: u32, trailing: u32 },

    /// `merge` would have grown the shard directory past `MAX_SHARDS`.
    #[snafu(display("merge would exceed the maximum of {max} shards"))]
    TooManyShards { max: usize },

    /// The staging or payload buffer could not grow to the requested size.
    #[snafu(display("out of memory allocating {requested} bytes"))]
    OutOfMemory { requested: usize },

    /// The compression/decompression collaborator reported a failure.
    #[snafu(display("codec error: {message}"))]
    Codec { message: String },
}

/// Errors surfaced by `tsjoin-insert::parse` (C3 Row Parser).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ParseError {
    /// A numeric literal did not fit in the destination column width.
    #[snafu(display("value out of range for column (width {width} bytes): {token}"))]
    Overflow { token: String, width: usize },

    /// The token could not be interpreted as a value of the destination type.
    #[snafu(display("invalid token for column type {expected}: {token}"))]
    InvalidToken { token: String, expected: String },

    /// A quoted string exceeded the column's declared byte width.
    #[snafu(display("string too long: {len} bytes, column allows {max}"))]
    StringTooLong { len: usize, max: usize },

    /// A timestamp literal did not parse under any accepted grammar.
    #[snafu(display("invalid timestamp literal: {token}"))]
    InvalidTimestamp { token: String },

    /// The token was a bind-parameter placeholder (`?`); not an error by
    /// itself, but callers that don't support deferred binding treat it as
    /// one.
    #[snafu(display("column at offset {offset} requires a bound parameter"))]
    NeedsBinding { offset: usize },
}

/// Errors surfaced by `tsjoin-insert::block` (C4 Insert Block Assembler).
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum InsertError {
    #[snafu(display("parse error while assembling insert block: {source}"))]
    Parse { source: ParseError },

    /// A row using server time (`ts == 0`) and a row using client time were
    /// both appended to the same block.
    #[snafu(display("server time and client time rows mixed within one insert block"))]
    IncompatibleTsSource,

    #[snafu(display("insert block payload allocation failed: {source}"))]
    OutOfMemory { source: BufferError },
}

/// Errors surfaced by `tsjoin` (C5 Join Coordinator), the user-visible result
/// code of the parent query.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JoinError {
    #[snafu(display("buffer error during join: {source}"))]
    Buffer { source: BufferError },

    /// Transport-reported failure from a subquery; the inner code is opaque
    /// to the join core.
    #[snafu(display("remote subquery failed with code {code}"))]
    Remote { code: i32 },

    /// The sticky error slot was already set when this callback ran; the
    /// callback's own (successful) data is discarded.
    #[snafu(display("join already cancelled by a prior error"))]
    Cancelled,
}

impl JoinError {
    /// The `|result code|` the parent query is released with, per spec.md's
    /// concrete scenario 6 (`err = -42` releases the parent with code `42`).
    #[must_use]
    pub fn result_code(&self) -> i32 {
        match self {
            JoinError::Remote { code } => code.abs(),
            JoinError::Cancelled => 1,
            JoinError::Buffer { .. } => 1,
        }
    }
}
