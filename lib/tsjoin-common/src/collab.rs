//! Traits for the collaborators `spec.md` §1 and §6 name as external to this
//! subsystem: the timestamp codec, the SQL transport, the schema cache, and
//! the zero-copy file splice. Production integration swaps in the driver's
//! real implementations; this crate only needs the signatures to exist so
//! `tsjoin-buffers`/`tsjoin` can be written and tested against them.

use std::io;

/// `compress_ts`/`decompress_ts` from spec.md §6.
///
/// The timestamp codec primitives are explicitly out of scope for this
/// subsystem (spec.md §1); this trait is the seam a real two-stage
/// (delta + entropy) codec plugs into. `tsjoin_buffers::codec` ships one
/// concrete implementation so the crate is runnable standalone.
pub trait TsCodec: Send + Sync {
    /// Compresses `src` into `dst`, returning the number of bytes written.
    /// `scratch` is working memory owned by the caller and reused across
    /// calls.
    fn compress(&self, src: &[i64], dst: &mut Vec<u8>, scratch: &mut Vec<u8>) -> usize;

    /// Decompresses `n` timestamps from `src` into `dst`, returning the
    /// number of elements written.
    fn decompress(&self, src: &[u8], n: u32, dst: &mut Vec<i64>, scratch: &mut Vec<u8>) -> usize;

    /// Upper bound on the compressed size of `n` timestamps; used to size
    /// the staging payload before compressing.
    fn bound(&self, n: usize) -> usize;
}

/// `get_meter_meta(name) -> SchemaInfo` from spec.md §6.
#[derive(Debug, Clone)]
pub struct SchemaInfo {
    pub table_uid: u64,
    pub sversion: i32,
    pub num_columns: u16,
    pub row_size: u32,
}

pub trait SchemaCatalog: Send + Sync {
    fn get_meter_meta(&self, name: &str) -> Option<SchemaInfo>;
}

/// `process_sql(req)` from spec.md §6: submits a prepared subquery, firing
/// `on_complete` exactly once when the transport has a result (or error) for
/// it. The callback may run on any thread, any number of subqueries'
/// callbacks may be in flight concurrently (spec.md §5), and this trait
/// makes no promise about where `on_complete` executes.
pub trait SqlTransport: Send + Sync {
    fn process_sql(&self, request: SubqueryRequest, on_complete: Box<dyn FnOnce(SubqueryReply) + Send>);
}

/// A prepared second-stage-or-first-stage request, scoped to one shard.
#[derive(Debug, Clone)]
pub struct SubqueryRequest {
    pub subquery_idx: usize,
    pub shard_idx: i32,
    pub want_ts_only: bool,
    pub ts_range: Option<(i64, i64)>,
}

/// What a subquery callback observes: `rows > 0` with data, `rows == 0` at
/// EOF for the current shard, or `code < 0` on error — matching spec.md
/// §4.5's `(data?) / (n=0) / (n<0)` transition guards.
#[derive(Debug, Clone)]
pub struct SubqueryReply {
    pub rows: i64,
    pub code: i32,
    pub raw_block: Vec<u8>,
}

/// `zero_copy_file_to_file(dst_fd, src_fd, offset, size) -> bytes_copied`
/// from spec.md §6, used by `TsBuffer::merge` to splice a source buffer's
/// data region into the destination without an intermediate userspace copy.
pub trait FileTransfer: Send + Sync {
    fn copy_file_range(
        &self,
        dst: &std::fs::File,
        src: &std::fs::File,
        src_offset: u64,
        size: u64,
    ) -> io::Result<u64>;
}

/// Portable default: a plain buffered read/write loop. Platforms that expose
/// `copy_file_range`/`sendfile` should implement `FileTransfer` directly
/// against those syscalls; this implementation is what the crate exercises
/// in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileTransfer;

impl FileTransfer for StdFileTransfer {
    fn copy_file_range(
        &self,
        dst: &std::fs::File,
        src: &std::fs::File,
        src_offset: u64,
        size: u64,
    ) -> io::Result<u64> {
        use std::io::{Read, Seek, SeekFrom, Write};

        let mut src = src.try_clone()?;
        let mut dst = dst.try_clone()?;
        src.seek(SeekFrom::Start(src_offset))?;
        dst.seek(SeekFrom::End(0))?;

        let mut remaining = size;
        let mut buf = [0_u8; 64 * 1024];
        let mut copied = 0_u64;
        while remaining > 0 {
            let chunk = remaining.min(buf.len() as u64) as usize;
            src.read_exact(&mut buf[..chunk])?;
            dst.write_all(&buf[..chunk])?;
            remaining -= chunk as u64;
            copied += chunk as u64;
        }
        Ok(copied)
    }
}
