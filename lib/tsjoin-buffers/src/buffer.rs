//! TS-Buffer (C1): the append-only, segmented, compressed on-disk store of
//! `(shard, tag, ts)` triples, with a bidirectional tag-grouped cursor
//! (`spec.md` §3, §4.1).
//!
//! Modeled on the teacher's `disk_v2::writer`/`disk_v2::reader` split, but
//! collapsed into one type: this format's reader and writer share the same
//! file descriptor and are never used concurrently from different threads
//! (`spec.md` §5 — "written only by that subquery's callback thread").

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use snafu::{ensure, ResultExt};
use tracing::{debug, instrument, trace};
use tsjoin_common::{
    error::{IoSnafu, TooManyShardsSnafu},
    collab::{FileTransfer, StdFileTransfer, TsCodec},
    order::{Order, OrderState},
    BufferError, TempPathAllocator,
};

use crate::{
    block::{
        decode_leading_header, decode_payload, decode_trailing_sentinel, encode_block,
        verify_sentinel, BlockHeader, BLOCK_LEADING_HEADER_SIZE,
    },
    codec::DeltaVarintCodec,
    common::{
        FileHeader, ShardDirEntry, DATA_BASE_OFFSET, FILE_HEADER_SIZE, MAGIC, MAX_SHARDS,
        MEM_BUF_SIZE, SHARD_DIR_ENTRY_SIZE,
    },
};

/// A single `(shard, tag, ts)` triple (`spec.md` §3).
///
/// `shard_id` is `i64` rather than `u32` so that sentinel results (from
/// `get_start_pos`, or an exhausted cursor) can be represented as `-1`
/// without an `Option` wrapper, matching the original's sentinel style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triple {
    pub shard_id: i64,
    pub tag: i64,
    pub ts: i64,
}

impl Triple {
    pub const NOT_FOUND: Triple = Triple {
        shard_id: -1,
        tag: 0,
        ts: 0,
    };

    pub fn is_sentinel(&self) -> bool {
        self.shard_id < 0
    }
}

/// Cursor position (`spec.md` §3). `shard_idx = -1` is the before-first /
/// after-last sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub shard_idx: i32,
    pub block_idx: i32,
    pub ts_idx: i32,
    pub order: Order,
}

impl Cursor {
    fn sentinel(order: Order) -> Self {
        Self {
            shard_idx: -1,
            block_idx: -1,
            ts_idx: -1,
            order,
        }
    }
}

/// The cursor's decompressed view of its current block — an owned buffer
/// reconstructed on demand, not a self-referential pointer into it
/// (`spec.md` §9 design note).
struct DecodedBlock {
    shard_idx: usize,
    block_idx: u32,
    file_offset: u64,
    header: BlockHeader,
    timestamps: Vec<i64>,
}

/// Configuration for creating a fresh `TsBuffer` (ambient addition; mirrors
/// the teacher's `DiskBufferConfig`/`DiskBufferConfigBuilder`).
#[derive(Clone)]
pub struct TsBufferConfig {
    pub auto_delete: bool,
    pub mem_buf_size: usize,
    pub codec: Arc<dyn TsCodec>,
    pub file_transfer: Arc<dyn FileTransfer>,
}

impl Default for TsBufferConfig {
    fn default() -> Self {
        Self {
            auto_delete: true,
            mem_buf_size: MEM_BUF_SIZE,
            codec: Arc::new(DeltaVarintCodec),
            file_transfer: Arc::new(StdFileTransfer),
        }
    }
}

pub struct TsBuffer {
    file: File,
    path: PathBuf,
    auto_delete: bool,
    mem_buf_size: usize,
    codec: Arc<dyn TsCodec>,
    file_transfer: Arc<dyn FileTransfer>,

    shard_dir: Vec<ShardDirEntry>,
    ts_order: OrderState,
    last_ts: Option<i64>,
    num_total: u64,

    current_shard_id: Option<u32>,
    current_tag: Option<i64>,
    staging: Vec<i64>,
    codec_scratch: Vec<u8>,

    cursor: Cursor,
    decoded: Option<DecodedBlock>,
}

impl TsBuffer {
    /// `create(auto_delete) -> Buffer` (`spec.md` §4.1): allocates an empty
    /// buffer backed by a new file.
    pub fn create<A: TempPathAllocator>(
        alloc: &A,
        config: TsBufferConfig,
    ) -> Result<Self, BufferError> {
        let path = alloc.allocate("join-");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .context(IoSnafu)?;

        let header = FileHeader {
            magic: MAGIC,
            shard_count: 0,
            ts_order: 0,
        };
        file.write_all(&header.to_bytes()).context(IoSnafu)?;
        let empty_entry = [0_u8; SHARD_DIR_ENTRY_SIZE as usize];
        for _ in 0..MAX_SHARDS {
            file.write_all(&empty_entry).context(IoSnafu)?;
        }
        file.sync_all().context(IoSnafu)?;

        Ok(Self {
            file,
            path,
            auto_delete: config.auto_delete,
            mem_buf_size: config.mem_buf_size.max(MEM_BUF_SIZE),
            codec: config.codec,
            file_transfer: config.file_transfer,
            shard_dir: Vec::new(),
            ts_order: OrderState::Unset,
            last_ts: None,
            num_total: 0,
            current_shard_id: None,
            current_tag: None,
            staging: Vec::new(),
            codec_scratch: Vec::new(),
            cursor: Cursor::sentinel(Order::Asc),
            decoded: None,
        })
    }

    /// `open(path, auto_delete) -> Buffer | Err` (`spec.md` §4.1).
    #[instrument(skip(config), level = "debug")]
    pub fn open<P: AsRef<Path>>(path: P, config: TsBufferConfig) -> Result<Self, BufferError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .context(IoSnafu)?;

        let mut header_buf = [0_u8; FILE_HEADER_SIZE as usize];
        file.read_exact(&mut header_buf).context(IoSnafu)?;
        let header = FileHeader::from_bytes(&header_buf)?;

        let mut shard_dir = Vec::with_capacity(header.shard_count as usize);
        for _ in 0..header.shard_count {
            let mut entry_buf = [0_u8; SHARD_DIR_ENTRY_SIZE as usize];
            file.read_exact(&mut entry_buf).context(IoSnafu)?;
            shard_dir.push(ShardDirEntry::from_bytes(&entry_buf));
        }

        let ts_order = match header.ts_order {
            0 => OrderState::Unset,
            1 => OrderState::Locked(Order::Asc),
            -1 => OrderState::Locked(Order::Desc),
            other => return tsjoin_common::error::BadOrderSnafu { value: other }.fail(),
        };

        let num_total = shard_dir.iter().map(|e| u64::from(e.num_blocks)).sum::<u64>();
        // num_blocks isn't the row count; recompute exactly by reading each
        // block's `n`. Cheap relative to the I/O already done above, and
        // keeps invariant 5 (`num_total = Σ block.n`) honest after reopen.
        let num_total = Self::count_rows(&mut file, &shard_dir).unwrap_or(num_total);

        debug!(shards = shard_dir.len(), num_total, "opened ts-buffer");

        Ok(Self {
            file,
            path,
            auto_delete: config.auto_delete,
            mem_buf_size: config.mem_buf_size.max(MEM_BUF_SIZE),
            codec: config.codec,
            file_transfer: config.file_transfer,
            shard_dir,
            ts_order,
            last_ts: None,
            num_total,
            current_shard_id: None,
            current_tag: None,
            staging: Vec::new(),
            codec_scratch: Vec::new(),
            cursor: Cursor::sentinel(Order::Asc),
            decoded: None,
        })
    }

    fn count_rows(file: &mut File, shard_dir: &[ShardDirEntry]) -> std::io::Result<u64> {
        let mut total = 0_u64;
        for entry in shard_dir {
            let mut offset = entry.file_offset;
            let end = entry.file_offset + entry.section_byte_len();
            while offset < end {
                file.seek(SeekFrom::Start(offset))?;
                let mut hdr = [0_u8; BLOCK_LEADING_HEADER_SIZE];
                file.read_exact(&mut hdr)?;
                let header = decode_leading_header(&hdr);
                total += u64::from(header.n);
                offset += crate::common::BLOCK_FIXED_SIZE + u64::from(header.comp_len);
            }
        }
        Ok(total)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_total(&self) -> u64 {
        self.num_total
    }

    pub fn ts_order(&self) -> OrderState {
        self.ts_order
    }

    pub fn shard_count(&self) -> usize {
        self.shard_dir.len()
    }

    /// Forces `ts_order`, used by the intersector's tie-break rule
    /// (`spec.md` §4.2): "if an output buffer's `ts_order` remained `Unset`
    /// ..., force it to `Asc`."
    pub fn set_ts_order(&mut self, order: Order) {
        self.ts_order = OrderState::Locked(order);
    }

    /// `append(shard, tag, ts_bytes, len)` (`spec.md` §4.1). Takes a decoded
    /// `i64` here rather than raw bytes — `ts_bytes` in the original
    /// interface is this same little-endian `i64`, already decoded by the
    /// insert/subquery path before it reaches the buffer.
    #[instrument(skip(self), level = "trace")]
    pub fn append(&mut self, shard_id: u32, tag: i64, ts: i64) -> Result<(), BufferError> {
        // Order detection (spec.md §4.1 / invariant 5): compare against the
        // last-seen key; lock a direction the first time they differ. Once
        // locked it never changes (spec.md §3 invariant 4) — appends that
        // run the other way are accepted without complaint (spec.md §9 open
        // question: TODO upstream; we document and accept rather than
        // silently drop data).
        if let Some(last) = self.last_ts {
            if self.ts_order.is_unset() && last != ts {
                self.ts_order = OrderState::Locked(if ts > last { Order::Asc } else { Order::Desc });
            }
        }
        self.last_ts = Some(ts);

        let shard_changed = self.current_shard_id != Some(shard_id);
        let tag_changed = !shard_changed && self.current_tag != Some(tag);

        if shard_changed || tag_changed {
            self.flush()?;
        }

        if shard_changed {
            self.open_shard_section(shard_id)?;
        }
        self.current_tag = Some(tag);

        self.staging.push(ts);
        self.num_total += 1;
        Ok(())
    }

    fn open_shard_section(&mut self, shard_id: u32) -> Result<(), BufferError> {
        ensure!(
            self.shard_dir.len() < MAX_SHARDS,
            TooManyShardsSnafu { max: MAX_SHARDS }
        );
        let file_offset = self.file_len()?;
        self.shard_dir.push(ShardDirEntry {
            shard_id,
            file_offset,
            comp_len: 0,
            num_blocks: 0,
        });
        self.current_shard_id = Some(shard_id);
        Ok(())
    }

    fn file_len(&mut self) -> Result<u64, BufferError> {
        self.file.seek(SeekFrom::End(0)).context(IoSnafu)
    }

    /// `flush()` (`spec.md` §4.1): compresses pending timestamps into a new
    /// block, appends it to the file, updates the owning shard-directory
    /// entry, and rewrites the directory entry + header.
    #[instrument(skip(self), level = "debug")]
    pub fn flush(&mut self) -> Result<(), BufferError> {
        if self.staging.is_empty() {
            return Ok(());
        }
        let tag = self.current_tag.expect("staging non-empty implies an open tag");
        let encoded = encode_block(tag, &self.staging, self.codec.as_ref(), &mut self.codec_scratch);

        self.file.seek(SeekFrom::End(0)).context(IoSnafu)?;
        self.file.write_all(&encoded.bytes).context(IoSnafu)?;
        self.file.sync_data().context(IoSnafu)?;

        let entry = self
            .shard_dir
            .last_mut()
            .expect("flush only runs once a shard section is open");
        entry.comp_len += encoded.on_disk_len() as u32;
        entry.num_blocks += 1;

        self.rewrite_header_and_last_entry()?;

        self.staging.clear();
        if self.staging.capacity() * 8 > 2 * self.mem_buf_size {
            self.staging.shrink_to(self.mem_buf_size / 8);
        }

        trace!(tag, n = encoded.n, comp_len = encoded.comp_len, "flushed block");
        Ok(())
    }

    fn rewrite_header_and_last_entry(&mut self) -> Result<(), BufferError> {
        let header = FileHeader {
            magic: MAGIC,
            shard_count: self.shard_dir.len() as u32,
            ts_order: match self.ts_order {
                OrderState::Unset => 0,
                OrderState::Locked(Order::Asc) => 1,
                OrderState::Locked(Order::Desc) => -1,
            },
        };
        self.file.seek(SeekFrom::Start(0)).context(IoSnafu)?;
        self.file.write_all(&header.to_bytes()).context(IoSnafu)?;

        let idx = self.shard_dir.len() - 1;
        let entry_offset = FILE_HEADER_SIZE + idx as u64 * SHARD_DIR_ENTRY_SIZE;
        self.file.seek(SeekFrom::Start(entry_offset)).context(IoSnafu)?;
        self.file
            .write_all(&self.shard_dir[idx].to_bytes())
            .context(IoSnafu)?;
        self.file.sync_all().context(IoSnafu)?;
        Ok(())
    }

    fn rewrite_full_directory(&mut self) -> Result<(), BufferError> {
        let header = FileHeader {
            magic: MAGIC,
            shard_count: self.shard_dir.len() as u32,
            ts_order: match self.ts_order {
                OrderState::Unset => 0,
                OrderState::Locked(Order::Asc) => 1,
                OrderState::Locked(Order::Desc) => -1,
            },
        };
        self.file.seek(SeekFrom::Start(0)).context(IoSnafu)?;
        self.file.write_all(&header.to_bytes()).context(IoSnafu)?;
        for entry in &self.shard_dir {
            self.file.write_all(&entry.to_bytes()).context(IoSnafu)?;
        }
        // Pad remaining, never-used directory slots so the file's directory
        // region stays exactly `MAX_SHARDS` entries wide.
        let empty_entry = [0_u8; SHARD_DIR_ENTRY_SIZE as usize];
        for _ in self.shard_dir.len()..MAX_SHARDS {
            self.file.write_all(&empty_entry).context(IoSnafu)?;
        }
        self.file.sync_all().context(IoSnafu)?;
        Ok(())
    }

    /// `merge(src, new_shard_id) -> ok | Err(TooManyShards)` (`spec.md`
    /// §4.1): flushes self, splices `src`'s data region in verbatim, and
    /// grafts its directory entries onto self with offsets rebased and
    /// shard id relabelled to `new_shard_id`.
    #[instrument(skip(self, src), level = "debug")]
    pub fn merge(&mut self, mut src: TsBuffer, new_shard_id: u32) -> Result<(), BufferError> {
        self.flush()?;
        src.flush()?;

        for (i, src_entry) in src.shard_dir.iter().enumerate() {
            let dst_offset = self.file_len()?;
            let len = src_entry.section_byte_len();
            if len > 0 {
                self.file_transfer
                    .copy_file_range(&self.file, &src.file, src_entry.file_offset, len)
                    .context(IoSnafu)?;
            }

            let accumulate = i == 0
                && self
                    .shard_dir
                    .last()
                    .map(|e| e.shard_id == new_shard_id)
                    .unwrap_or(false);

            if accumulate {
                let last = self.shard_dir.last_mut().unwrap();
                last.comp_len += src_entry.comp_len;
                last.num_blocks += src_entry.num_blocks;
            } else {
                ensure!(
                    self.shard_dir.len() < MAX_SHARDS,
                    TooManyShardsSnafu { max: MAX_SHARDS }
                );
                self.shard_dir.push(ShardDirEntry {
                    shard_id: new_shard_id,
                    file_offset: dst_offset,
                    comp_len: src_entry.comp_len,
                    num_blocks: src_entry.num_blocks,
                });
            }
        }

        self.num_total += src.num_total;
        self.current_shard_id = self.shard_dir.last().map(|e| e.shard_id);
        self.current_tag = None;
        self.rewrite_full_directory()?;

        debug!(new_shard_id, merged_rows = src.num_total, "merged buffer");
        Ok(())
    }

    /// `clone() -> Buffer`: re-opens the same path with `auto_delete =
    /// false`, providing an independent cursor.
    pub fn clone_reader(&self) -> Result<TsBuffer, BufferError> {
        TsBuffer::open(
            &self.path,
            TsBufferConfig {
                auto_delete: false,
                mem_buf_size: self.mem_buf_size,
                codec: Arc::clone(&self.codec),
                file_transfer: Arc::clone(&self.file_transfer),
            },
        )
    }

    // ---- Cursor API (spec.md §4.1) ----

    pub fn get_cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: Cursor) -> Result<(), BufferError> {
        self.cursor = cursor;
        self.decoded = None;
        if cursor.shard_idx >= 0 {
            self.load_block_by_index(cursor.shard_idx as usize, cursor.block_idx as u32)?;
        }
        Ok(())
    }

    pub fn set_order(&mut self, order: Order) {
        self.cursor.order = order;
    }

    pub fn reset_pos(&mut self) {
        self.cursor = Cursor::sentinel(self.cursor.order);
        self.decoded = None;
    }

    /// Advances the cursor one element; `true` if a new element is now
    /// current, `false` on exhaustion (`spec.md` §4.1 cursor semantics).
    pub fn next_pos(&mut self) -> Result<bool, BufferError> {
        if self.shard_dir.is_empty() {
            self.cursor.shard_idx = -1;
            return Ok(false);
        }

        if self.cursor.shard_idx < 0 {
            return self.position_at_boundary_shard();
        }

        // Advance within the current block first.
        let decoded = self.decoded.as_ref().expect("positioned cursor has a decoded block");
        let next_ts_idx = match self.cursor.order {
            Order::Asc => self.cursor.ts_idx + 1,
            Order::Desc => self.cursor.ts_idx - 1,
        };
        if next_ts_idx >= 0 && (next_ts_idx as usize) < decoded.timestamps.len() {
            self.cursor.ts_idx = next_ts_idx;
            return Ok(true);
        }

        // Crossed a block boundary: try the next/previous block in this shard.
        if self.advance_block()? {
            return Ok(true);
        }

        // Crossed a shard boundary: try the next/previous shard.
        self.advance_shard()
    }

    fn position_at_boundary_shard(&mut self) -> Result<bool, BufferError> {
        let shard_count = self.shard_dir.len();
        let mut idx: i32 = match self.cursor.order {
            Order::Asc => 0,
            Order::Desc => shard_count as i32 - 1,
        };
        loop {
            if idx < 0 || idx as usize >= shard_count {
                self.cursor.shard_idx = -1;
                return Ok(false);
            }
            if self.shard_dir[idx as usize].num_blocks > 0 {
                self.cursor.shard_idx = idx;
                self.position_at_boundary_block(idx as usize)?;
                return Ok(true);
            }
            idx += match self.cursor.order {
                Order::Asc => 1,
                Order::Desc => -1,
            };
        }
    }

    fn position_at_boundary_block(&mut self, shard_idx: usize) -> Result<(), BufferError> {
        let entry = self.shard_dir[shard_idx];
        let (file_offset, block_idx) = match self.cursor.order {
            Order::Asc => (entry.file_offset, 0),
            Order::Desc => {
                let (offset, idx) = self.find_last_block(shard_idx)?;
                (offset, idx)
            }
        };
        self.load_block_at(shard_idx, block_idx, file_offset)?;
        let decoded = self.decoded.as_ref().unwrap();
        self.cursor.block_idx = block_idx as i32;
        self.cursor.ts_idx = match self.cursor.order {
            Order::Asc => 0,
            Order::Desc => decoded.timestamps.len() as i32 - 1,
        };
        Ok(())
    }

    /// Finds the file offset and 0-based index of the last block in a
    /// shard-section by reading the trailing sentinel and walking
    /// backwards once (`spec.md` §4.1: "Desc traversal reads the trailing
    /// `comp_len` sentinel first, then seeks back ... to the block's head").
    fn find_last_block(&mut self, shard_idx: usize) -> Result<(u64, u32), BufferError> {
        let entry = self.shard_dir[shard_idx];
        let section_end = entry.file_offset + entry.section_byte_len();
        let (offset, _) = self.seek_block_head_from_tail(section_end)?;
        Ok((offset, entry.num_blocks - 1))
    }

    fn seek_block_head_from_tail(&mut self, section_end: u64) -> Result<(u64, u32), BufferError> {
        let mut sentinel_buf = [0_u8; 4];
        self.file
            .seek(SeekFrom::Start(section_end - 4))
            .context(IoSnafu)?;
        self.file.read_exact(&mut sentinel_buf).context(IoSnafu)?;
        let comp_len = decode_trailing_sentinel(&sentinel_buf);
        let block_size = crate::common::BLOCK_FIXED_SIZE + u64::from(comp_len);
        Ok((section_end - block_size, comp_len))
    }

    fn advance_block(&mut self) -> Result<bool, BufferError> {
        let decoded = self.decoded.as_ref().unwrap();
        let shard_idx = decoded.shard_idx;
        let entry = self.shard_dir[shard_idx];

        match self.cursor.order {
            Order::Asc => {
                let next_block_idx = decoded.block_idx + 1;
                if next_block_idx >= entry.num_blocks {
                    return Ok(false);
                }
                let next_offset =
                    decoded.file_offset + crate::common::BLOCK_FIXED_SIZE + u64::from(decoded.header.comp_len);
                self.load_block_at(shard_idx, next_block_idx, next_offset)?;
                self.cursor.block_idx = next_block_idx as i32;
                self.cursor.ts_idx = 0;
                Ok(true)
            }
            Order::Desc => {
                if decoded.block_idx == 0 {
                    return Ok(false);
                }
                let (prev_offset, _) = self.seek_block_head_from_tail(decoded.file_offset)?;
                let prev_block_idx = decoded.block_idx - 1;
                self.load_block_at(shard_idx, prev_block_idx, prev_offset)?;
                self.cursor.block_idx = prev_block_idx as i32;
                self.cursor.ts_idx = self.decoded.as_ref().unwrap().timestamps.len() as i32 - 1;
                Ok(true)
            }
        }
    }

    fn advance_shard(&mut self) -> Result<bool, BufferError> {
        let mut idx = self.cursor.shard_idx
            + match self.cursor.order {
                Order::Asc => 1,
                Order::Desc => -1,
            };
        loop {
            if idx < 0 || idx as usize >= self.shard_dir.len() {
                self.cursor.shard_idx = -1;
                self.decoded = None;
                return Ok(false);
            }
            if self.shard_dir[idx as usize].num_blocks > 0 {
                self.cursor.shard_idx = idx;
                self.position_at_boundary_block(idx as usize)?;
                return Ok(true);
            }
            idx += match self.cursor.order {
                Order::Asc => 1,
                Order::Desc => -1,
            };
        }
    }

    fn load_block_at(&mut self, shard_idx: usize, block_idx: u32, file_offset: u64) -> Result<(), BufferError> {
        self.file.seek(SeekFrom::Start(file_offset)).context(IoSnafu)?;
        let mut hdr_buf = [0_u8; BLOCK_LEADING_HEADER_SIZE];
        self.file.read_exact(&mut hdr_buf).context(IoSnafu)?;
        let header = decode_leading_header(&hdr_buf);

        let mut payload = vec![0_u8; header.comp_len as usize];
        self.file.read_exact(&mut payload).context(IoSnafu)?;

        let mut trailing_buf = [0_u8; 4];
        self.file.read_exact(&mut trailing_buf).context(IoSnafu)?;
        verify_sentinel(header.comp_len, decode_trailing_sentinel(&trailing_buf))?;

        let mut timestamps = Vec::with_capacity(header.n as usize);
        decode_payload(header, &payload, self.codec.as_ref(), &mut timestamps, &mut self.codec_scratch);

        self.decoded = Some(DecodedBlock {
            shard_idx,
            block_idx,
            file_offset,
            header,
            timestamps,
        });
        Ok(())
    }

    /// Loads the `block_idx`-th block of `shard_idx` by walking forward
    /// from the section head; used by `set_cursor` to restore an
    /// arbitrary saved position.
    fn load_block_by_index(&mut self, shard_idx: usize, block_idx: u32) -> Result<(), BufferError> {
        let entry = self.shard_dir[shard_idx];
        let mut offset = entry.file_offset;
        for i in 0..=block_idx {
            if i == block_idx {
                self.load_block_at(shard_idx, i, offset)?;
                return Ok(());
            }
            let mut hdr_buf = [0_u8; BLOCK_LEADING_HEADER_SIZE];
            self.file.seek(SeekFrom::Start(offset)).context(IoSnafu)?;
            self.file.read_exact(&mut hdr_buf).context(IoSnafu)?;
            let header = decode_leading_header(&hdr_buf);
            offset += crate::common::BLOCK_FIXED_SIZE + u64::from(header.comp_len);
        }
        Ok(())
    }

    pub fn get_elem(&self) -> Triple {
        let decoded = match self.decoded.as_ref() {
            Some(d) if self.cursor.shard_idx >= 0 => d,
            _ => return Triple::NOT_FOUND,
        };
        Triple {
            shard_id: i64::from(self.shard_dir[self.cursor.shard_idx as usize].shard_id),
            tag: decoded.header.tag,
            ts: decoded.timestamps[self.cursor.ts_idx as usize],
        }
    }

    /// `get_start_pos(shard, tag) -> Triple` (`spec.md` §4.1): linear scan
    /// of the shard's blocks (in current order) until a block with the
    /// matching tag is found; positions the cursor at that block's
    /// first/last element depending on `order`.
    #[instrument(skip(self), level = "trace")]
    pub fn get_start_pos(&mut self, shard_id: i64, tag: i64) -> Result<Triple, BufferError> {
        let order = self.cursor.order;
        let matching: Vec<usize> = self
            .shard_dir
            .iter()
            .enumerate()
            .filter(|(_, e)| i64::from(e.shard_id) == shard_id)
            .map(|(i, _)| i)
            .collect();
        if matching.is_empty() {
            self.cursor = Cursor::sentinel(order);
            self.decoded = None;
            return Ok(Triple::NOT_FOUND);
        }

        let ordered_shards: Vec<usize> = match order {
            Order::Asc => matching,
            Order::Desc => matching.into_iter().rev().collect(),
        };

        for shard_idx in ordered_shards {
            let entry = self.shard_dir[shard_idx];
            let mut offset = entry.file_offset;
            let mut blocks_forward = Vec::new();
            for block_idx in 0..entry.num_blocks {
                self.file.seek(SeekFrom::Start(offset)).context(IoSnafu)?;
                let mut hdr_buf = [0_u8; BLOCK_LEADING_HEADER_SIZE];
                self.file.read_exact(&mut hdr_buf).context(IoSnafu)?;
                let header = decode_leading_header(&hdr_buf);
                blocks_forward.push((block_idx, offset, header));
                offset += crate::common::BLOCK_FIXED_SIZE + u64::from(header.comp_len);
            }

            let candidates: Vec<_> = match order {
                Order::Asc => blocks_forward,
                Order::Desc => blocks_forward.into_iter().rev().collect(),
            };

            if let Some((block_idx, offset, header)) = candidates.into_iter().find(|(_, _, h)| h.tag == tag) {
                self.load_block_at(shard_idx, block_idx, offset)?;
                self.cursor.shard_idx = shard_idx as i32;
                self.cursor.block_idx = block_idx as i32;
                self.cursor.ts_idx = match order {
                    Order::Asc => 0,
                    Order::Desc => header.n as i32 - 1,
                };
                return Ok(self.get_elem());
            }
        }

        self.cursor = Cursor::sentinel(order);
        self.decoded = None;
        Ok(Triple::NOT_FOUND)
    }
}

impl Drop for TsBuffer {
    fn drop(&mut self) {
        if self.auto_delete {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
