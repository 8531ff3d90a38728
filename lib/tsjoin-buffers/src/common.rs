//! On-disk layout constants and header/directory types for the TS-Buffer
//! file format (`spec.md` §3, §6).
//!
//! Field order and widths here are bit-exact per spec.md §6; this module
//! only does layout math and (de)serialization of the fixed-size header and
//! directory, mirroring the role `disk_v2::common` plays for the teacher's
//! segment format (sizing constants, directory-style bookkeeping), minus the
//! rkyv archive machinery — this format is a plain fixed C-struct layout, not
//! a self-describing archive, so plain byte slicing is the idiomatic match.

use std::io;

use tsjoin_common::{error::BadMagicSnafu, BufferError};

use snafu::ResultExt;

/// `spec.md` §6: "magic: u32 = 0xABCD1234-like sentinel".
pub const MAGIC: u32 = 0xABCD_1234;

/// Compile-time shard directory capacity (`spec.md` §3 example).
pub const MAX_SHARDS: usize = 256;

/// Minimum staging-buffer size (`spec.md` §4.1).
pub const MEM_BUF_SIZE: usize = 64 * 1024;

pub const FILE_HEADER_SIZE: u64 = 4 + 4 + 4; // magic, shard_count, ts_order
pub const SHARD_DIR_ENTRY_SIZE: u64 = 4 + 8 + 4 + 4; // shard_id, offset, comp_len, num_blocks
pub const SHARD_DIR_SIZE: u64 = SHARD_DIR_ENTRY_SIZE * MAX_SHARDS as u64;
pub const DATA_BASE_OFFSET: u64 = FILE_HEADER_SIZE + SHARD_DIR_SIZE;

/// `tag:i64, n:u32, comp_len:u32` leading fields plus the trailing
/// `comp_len:u32` sentinel; `comp_len` bytes of payload sit in between.
pub const BLOCK_FIXED_SIZE: u64 = 8 + 4 + 4 + 4;

/// Raw on-disk file header (`spec.md` §3 `FileHeader`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub magic: u32,
    pub shard_count: u32,
    /// `-1` = Desc, `0` = Unset, `1` = Asc.
    pub ts_order: i32,
}

impl FileHeader {
    pub fn to_bytes(self) -> [u8; FILE_HEADER_SIZE as usize] {
        let mut buf = [0_u8; FILE_HEADER_SIZE as usize];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.shard_count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.ts_order.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self, BufferError> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        if magic != MAGIC {
            return BadMagicSnafu {
                expected: MAGIC,
                found: magic,
            }
            .fail();
        }
        let shard_count = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let ts_order = i32::from_le_bytes(buf[8..12].try_into().unwrap());
        if !(-1..=1).contains(&ts_order) {
            return tsjoin_common::error::BadOrderSnafu { value: ts_order }.fail();
        }
        Ok(Self {
            magic,
            shard_count,
            ts_order,
        })
    }
}

/// Raw on-disk directory entry (`spec.md` §3 `ShardDirEntry`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShardDirEntry {
    pub shard_id: u32,
    pub file_offset: u64,
    pub comp_len: u32,
    pub num_blocks: u32,
}

impl ShardDirEntry {
    pub fn is_empty_slot(self) -> bool {
        self == ShardDirEntry::default()
    }

    pub fn to_bytes(self) -> [u8; SHARD_DIR_ENTRY_SIZE as usize] {
        let mut buf = [0_u8; SHARD_DIR_ENTRY_SIZE as usize];
        buf[0..4].copy_from_slice(&self.shard_id.to_le_bytes());
        buf[4..12].copy_from_slice(&self.file_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.comp_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.num_blocks.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            shard_id: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            file_offset: u64::from_le_bytes(buf[4..12].try_into().unwrap()),
            comp_len: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            num_blocks: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
        }
    }

    /// Total on-disk bytes occupied by this section's blocks so far (sum of
    /// `BLOCK_FIXED_SIZE + comp_len` across its blocks); used to know where
    /// the next block in this section must land, and where the section ends
    /// for `merge`'s offset rebasing.
    pub fn section_byte_len(self) -> u64 {
        u64::from(self.comp_len)
    }
}

pub(crate) fn io_err(source: io::Error) -> BufferError {
    BufferError::Io { source }
}

pub(crate) fn context_io<T>(r: io::Result<T>) -> Result<T, BufferError> {
    r.context(tsjoin_common::error::IoSnafu)
}
