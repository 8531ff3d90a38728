//! Encoding/decoding of a single TS-Block (`spec.md` §3, §6).
//!
//! `Block: tag: i64, n: u32, comp_len: u32, payload: [u8; comp_len], comp_len: u32 (trailing)`.
//! All triples in a block share `tag`; the trailing `comp_len` is a sentinel
//! that must equal the leading one, letting `Cursor` walk a shard-section
//! backwards without a separate index (it reads the trailing four bytes,
//! learns `comp_len`, and seeks back to the block's head).
//!
//! This is a fixed, bit-exact struct layout rather than a self-describing
//! archive, so (unlike the teacher's `rkyv`-based `disk_v2::record`) plain
//! byte slicing is the right tool here.

use snafu::ensure;
use tsjoin_common::{error::BadSentinelSnafu, BufferError, TsCodec};

use crate::common::BLOCK_FIXED_SIZE;

/// An encoded block, ready to be appended to a data file.
pub struct EncodedBlock {
    pub tag: i64,
    pub n: u32,
    pub comp_len: u32,
    pub bytes: Vec<u8>,
}

impl EncodedBlock {
    /// Total on-disk size of this block, including both `comp_len` fields.
    pub fn on_disk_len(&self) -> u64 {
        BLOCK_FIXED_SIZE + u64::from(self.comp_len)
    }
}

/// Compresses `timestamps` (all sharing `tag`) into a ready-to-write block.
pub fn encode_block(
    tag: i64,
    timestamps: &[i64],
    codec: &dyn TsCodec,
    codec_scratch: &mut Vec<u8>,
) -> EncodedBlock {
    let mut payload = Vec::with_capacity(codec.bound(timestamps.len()));
    let comp_len = codec.compress(timestamps, &mut payload, codec_scratch) as u32;

    let n = timestamps.len() as u32;
    let mut bytes = Vec::with_capacity(BLOCK_FIXED_SIZE as usize + payload.len());
    bytes.extend_from_slice(&tag.to_le_bytes());
    bytes.extend_from_slice(&n.to_le_bytes());
    bytes.extend_from_slice(&comp_len.to_le_bytes());
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&comp_len.to_le_bytes());

    EncodedBlock {
        tag,
        n,
        comp_len,
        bytes,
    }
}

/// Parsed leading header of a block: `(tag, n, comp_len)`, plus the absolute
/// offset (relative to the block's start) where the payload begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub tag: i64,
    pub n: u32,
    pub comp_len: u32,
}

pub const BLOCK_LEADING_HEADER_SIZE: usize = 8 + 4 + 4;

/// Parses the leading `tag, n, comp_len` fields from the start of a block.
pub fn decode_leading_header(buf: &[u8]) -> BlockHeader {
    let tag = i64::from_le_bytes(buf[0..8].try_into().unwrap());
    let n = u32::from_le_bytes(buf[8..12].try_into().unwrap());
    let comp_len = u32::from_le_bytes(buf[12..16].try_into().unwrap());
    BlockHeader { tag, n, comp_len }
}

/// Parses the trailing sentinel `comp_len` from the last four bytes of a
/// block, given just those four bytes (used when seeking backwards).
pub fn decode_trailing_sentinel(buf: &[u8; 4]) -> u32 {
    u32::from_le_bytes(*buf)
}

/// Checks that a just-read block's leading/trailing `comp_len` agree.
pub fn verify_sentinel(leading: u32, trailing: u32) -> Result<(), BufferError> {
    ensure!(
        leading == trailing,
        BadSentinelSnafu { leading, trailing }
    );
    Ok(())
}

/// Decompresses a block's payload into `out`, given its already-parsed
/// header and the raw payload bytes.
pub fn decode_payload(
    header: BlockHeader,
    payload: &[u8],
    codec: &dyn TsCodec,
    out: &mut Vec<i64>,
    codec_scratch: &mut Vec<u8>,
) {
    codec.decompress(payload, header.n, out, codec_scratch);
}
