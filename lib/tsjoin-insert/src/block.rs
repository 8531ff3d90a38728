//! Insert Block Assembler (C4): batches per-table rows into growable,
//! per-shard insert blocks and finalizes them into wire-ready payloads
//! (`spec.md` §4.4).
//!
//! Grounded on `tscParseInsert.c`'s `tsCheckTimestamp`/`tsParseOneRowData`:
//! the same three pieces of per-block state (`ordered`, `prev_ts`,
//! `ts_source`) are tracked here, and the ×1.5 growth rule and
//! sort-then-dedup finalization follow that file's `tscAllocateMemIfNeed`/
//! `sortRemoveDataBlockDupRows` pair.

use std::collections::HashMap;

use tracing::trace;
use tsjoin_common::error::{IncompatibleTsSourceSnafu, InsertError};

/// Which clock produced a block's timestamps; set by the first row
/// appended and never changed afterward (`spec.md` §4.4: "mixing within
/// one block is an `IncompatibleTsSource` error").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsSource {
    Unset,
    Server,
    Client,
}

/// Per-table insert-in-progress state (`spec.md` §4.4 "state per block").
pub struct BlockState {
    table_uid: u64,
    sid: i32,
    sversion: i32,
    row_size: usize,
    payload: Vec<u8>,
    num_rows: u32,
    ordered: bool,
    ts_source: TsSource,
    prev_ts: i64,
}

impl BlockState {
    fn new(table_uid: u64, sid: i32, sversion: i32, initial_size: usize, row_size: usize) -> Self {
        Self {
            table_uid,
            sid,
            sversion,
            row_size,
            payload: Vec::with_capacity(initial_size.max(row_size)),
            num_rows: 0,
            ordered: true,
            ts_source: TsSource::Unset,
            prev_ts: 0,
        }
    }

    pub fn num_rows(&self) -> u32 {
        self.num_rows
    }

    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    fn grow_if_needed(&mut self) {
        let remaining = self.payload.capacity() - self.payload.len();
        if remaining < 5 * self.row_size {
            let new_cap = (self.payload.capacity() as f64 * 1.5).ceil() as usize;
            self.payload.reserve(new_cap.saturating_sub(self.payload.capacity()));
        }
    }
}

/// A finalized block ready for the wire (`spec.md` §4.4: `SubmitBlock{
/// sid, uid, sversion, num_rows, payload }`).
#[derive(Debug, Clone)]
pub struct SubmitBlock {
    pub sid: i32,
    pub uid: u64,
    pub sversion: i32,
    pub num_rows: u32,
    pub payload: Vec<u8>,
}

/// One shard's batch of finalized blocks, grouped for bulk submission to
/// that shard's subquery.
#[derive(Debug, Clone)]
pub struct ShardBatch {
    pub sid: i32,
    pub blocks: Vec<SubmitBlock>,
}

/// Owns the in-progress per-table blocks for one INSERT statement.
#[derive(Default)]
pub struct InsertBlockAssembler {
    blocks: HashMap<u64, BlockState>,
}

impl InsertBlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// `get_or_create_block(table_uid, initial_size, row_size) -> Block`
    /// (`spec.md` §4.4), extended with the shard id and schema version a
    /// real block needs at finalization time.
    pub fn get_or_create_block(
        &mut self,
        table_uid: u64,
        sid: i32,
        sversion: i32,
        initial_size: usize,
        row_size: usize,
    ) -> &mut BlockState {
        self.blocks
            .entry(table_uid)
            .or_insert_with(|| BlockState::new(table_uid, sid, sversion, initial_size, row_size))
    }

    /// `append_row(block, row_bytes)` (`spec.md` §4.4). `row_bytes` is one
    /// fully-parsed row, its primary timestamp column occupying the first
    /// 8 bytes little-endian.
    pub fn append_row(&mut self, table_uid: u64, row_bytes: &[u8]) -> Result<(), InsertError> {
        let block = self
            .blocks
            .get_mut(&table_uid)
            .expect("append_row called without a prior get_or_create_block");
        debug_assert_eq!(row_bytes.len(), block.row_size);

        let ts = i64::from_le_bytes(row_bytes[0..8].try_into().unwrap());
        let source = if ts == 0 { TsSource::Server } else { TsSource::Client };

        match block.ts_source {
            TsSource::Unset => block.ts_source = source,
            existing if existing != source => return IncompatibleTsSourceSnafu.fail(),
            _ => {}
        }

        if source == TsSource::Client && block.num_rows > 0 && ts <= block.prev_ts {
            block.ordered = false;
        }
        block.prev_ts = ts;

        block.grow_if_needed();
        block.payload.extend_from_slice(row_bytes);
        block.num_rows += 1;
        Ok(())
    }

    /// `finalize(block) -> wire-ready payload` (`spec.md` §4.4): if the
    /// block never went out of order, the accumulated bytes are already
    /// correct; otherwise stable-sorts rows by timestamp and drops
    /// duplicate timestamps, keeping the first occurrence.
    pub fn finalize(&mut self, table_uid: u64) -> SubmitBlock {
        let mut block = self
            .blocks
            .remove(&table_uid)
            .expect("finalize called without a prior get_or_create_block");

        if !block.ordered {
            sort_and_dedup_rows(&mut block.payload, block.row_size);
            block.num_rows = (block.payload.len() / block.row_size) as u32;
            trace!(table_uid, rows = block.num_rows, "reordered insert block");
        }

        SubmitBlock {
            sid: block.sid,
            uid: block.table_uid,
            sversion: block.sversion,
            num_rows: block.num_rows,
            payload: block.payload,
        }
    }

    /// `merge_by_shard(blocks) -> Vec<Block>` (`spec.md` §4.4): groups
    /// already-finalized blocks by destination shard so the transport can
    /// submit one batch per shard instead of one round-trip per table.
    pub fn merge_by_shard(blocks: Vec<SubmitBlock>) -> Vec<ShardBatch> {
        let mut order: Vec<i32> = Vec::new();
        let mut by_sid: HashMap<i32, Vec<SubmitBlock>> = HashMap::new();
        for block in blocks {
            if !by_sid.contains_key(&block.sid) {
                order.push(block.sid);
            }
            by_sid.entry(block.sid).or_default().push(block);
        }
        order
            .into_iter()
            .map(|sid| ShardBatch {
                sid,
                blocks: by_sid.remove(&sid).unwrap_or_default(),
            })
            .collect()
    }
}

fn sort_and_dedup_rows(payload: &mut Vec<u8>, row_size: usize) {
    let mut rows: Vec<&[u8]> = payload.chunks(row_size).collect();
    rows.sort_by_key(|row| i64::from_le_bytes(row[0..8].try_into().unwrap()));

    let mut out = Vec::with_capacity(payload.len());
    let mut last_ts: Option<i64> = None;
    for row in rows {
        let ts = i64::from_le_bytes(row[0..8].try_into().unwrap());
        if last_ts == Some(ts) {
            continue;
        }
        out.extend_from_slice(row);
        last_ts = Some(ts);
    }
    *payload = out;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: i64, extra: u8) -> Vec<u8> {
        let mut v = ts.to_le_bytes().to_vec();
        v.push(extra);
        v
    }

    #[test]
    fn scenario_4_now_then_earlier_triggers_reorder_on_finalize() {
        let mut assembler = InsertBlockAssembler::new();
        assembler.get_or_create_block(1, 0, 1, 64, 9);

        let first_ts = 1_700_000_000_000_i64;
        assembler.append_row(1, &row(first_ts, 1)).unwrap();
        assembler.append_row(1, &row(first_ts - 5 * 3_600_000, 2)).unwrap();

        let block = assembler.blocks.get(&1).unwrap();
        assert!(!block.is_ordered());

        let submitted = assembler.finalize(1);
        assert_eq!(submitted.num_rows, 2);
        let first_row_ts = i64::from_le_bytes(submitted.payload[0..8].try_into().unwrap());
        assert_eq!(first_row_ts, first_ts - 5 * 3_600_000);
    }

    #[test]
    fn scenario_5_mixed_server_and_client_time_is_rejected() {
        let mut assembler = InsertBlockAssembler::new();
        assembler.get_or_create_block(1, 0, 1, 64, 9);
        assembler.append_row(1, &row(0, 1)).unwrap();
        let err = assembler.append_row(1, &row(1234, 2)).unwrap_err();
        assert!(matches!(err, InsertError::IncompatibleTsSource));
    }

    #[test]
    fn finalize_dedups_rows_sharing_a_timestamp() {
        let mut assembler = InsertBlockAssembler::new();
        assembler.get_or_create_block(1, 0, 1, 64, 9);
        assembler.append_row(1, &row(100, 1)).unwrap();
        assembler.append_row(1, &row(50, 2)).unwrap();
        assembler.append_row(1, &row(50, 3)).unwrap();

        let submitted = assembler.finalize(1);
        assert_eq!(submitted.num_rows, 2);
    }

    #[test]
    fn merge_by_shard_groups_blocks_by_destination_shard() {
        let blocks = vec![
            SubmitBlock { sid: 1, uid: 10, sversion: 1, num_rows: 1, payload: vec![] },
            SubmitBlock { sid: 2, uid: 20, sversion: 1, num_rows: 1, payload: vec![] },
            SubmitBlock { sid: 1, uid: 11, sversion: 1, num_rows: 1, payload: vec![] },
        ];
        let batches = InsertBlockAssembler::merge_by_shard(blocks);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].sid, 1);
        assert_eq!(batches[0].blocks.len(), 2);
        assert_eq!(batches[1].sid, 2);
        assert_eq!(batches[1].blocks.len(), 1);
    }
}
