//! Intersector (C2): sort-merge two TS-Buffers on `(tag, ts)` into two
//! output buffers plus the matched timestamp range (`spec.md` §4.2).
//!
//! Grounded directly on `original_source/tscJoinProcess.c`'s
//! `doTSBlockIntersect`: same comparison order (`tag` primary, `ts`
//! secondary under the query's sort order), same limit/offset short-circuit,
//! same "force `Asc`" tie-break when an output's order never got to lock in.

use tracing::{instrument, trace};
use tsjoin_common::{order::Order, BufferError, TempPathAllocator};

use crate::buffer::{Cursor, TsBuffer, TsBufferConfig};

/// The parent query's limit/offset policy as it affects intersection
/// (`spec.md` §4.2): offset is consumed here only for a plain (non-aggregated,
/// non-super-table) join; otherwise it's left for the downstream second-stage
/// query to apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntersectPolicy {
    pub offset: u64,
    pub is_aggregated: bool,
    pub is_super_table: bool,
}

impl IntersectPolicy {
    fn applies_offset_here(&self) -> bool {
        !self.is_aggregated && !self.is_super_table
    }
}

/// Result of intersecting two TS-Buffers.
pub struct IntersectOutput {
    pub output_a: TsBuffer,
    pub output_b: TsBuffer,
    /// `None` when no triples matched (inputs were empty or disjoint).
    pub ts_range: Option<(i64, i64)>,
    pub matched: u64,
}

/// Intersects `a` and `b` under sort order `order`, consuming both inputs
/// (`spec.md` §4.2 step 4: "destroy inputs").
#[instrument(skip(a, b, alloc_a, alloc_b), level = "debug")]
pub fn intersect<A: TempPathAllocator, B: TempPathAllocator>(
    mut a: TsBuffer,
    mut b: TsBuffer,
    order: Order,
    mut policy: IntersectPolicy,
    alloc_a: &A,
    config_a: TsBufferConfig,
    alloc_b: &B,
    config_b: TsBufferConfig,
) -> Result<IntersectOutput, BufferError> {
    let mut output_a = TsBuffer::create(alloc_a, config_a)?;
    let mut output_b = TsBuffer::create(alloc_b, config_b)?;

    a.reset_pos();
    b.reset_pos();
    a.set_cursor(Cursor {
        shard_idx: -1,
        block_idx: -1,
        ts_idx: -1,
        order,
    })?;
    b.set_cursor(Cursor {
        shard_idx: -1,
        block_idx: -1,
        ts_idx: -1,
        order,
    })?;

    if !a.next_pos()? || !b.next_pos()? {
        output_a.flush()?;
        output_b.flush()?;
        trace!("one input empty, skipping second-stage intersection");
        return Ok(IntersectOutput {
            output_a,
            output_b,
            ts_range: None,
            matched: 0,
        });
    }

    let mut ts_min = i64::MAX;
    let mut ts_max = i64::MIN;
    let mut matched = 0_u64;

    loop {
        let elem_a = a.get_elem();
        let elem_b = b.get_elem();

        if elem_a.tag < elem_b.tag || (elem_a.tag == elem_b.tag && order.sorts_before(elem_a.ts, elem_b.ts)) {
            if !a.next_pos()? {
                break;
            }
        } else if elem_a.tag > elem_b.tag
            || (elem_a.tag == elem_b.tag && order.sorts_before(elem_b.ts, elem_a.ts))
        {
            if !b.next_pos()? {
                break;
            }
        } else {
            ts_min = ts_min.min(elem_a.ts);
            ts_max = ts_max.max(elem_a.ts);

            if policy.applies_offset_here() && policy.offset > 0 {
                policy.offset -= 1;
            } else {
                output_a.append(elem_a.shard_id as u32, elem_a.tag, elem_a.ts)?;
                output_b.append(elem_b.shard_id as u32, elem_b.tag, elem_b.ts)?;
                matched += 1;
            }

            if !a.next_pos()? {
                break;
            }
            if !b.next_pos()? {
                break;
            }
        }
    }

    // Tie-break (spec.md §4.2): force Asc if an output's order never locked
    // in (at most one match per tag).
    if output_a.ts_order().is_unset() {
        output_a.set_ts_order(Order::Asc);
    }
    if output_b.ts_order().is_unset() {
        output_b.set_ts_order(Order::Asc);
    }

    output_a.flush()?;
    output_b.flush()?;

    let ts_range = if matched == 0 { None } else { Some((ts_min, ts_max)) };

    trace!(matched, ?ts_range, "intersection complete");
    Ok(IntersectOutput {
        output_a,
        output_b,
        ts_range,
        matched,
    })
}
