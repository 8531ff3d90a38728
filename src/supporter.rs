//! The per-subquery coordination record (`spec.md` §4.5 "supporter
//! record", §GLOSSARY: "the per-subquery coordination record held by the
//! Join Coordinator").
//!
//! Mutable fields live behind a `parking_lot::Mutex` rather than being
//! written lock-free: `spec.md` §5 documents the *accumulating* TS-Buffer
//! as single-writer because one subquery's callbacks never overlap in the
//! original, but this crate makes no such assumption about the
//! `SqlTransport` implementations it will be handed, so the supporter is
//! safe to share across an arbitrary transport's callback threads.

use parking_lot::Mutex;
use tsjoin_buffers::{TsBuffer, TsBufferConfig};
use tsjoin_common::{error::BufferError, TempPathAllocator};

/// One parent-query-side table's join plan: whether it spans a super
/// table (multiple shards iterated in sequence) and which parent
/// projection expressions it contributes (`spec.md` §4.5 "Second-stage
/// launch").
#[derive(Debug, Clone)]
pub struct SubqueryPlan {
    pub is_super_table: bool,
    pub shard_count: u32,
    pub projection_exprs: Vec<usize>,
}

pub(crate) struct SupporterInner {
    pub shard_idx: u32,
    /// Present for the duration of first-stage drain; taken by the last
    /// arriver to feed the intersector (`spec.md` §4.2 step 4: "destroy
    /// inputs" — ownership moves out rather than being cloned).
    pub buffer: Option<TsBuffer>,
    pub second_stage_payload: Vec<u8>,
    pub second_stage_rows: u64,
    arrived_this_stage: bool,
}

/// Per-subquery state for the duration of one join (`spec.md` §4.5:
/// "parent pointer, shared state ..., the subquery's index, saved
/// projection/filter info, a scratch file handle and path ..., and the
/// growing TS-Buffer"). The scratch file is represented here by the
/// `TempPathAllocator` each data-arrival callback uses to open a fresh
/// one-shot `TsBuffer` before merging it in — see `coordinator.rs`.
pub struct Supporter {
    pub subquery_idx: usize,
    pub plan: SubqueryPlan,
    pub(crate) inner: Mutex<SupporterInner>,
}

impl Supporter {
    pub fn new<A: TempPathAllocator>(
        subquery_idx: usize,
        plan: SubqueryPlan,
        alloc: &A,
        config: TsBufferConfig,
    ) -> Result<Self, BufferError> {
        let buffer = TsBuffer::create(alloc, config)?;
        Ok(Self {
            subquery_idx,
            plan,
            inner: Mutex::new(SupporterInner {
                shard_idx: 0,
                buffer: Some(buffer),
                second_stage_payload: Vec::new(),
                second_stage_rows: 0,
                arrived_this_stage: false,
            }),
        })
    }

    /// Has no projection expressions of its own (`spec.md` §4.5:
    /// "Second-stage launch drops subqueries whose projection list is
    /// empty — they existed only for filter/tag contribution").
    pub fn is_dropped_in_second_stage(&self) -> bool {
        self.plan.projection_exprs.is_empty()
    }

    /// Resets the per-stage shard cursor and arrival guard; called once
    /// before a supporter's first-stage or second-stage fetches begin.
    pub fn reset_stage(&self) {
        let mut inner = self.inner.lock();
        inner.shard_idx = 0;
        inner.arrived_this_stage = false;
    }

    /// Marks this supporter as having reached its terminal state for the
    /// current stage (EOF, error, or cancellation). Returns `true` only
    /// the first time, guarding against a stray re-entrant callback
    /// double-counting the shared `pending` counter.
    pub fn mark_arrived(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.arrived_this_stage {
            false
        } else {
            inner.arrived_this_stage = true;
            true
        }
    }
}
