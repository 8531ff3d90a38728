//! Join Coordinator (C5): the two-phase subquery state machine (`spec.md`
//! §4.5).
//!
//! Each subquery's callback runs to completion and either issues the next
//! RPC or arrives at the shared counter (`spec.md` §5: "There is no task
//! that suspends mid-execution"); this is realized here as a tree of
//! `Box<dyn FnOnce + Send>` closures captured by `Arc<JoinRun>`, rather
//! than an `async fn` state machine, because the driving event really is
//! "an arbitrary transport thread calls back whenever it likes" and not a
//! `Future` this crate polls.

use std::sync::Arc;

use parking_lot::Mutex;
use snafu::ResultExt;
use tracing::instrument;
use tsjoin_buffers::{intersect, IntersectPolicy, TsBuffer, TsBufferConfig};
use tsjoin_common::{
    collab::{SqlTransport, SubqueryReply, SubqueryRequest},
    error::{BufferSnafu, IoSnafu, JoinError},
    order::Order,
    TempPathAllocator,
};

use crate::{
    shared_state::{JoinSharedState, Release},
    supporter::{Supporter, SubqueryPlan},
};

/// Wiring a `JoinCoordinator` needs: the transport it drives subqueries
/// through, the path allocator for scratch/buffer files, the `TsBuffer`
/// config template, and the parent's sort order.
pub struct JoinCoordinatorConfig {
    pub transport: Arc<dyn SqlTransport>,
    pub alloc: Arc<dyn TempPathAllocator>,
    pub buffer_config: TsBufferConfig,
    pub order: Order,
}

/// One join's request: the two tables' subquery plans and the parent's
/// limit/offset/aggregation policy (`spec.md` §4.2 LIMIT/OFFSET policy,
/// §4.5 second-stage launch).
pub struct JoinRequest {
    pub subqueries: Vec<SubqueryPlan>,
    pub offset: u64,
    pub is_aggregated: bool,
}

/// A completed join: the intersected timestamp range, match count, and the
/// output-column-index map (`spec.md` §4.5: "the last arriver computes the
/// output-column-index map — mapping each parent expression to the
/// `(subquery_idx, column_idx)` producing it"). Empty/zeroed when the join
/// short-circuited through `DONE_EMPTY`.
#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
    pub ts_min: i64,
    pub ts_max: i64,
    pub matched: u64,
    pub output_column_map: Vec<(usize, usize, usize)>,
    pub second_stage_rows: Vec<(usize, u64)>,
}

pub struct JoinCoordinator {
    config: JoinCoordinatorConfig,
}

impl JoinCoordinator {
    pub fn new(config: JoinCoordinatorConfig) -> Arc<Self> {
        Arc::new(Self { config })
    }

    /// `fetch_block_from_subqueries(parent)` (`spec.md` §6): runs one join
    /// to completion and returns its outcome or the sticky error it was
    /// released with.
    #[instrument(skip(self, request), level = "debug")]
    pub async fn execute(self: Arc<Self>, request: JoinRequest) -> Result<JoinOutcome, JoinError> {
        assert_eq!(request.subqueries.len(), 2, "this core joins exactly two tables (spec.md §1)");
        let run = Arc::new(JoinRun::new(Arc::clone(&self), request)?);
        run.start_first_stage(Arc::clone(&run));
        run.release.wait().await;
        run.take_result()
    }
}

struct JoinRun {
    coordinator: Arc<JoinCoordinator>,
    supporters: Vec<Arc<Supporter>>,
    offset: u64,
    is_aggregated: bool,
    release: Release,
    result: Mutex<Option<Result<JoinOutcome, JoinError>>>,
    local_error: Mutex<Option<JoinError>>,
}

impl JoinRun {
    fn new(coordinator: Arc<JoinCoordinator>, request: JoinRequest) -> Result<Self, JoinError> {
        let alloc = Arc::clone(&coordinator.config.alloc);
        let supporters = request
            .subqueries
            .into_iter()
            .enumerate()
            .map(|(idx, plan)| {
                Supporter::new(idx, plan, &alloc, coordinator.config.buffer_config.clone())
                    .map(Arc::new)
                    .context(BufferSnafu)
            })
            .collect::<Result<Vec<_>, JoinError>>()?;

        Ok(Self {
            coordinator,
            supporters,
            offset: request.offset,
            is_aggregated: request.is_aggregated,
            release: Release::new(),
            result: Mutex::new(None),
            local_error: Mutex::new(None),
        })
    }

    // ---- first stage ----

    fn start_first_stage(self: &Arc<Self>, this: Arc<Self>) {
        let shared = Arc::new(JoinSharedState::new(self.supporters.len() as u32));
        for supporter in &self.supporters {
            supporter.reset_stage();
            self.issue_first_stage_fetch(Arc::clone(&this), Arc::clone(supporter), Arc::clone(&shared));
        }
    }

    fn issue_first_stage_fetch(self: &Arc<Self>, this: Arc<Self>, supporter: Arc<Supporter>, shared: Arc<JoinSharedState>) {
        let shard_idx = supporter.inner.lock().shard_idx;
        let req = SubqueryRequest {
            subquery_idx: supporter.subquery_idx,
            shard_idx: shard_idx as i32,
            want_ts_only: true,
            ts_range: None,
        };
        self.coordinator.config.transport.process_sql(
            req,
            Box::new(move |reply| this.on_first_stage_reply(Arc::clone(&this), supporter, shared, reply)),
        );
    }

    /// `spec.md` §4.5 "Transition contracts" for first-stage arrival.
    fn on_first_stage_reply(
        self: &Arc<Self>,
        this: Arc<Self>,
        supporter: Arc<Supporter>,
        shared: Arc<JoinSharedState>,
        reply: SubqueryReply,
    ) {
        // Cancellation (spec.md §5): checked on every callback entry.
        if shared.sticky_error().is_some() || self.local_error.lock().is_some() {
            self.arrive_first_stage(this, supporter, shared);
            return;
        }

        if reply.code < 0 {
            shared.set_error(reply.code);
            self.arrive_first_stage(this, supporter, shared);
            return;
        }

        if reply.rows > 0 {
            if let Err(err) = self.merge_first_stage_block(&supporter, &reply.raw_block) {
                *self.local_error.lock() = Some(err);
                self.arrive_first_stage(this, supporter, shared);
                return;
            }
            self.issue_first_stage_fetch(this, supporter, shared);
            return;
        }

        // EOF (n=0) for the current shard.
        let is_last_shard = {
            let mut inner = supporter.inner.lock();
            if supporter.plan.is_super_table && inner.shard_idx + 1 < supporter.plan.shard_count {
                inner.shard_idx += 1;
                false
            } else {
                true
            }
        };
        if !is_last_shard {
            self.issue_first_stage_fetch(this, supporter, shared);
            return;
        }
        self.arrive_first_stage(this, supporter, shared);
    }

    fn merge_first_stage_block(&self, supporter: &Supporter, raw_block: &[u8]) -> Result<(), JoinError> {
        let scratch_path = self.coordinator.config.alloc.allocate("join-scratch-");
        std::fs::write(&scratch_path, raw_block)
            .context(IoSnafu)
            .context(BufferSnafu)?;

        let src = TsBuffer::open(
            &scratch_path,
            TsBufferConfig {
                auto_delete: true,
                ..self.coordinator.config.buffer_config.clone()
            },
        )
        .context(BufferSnafu)?;

        let mut inner = supporter.inner.lock();
        let shard_idx = inner.shard_idx;
        inner
            .buffer
            .as_mut()
            .expect("first-stage buffer taken before first stage finished")
            .merge(src, shard_idx)
            .context(BufferSnafu)
    }

    fn arrive_first_stage(self: &Arc<Self>, this: Arc<Self>, supporter: Arc<Supporter>, shared: Arc<JoinSharedState>) {
        if !supporter.mark_arrived() {
            return;
        }
        if shared.arrive() {
            self.finish_first_stage(this, shared);
        }
    }

    /// `spec.md` §4.5: "the last arriver runs the intersector, updates the
    /// parent's time range ..., and launches second-stage" — or, on a
    /// sticky error, "releases the parent with the sticky error."
    fn finish_first_stage(self: &Arc<Self>, this: Arc<Self>, shared: Arc<JoinSharedState>) {
        if let Some(err) = self.local_error.lock().take() {
            self.release_with_error(err);
            return;
        }
        if let Some(code) = shared.sticky_error() {
            self.release_with_error(JoinError::Remote { code });
            return;
        }

        let policy = IntersectPolicy {
            offset: self.offset,
            is_aggregated: self.is_aggregated,
            is_super_table: self.supporters.iter().any(|s| s.plan.is_super_table),
        };

        let buf_a = self.supporters[0].inner.lock().buffer.take().expect("buffer present at fan-in");
        let buf_b = self.supporters[1].inner.lock().buffer.take().expect("buffer present at fan-in");

        let alloc = Arc::clone(&self.coordinator.config.alloc);
        let config = self.coordinator.config.buffer_config.clone();
        match intersect(
            buf_a,
            buf_b,
            self.coordinator.config.order,
            policy,
            &alloc,
            config.clone(),
            &alloc,
            config,
        ) {
            Ok(out) if out.matched == 0 => {
                // DONE_EMPTY (spec.md §4.5 state diagram): both sides are
                // already fully drained by construction of this fan-in, so
                // it's safe to release immediately without a second stage.
                self.release_with_outcome(JoinOutcome::default());
            }
            Ok(out) => {
                let ts_range = out.ts_range.expect("matched > 0 implies a ts_range");
                self.start_second_stage(this, ts_range, out.matched);
            }
            Err(e) => self.release_with_error(JoinError::Buffer { source: e }),
        }
    }

    // ---- second stage ----

    fn start_second_stage(self: &Arc<Self>, this: Arc<Self>, ts_range: (i64, i64), matched: u64) {
        let survivors: Vec<Arc<Supporter>> = self
            .supporters
            .iter()
            .filter(|s| !s.is_dropped_in_second_stage())
            .cloned()
            .collect();

        if survivors.is_empty() {
            self.release_with_outcome(JoinOutcome {
                ts_min: ts_range.0,
                ts_max: ts_range.1,
                matched,
                output_column_map: Vec::new(),
                second_stage_rows: Vec::new(),
            });
            return;
        }

        let shared = Arc::new(JoinSharedState::new(survivors.len() as u32));
        for supporter in &survivors {
            supporter.reset_stage();
            self.issue_second_stage_fetch(Arc::clone(&this), Arc::clone(supporter), Arc::clone(&shared), ts_range, matched);
        }
    }

    fn issue_second_stage_fetch(
        self: &Arc<Self>,
        this: Arc<Self>,
        supporter: Arc<Supporter>,
        shared: Arc<JoinSharedState>,
        ts_range: (i64, i64),
        matched: u64,
    ) {
        let shard_idx = supporter.inner.lock().shard_idx;
        let req = SubqueryRequest {
            subquery_idx: supporter.subquery_idx,
            shard_idx: shard_idx as i32,
            want_ts_only: false,
            ts_range: Some(ts_range),
        };
        self.coordinator.config.transport.process_sql(
            req,
            Box::new(move |reply| {
                this.on_second_stage_reply(Arc::clone(&this), supporter, shared, reply, ts_range, matched)
            }),
        );
    }

    fn on_second_stage_reply(
        self: &Arc<Self>,
        this: Arc<Self>,
        supporter: Arc<Supporter>,
        shared: Arc<JoinSharedState>,
        reply: SubqueryReply,
        ts_range: (i64, i64),
        matched: u64,
    ) {
        if shared.sticky_error().is_some() || self.local_error.lock().is_some() {
            self.arrive_second_stage(this, supporter, shared, ts_range, matched);
            return;
        }
        if reply.code < 0 {
            shared.set_error(reply.code);
            self.arrive_second_stage(this, supporter, shared, ts_range, matched);
            return;
        }
        if reply.rows > 0 {
            {
                let mut inner = supporter.inner.lock();
                inner.second_stage_payload.extend_from_slice(&reply.raw_block);
                inner.second_stage_rows += reply.rows as u64;
            }
            self.issue_second_stage_fetch(this, supporter, shared, ts_range, matched);
            return;
        }

        let is_last_shard = {
            let mut inner = supporter.inner.lock();
            if supporter.plan.is_super_table && inner.shard_idx + 1 < supporter.plan.shard_count {
                inner.shard_idx += 1;
                false
            } else {
                true
            }
        };
        if !is_last_shard {
            self.issue_second_stage_fetch(this, supporter, shared, ts_range, matched);
            return;
        }
        self.arrive_second_stage(this, supporter, shared, ts_range, matched);
    }

    fn arrive_second_stage(
        self: &Arc<Self>,
        this: Arc<Self>,
        supporter: Arc<Supporter>,
        shared: Arc<JoinSharedState>,
        ts_range: (i64, i64),
        matched: u64,
    ) {
        if !supporter.mark_arrived() {
            return;
        }
        if shared.arrive() {
            self.finish_second_stage(shared, ts_range, matched);
        }
    }

    /// `spec.md` §4.5: "the last arriver computes the output-column-index
    /// map ... and releases the parent."
    fn finish_second_stage(self: &Arc<Self>, shared: Arc<JoinSharedState>, ts_range: (i64, i64), matched: u64) {
        if let Some(err) = self.local_error.lock().take() {
            self.release_with_error(err);
            return;
        }
        if let Some(code) = shared.sticky_error() {
            self.release_with_error(JoinError::Remote { code });
            return;
        }

        let mut output_column_map = Vec::new();
        let mut second_stage_rows = Vec::new();
        for supporter in &self.supporters {
            if supporter.is_dropped_in_second_stage() {
                continue;
            }
            for (local_idx, &parent_expr) in supporter.plan.projection_exprs.iter().enumerate() {
                output_column_map.push((parent_expr, supporter.subquery_idx, local_idx));
            }
            let rows = supporter.inner.lock().second_stage_rows;
            second_stage_rows.push((supporter.subquery_idx, rows));
        }
        output_column_map.sort_by_key(|&(parent_expr, _, _)| parent_expr);

        self.release_with_outcome(JoinOutcome {
            ts_min: ts_range.0,
            ts_max: ts_range.1,
            matched,
            output_column_map,
            second_stage_rows,
        });
    }

    // ---- release ----

    fn release_with_error(&self, err: JoinError) {
        *self.result.lock() = Some(Err(err));
        self.release.fire();
    }

    fn release_with_outcome(&self, outcome: JoinOutcome) {
        *self.result.lock() = Some(Ok(outcome));
        self.release.fire();
    }

    fn take_result(&self) -> Result<JoinOutcome, JoinError> {
        self.result.lock().take().expect("release fired without a stored result")
    }
}
