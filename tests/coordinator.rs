//! Concrete scenario 6 and invariant 7 from `spec.md` §8/§3: a failing
//! subquery releases the parent exactly once with the transport's error
//! code, and a clean two-table join releases with the intersected,
//! second-stage-projected result regardless of callback interleaving.

mod common;

use std::collections::HashMap;

use common::{Harness, ScriptedReply, ScriptedTransport};
use tsjoin::{
    JoinCoordinator, JoinCoordinatorConfig, JoinRequest, Order, SubqueryPlan,
};

fn plan(is_super_table: bool, shard_count: u32, projection_exprs: Vec<usize>) -> SubqueryPlan {
    SubqueryPlan { is_super_table, shard_count, projection_exprs }
}

#[tokio::test]
async fn scenario_6_remote_error_releases_parent_with_abs_code_once() {
    let h = Harness::new();

    let mut scripts = HashMap::new();
    // Subquery 0 (err = -42): fails on its very first first-stage reply.
    scripts.insert(0, vec![ScriptedReply::error(-42)]);
    // Subquery 1: returns one batch then EOF — its callback must still run
    // to completion even though subquery 0 already poisoned the join.
    scripts.insert(
        1,
        vec![
            ScriptedReply::data(common::ts_buffer_bytes(&h, 0, &[(1, 100)]), 1),
            ScriptedReply::eof(),
        ],
    );
    let transport = ScriptedTransport::new(scripts);

    let coordinator = JoinCoordinator::new(JoinCoordinatorConfig {
        transport,
        alloc: h.alloc.clone(),
        buffer_config: h.buffer_config(),
        order: Order::Asc,
    });

    let request = JoinRequest {
        subqueries: vec![plan(false, 1, vec![0]), plan(false, 1, vec![1])],
        offset: 0,
        is_aggregated: false,
    };

    let err = coordinator.execute(request).await.expect_err("subquery 0 reported an error");
    assert_eq!(err.result_code(), 42);
}

#[tokio::test]
async fn clean_join_releases_exactly_once_with_matched_rows() {
    let h = Harness::new();

    let mut scripts = HashMap::new();
    scripts.insert(
        0,
        vec![
            ScriptedReply::data(common::ts_buffer_bytes(&h, 0, &[(1, 100), (1, 200), (2, 50)]), 3),
            ScriptedReply::eof(),
            // Second-stage fetch for the matched range.
            ScriptedReply::data(common::ts_buffer_bytes(&h, 0, &[(1, 100), (1, 200)]), 2),
            ScriptedReply::eof(),
        ],
    );
    scripts.insert(
        1,
        vec![
            ScriptedReply::data(common::ts_buffer_bytes(&h, 0, &[(1, 100), (1, 200)]), 2),
            ScriptedReply::eof(),
            ScriptedReply::data(common::ts_buffer_bytes(&h, 0, &[(1, 100), (1, 200)]), 2),
            ScriptedReply::eof(),
        ],
    );
    let transport = ScriptedTransport::new(scripts);

    let coordinator = JoinCoordinator::new(JoinCoordinatorConfig {
        transport,
        alloc: h.alloc.clone(),
        buffer_config: h.buffer_config(),
        order: Order::Asc,
    });

    let request = JoinRequest {
        subqueries: vec![plan(false, 1, vec![0]), plan(false, 1, vec![1])],
        offset: 0,
        is_aggregated: false,
    };

    let outcome = coordinator.execute(request).await.expect("clean join");
    assert_eq!(outcome.matched, 2);
    assert_eq!(outcome.ts_min, 100);
    assert_eq!(outcome.ts_max, 200);
    assert_eq!(outcome.output_column_map.len(), 2);
}

#[tokio::test]
async fn disjoint_inputs_short_circuit_to_done_empty() {
    let h = Harness::new();

    let mut scripts = HashMap::new();
    scripts.insert(
        0,
        vec![ScriptedReply::data(common::ts_buffer_bytes(&h, 0, &[(1, 100)]), 1), ScriptedReply::eof()],
    );
    scripts.insert(
        1,
        vec![ScriptedReply::data(common::ts_buffer_bytes(&h, 0, &[(2, 999)]), 1), ScriptedReply::eof()],
    );
    let transport = ScriptedTransport::new(scripts);

    let coordinator = JoinCoordinator::new(JoinCoordinatorConfig {
        transport,
        alloc: h.alloc.clone(),
        buffer_config: h.buffer_config(),
        order: Order::Asc,
    });

    let request = JoinRequest {
        subqueries: vec![plan(false, 1, vec![0]), plan(false, 1, vec![1])],
        offset: 0,
        is_aggregated: false,
    };

    let outcome = coordinator.execute(request).await.expect("empty join is not an error");
    assert_eq!(outcome.matched, 0);
    assert!(outcome.output_column_map.is_empty());
}
