use std::sync::Arc;

use tempdir::TempDir;
use tsjoin_buffers::{TsBuffer, TsBufferConfig};
use tsjoin_common::temppath::DirTempPathAllocator;

/// Isolates each test in its own temp directory (spec.md §9 design note:
/// "inject a path allocator so tests can isolate").
pub struct Harness {
    pub dir: TempDir,
    pub alloc: DirTempPathAllocator,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new("tsjoin-buffers-test").expect("tempdir");
        let alloc = DirTempPathAllocator::new(dir.path());
        Self { dir, alloc }
    }

    pub fn create(&self, auto_delete: bool) -> TsBuffer {
        TsBuffer::create(
            &self.alloc,
            TsBufferConfig {
                auto_delete,
                ..TsBufferConfig::default()
            },
        )
        .expect("create buffer")
    }
}

pub fn reopen(buf: &TsBuffer) -> TsBuffer {
    TsBuffer::open(
        buf.path(),
        TsBufferConfig {
            auto_delete: false,
            ..TsBufferConfig::default()
        },
    )
    .expect("reopen buffer")
}

/// Drains a buffer under the given order into a flat `Vec<(shard, tag, ts)>`.
pub fn drain(buf: &mut TsBuffer, order: tsjoin_common::order::Order) -> Vec<(i64, i64, i64)> {
    buf.set_order(order);
    buf.reset_pos();
    let mut out = Vec::new();
    while buf.next_pos().expect("next_pos") {
        let e = buf.get_elem();
        out.push((e.shard_id, e.tag, e.ts));
    }
    out
}

#[allow(dead_code)]
pub fn arc_of<T: 'static + Send + Sync>(v: T) -> Arc<T> {
    Arc::new(v)
}
