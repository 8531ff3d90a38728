//! Test fixtures for the Join Coordinator: an isolated temp directory and a
//! scripted `SqlTransport` fake, the way `tsjoin-buffers`' own `tests/common`
//! builds a `Harness` instead of hitting a real cluster.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    thread,
};

use tempdir::TempDir;
use tsjoin::{
    DirTempPathAllocator, SqlTransport, SubqueryReply, SubqueryRequest, TempPathAllocator, TsBuffer,
    TsBufferConfig,
};

pub struct Harness {
    pub dir: TempDir,
    pub alloc: Arc<dyn TempPathAllocator>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new("tsjoin-coordinator-test").expect("tempdir");
        let alloc = Arc::new(DirTempPathAllocator::new(dir.path()));
        Self { dir, alloc }
    }

    pub fn buffer_config(&self) -> TsBufferConfig {
        TsBufferConfig {
            auto_delete: true,
            ..TsBufferConfig::default()
        }
    }
}

/// Serializes a scratch `(shard, tag, ts)` triple set into TS-Buffer
/// on-disk bytes, the form `SubqueryReply::raw_block` carries (the
/// coordinator writes it straight to a scratch path and reopens it with
/// `TsBuffer::open`).
pub fn ts_buffer_bytes(h: &Harness, shard_id: u32, triples: &[(i64, i64)]) -> Vec<u8> {
    let mut buf = TsBuffer::create(&h.alloc, h.buffer_config()).expect("create scratch buffer");
    for &(tag, ts) in triples {
        buf.append(shard_id, tag, ts).expect("append");
    }
    buf.flush().expect("flush");
    std::fs::read(buf.path()).expect("read scratch buffer bytes")
}

/// One scripted reply a fake subquery hands back in sequence, regardless of
/// which shard or stage it's asked about — tests script the whole sequence
/// of replies a subquery index will give across both stages up front.
#[derive(Clone)]
pub struct ScriptedReply {
    pub rows: i64,
    pub code: i32,
    pub raw_block: Vec<u8>,
}

impl ScriptedReply {
    pub fn eof() -> Self {
        Self { rows: 0, code: 0, raw_block: Vec::new() }
    }

    pub fn error(code: i32) -> Self {
        Self { rows: 0, code, raw_block: Vec::new() }
    }

    pub fn data(raw_block: Vec<u8>, rows: i64) -> Self {
        Self { rows, code: 0, raw_block }
    }
}

/// A fake `SqlTransport` driven entirely by a pre-scripted reply queue per
/// subquery index. Every `process_sql` call is answered on a freshly
/// spawned thread (`spec.md` §5: "the callback may run on any thread");
/// this also exercises the coordinator against out-of-order arrival since
/// thread scheduling is not controlled.
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<usize, VecDeque<ScriptedReply>>>,
}

impl ScriptedTransport {
    pub fn new(scripts: HashMap<usize, Vec<ScriptedReply>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect()),
        })
    }
}

impl SqlTransport for ScriptedTransport {
    fn process_sql(&self, request: SubqueryRequest, on_complete: Box<dyn FnOnce(SubqueryReply) + Send>) {
        let reply = {
            let mut scripts = self.scripts.lock().expect("scripts mutex poisoned");
            let queue = scripts
                .get_mut(&request.subquery_idx)
                .expect("no script queued for this subquery index");
            queue.pop_front().expect("script exhausted before subquery reached terminal state")
        };
        thread::spawn(move || {
            on_complete(SubqueryReply {
                rows: reply.rows,
                code: reply.code,
                raw_block: reply.raw_block,
            });
        });
    }
}
