//! The per-join fan-in primitives (`spec.md` §4.5, §5).
//!
//! `JoinSharedState` is the `{ pending: atomic u32, total: u32, err: atomic
//! i32 }` object spec.md names, one instance per stage (first-stage drain,
//! second-stage drain) since `spec.md` §9 documents the original as
//! resetting `pending`/`total` between stages. `Release` is the
//! caller-blocking half: a one-shot wakeup fired exactly once per join by
//! whichever callback turns out to be the final "last arriver"
//! (`spec.md` §5: "the originating thread ... waits on a binary semaphore
//! until the coordinator signals completion"). These are two different
//! lifetimes — a `JoinSharedState` lives one stage, a `Release` lives the
//! whole join — so they're kept as separate types rather than one object
//! that would need resetting mid-flight.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;

/// Fan-in counter for one stage of one join.
pub struct JoinSharedState {
    pending: AtomicU32,
    total: u32,
    err: AtomicI32,
}

impl JoinSharedState {
    #[must_use]
    pub fn new(total: u32) -> Self {
        Self {
            pending: AtomicU32::new(0),
            total,
            err: AtomicI32::new(0),
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Sets the sticky error slot. Last-write-wins (`spec.md` §7:
    /// "first-writer-wins is not required; last write is acceptable
    /// because any error is terminal for the join").
    pub fn set_error(&self, code: i32) {
        self.err.store(code, Ordering::SeqCst);
    }

    /// `Some(code)` once any subquery has set a sticky error; `code` is
    /// the raw (possibly negative) transport code, never `0`.
    pub fn sticky_error(&self) -> Option<i32> {
        match self.err.load(Ordering::SeqCst) {
            0 => None,
            code => Some(code),
        }
    }

    /// Atomically increments `pending`; the caller for which this returns
    /// `true` is the "last arriver" and alone executes the fan-in step
    /// (`spec.md` §5: "the callback that increments `pending` to `total`
    /// is the sole executor of the fan-in steps").
    pub fn arrive(&self) -> bool {
        let previous = self.pending.fetch_add(1, Ordering::SeqCst);
        previous + 1 == self.total
    }
}

/// The whole-join caller-blocking handle. A `tokio::sync::oneshot` is used
/// rather than `Notify`: the last arriver may run its release step
/// synchronously, before the caller's task ever reaches `wait` — a oneshot
/// buffers that send, `Notify::notify_waiters` would silently drop it.
pub struct Release {
    tx: Mutex<Option<oneshot::Sender<()>>>,
    rx: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Release {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Wakes the caller blocked in `wait`. Idempotent: only the first
    /// call has any effect, guaranteeing the parent is released exactly
    /// once (`spec.md` invariant 7).
    pub fn fire(&self) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(());
        }
    }

    pub async fn wait(&self) {
        let rx = self.rx.lock().take().expect("wait called more than once");
        let _ = rx.await;
    }
}

impl Default for Release {
    fn default() -> Self {
        Self::new()
    }
}
