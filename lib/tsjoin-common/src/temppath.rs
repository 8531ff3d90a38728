//! `spec.md` §9 design note: "Global temp-file paths (`get_tmp_file_path`)
//! are process-wide state; inject a path allocator so tests can isolate."
//!
//! `TempPathAllocator` is that seam. Production code points it at the
//! driver's real scratch directory; tests use an isolated temp directory per
//! test so concurrently-running tests never collide on a shared path.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

pub trait TempPathAllocator: Send + Sync {
    /// Allocates a fresh, not-yet-existing path for a buffer or scratch file
    /// tagged with `prefix` (e.g. `"join-"`, matching the original
    /// `get_tmp_file_path("join-")` convention).
    fn allocate(&self, prefix: &str) -> PathBuf;
}

/// Lets an `Arc<dyn TempPathAllocator>` stand in directly for the generic
/// `A: TempPathAllocator` bound `TsBuffer::create`/`open` and `intersect`
/// use, so the Join Coordinator can hold one allocator trait object shared
/// across all of a join's supporters instead of threading a concrete type
/// parameter through.
impl TempPathAllocator for Arc<dyn TempPathAllocator> {
    fn allocate(&self, prefix: &str) -> PathBuf {
        self.as_ref().allocate(prefix)
    }
}

/// Allocates paths under a fixed directory, disambiguated by a
/// process-local monotonic counter plus the given prefix.
pub struct DirTempPathAllocator {
    dir: PathBuf,
    counter: AtomicU64,
}

impl DirTempPathAllocator {
    #[must_use]
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            counter: AtomicU64::new(0),
        }
    }
}

impl TempPathAllocator for DirTempPathAllocator {
    fn allocate(&self, prefix: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("{prefix}{}-{n}.tsbuf", std::process::id()))
    }
}
