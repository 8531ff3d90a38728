use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempdir::TempDir;
use tsjoin_buffers::{intersect, IntersectPolicy, TsBuffer, TsBufferConfig};
use tsjoin_common::{order::Order, temppath::DirTempPathAllocator};

/// Builds a buffer of `n` triples, one tag per triple, half of which also
/// appear (same tag, same ts) in the buffer `other_offset` apart — so two
/// buffers built with offsets `0` and `k` overlap in exactly `n - k` tags.
fn build(alloc: &DirTempPathAllocator, n: u64, start_tag: i64) -> TsBuffer {
    let mut buf = TsBuffer::create(alloc, TsBufferConfig::default()).expect("create");
    for i in 0..n {
        let tag = start_tag + i as i64;
        buf.append(0, tag, 1_000 + i as i64).expect("append");
    }
    buf.flush().expect("flush");
    buf
}

fn bench_intersect(c: &mut Criterion) {
    let mut group = c.benchmark_group("intersect");
    group.measurement_time(Duration::from_secs(10));

    for &n in &[1_000u64, 10_000, 100_000] {
        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::new("half-overlap", n), &n, |b, &n| {
            b.iter_with_setup(
                || {
                    let dir = TempDir::new("tsjoin-buffers-bench").expect("tempdir");
                    let alloc = DirTempPathAllocator::new(dir.path());
                    let a = build(&alloc, n, 0);
                    let b = build(&alloc, n, (n / 2) as i64);
                    (dir, alloc, a, b)
                },
                |(dir, alloc, a, b)| {
                    let out = intersect(
                        a,
                        b,
                        Order::Asc,
                        IntersectPolicy::default(),
                        &alloc,
                        TsBufferConfig::default(),
                        &alloc,
                        TsBufferConfig::default(),
                    )
                    .expect("intersect");
                    drop(out);
                    drop(dir);
                },
            );
        });
    }

    group.finish();
}

criterion_group!(
    name = intersect_benches;
    config = Criterion::default().sample_size(20);
    targets = bench_intersect
);
criterion_main!(intersect_benches);
