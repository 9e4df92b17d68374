/*!
 * Link Benchmarks
 *
 * Round trips over in-process links and handle heap access, both driven
 * from the benchmark thread through unstarted flows
 */

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;
use vic_runtime::{BackingKind, Flow, Runtime, RuntimeConfig};

fn setup(dir: &std::path::Path) -> (Runtime, Flow, Flow) {
    let config = RuntimeConfig::default()
        .with_socket_dir(dir)
        .with_attempt_timeout(Duration::from_millis(50))
        .with_poll_interval(Duration::from_millis(1));
    let rt = Runtime::with_config(config);
    let a = rt.create(BackingKind::Thread).unwrap();
    let b = rt.create(BackingKind::Thread).unwrap();
    rt.link(&a, &b, "bench").unwrap();
    let fa = rt.bind_flow(&a, |_| {}, None).unwrap();
    let fb = rt.bind_flow(&b, |_| {}, None).unwrap();
    (rt, fa, fb)
}

fn bench_inproc_round_trip(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let (_rt, fa, fb) = setup(dir.path());
    let mut group = c.benchmark_group("inproc_round_trip");

    for size in [16usize, 1024, 64 * 1024] {
        let payload = vec![7u8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                fa.send("bench", black_box(payload)).unwrap();
                let msg = fb.recv("bench").unwrap();
                fb.send("bench", &msg).unwrap();
                black_box(fa.recv("bench").unwrap());
            });
        });
    }

    group.finish();
}

fn bench_heap_access(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let (rt, fa, _fb) = setup(dir.path());
    let heap = rt.heap();
    let handle = heap.allocate_array(&fa, 256, 8).unwrap();

    c.bench_function("heap_write_read_at", |b| {
        let mut i = 0usize;
        b.iter(|| {
            heap.write_at(&fa, handle, i % 256, &(i as u64).to_le_bytes())
                .unwrap();
            black_box(heap.read_at(&fa, handle, i % 256).unwrap());
            i += 1;
        });
    });
}

criterion_group!(benches, bench_inproc_round_trip, bench_heap_access);
criterion_main!(benches);
