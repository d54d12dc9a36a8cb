//! Benchmarks for the assignment balance policy.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use nebula_ingest::assign::{balance, NodeLoad};
use nebula_meta::NodeId;

fn bench_balance(c: &mut Criterion) {
    let mut group = c.benchmark_group("balance");
    for spec_count in [100usize, 1_000, 10_000] {
        let loads: Vec<NodeLoad> = (0..16)
            .map(|i| NodeLoad {
                id: NodeId::new(format!("node-{i:02}"), 9199),
                size: (i as u64) * 1024,
            })
            .collect();
        let specs: Vec<(String, u64)> = (0..spec_count)
            .map(|i| (format!("events@0/{i:016x}"), (i as u64 % 97) * 4096))
            .collect();

        group.bench_with_input(
            BenchmarkId::from_parameter(spec_count),
            &specs,
            |b, specs| {
                b.iter(|| balance(loads.clone(), specs));
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_balance);
criterion_main!(benches);
