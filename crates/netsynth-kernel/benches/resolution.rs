use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use netsynth_kernel::test_harness::fixtures;
use netsynth_kernel::{NetworkResolver, Plan, ResolverConfig};
use netsynth_model::{InstanceRequirements, SelectionContext};

fn batch_resolution(c: &mut Criterion) {
    let registry = fixtures::registry();
    let mut group = c.benchmark_group("resolve");
    for size in [10usize, 50, 200] {
        let batch: Vec<InstanceRequirements> = ["Outer", "Pipeline", "MonitoredPipeline", "Relay"]
            .iter()
            .cycle()
            .take(size)
            .map(|m| InstanceRequirements::from_models(&registry, [*m]).unwrap())
            .collect();

        group.bench_with_input(BenchmarkId::new("merge", size), &batch, |b, batch| {
            let resolver = NetworkResolver::new(&registry)
                .with_config(ResolverConfig::new().with_max_merge_passes(size * 8));
            b.iter(|| {
                let mut plan = Plan::new();
                black_box(resolver.resolve(&mut plan, batch, &SelectionContext::new()).unwrap())
            });
        });
        group.bench_with_input(BenchmarkId::new("no_merge", size), &batch, |b, batch| {
            let resolver =
                NetworkResolver::new(&registry).with_config(ResolverConfig::new().with_merge(false));
            b.iter(|| {
                let mut plan = Plan::new();
                black_box(resolver.resolve(&mut plan, batch, &SelectionContext::new()).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, batch_resolution);
criterion_main!(benches);
