//! Quick benchmarks for CI and development feedback.
//!
//! Run with:
//! ```
//! cargo bench --bench bench_quick
//! ```

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use dimjoin_rs::config::GeneratorConfig;
use dimjoin_rs::generator::DataGenerator;
use dimjoin_rs::test_support::random_chain;
use dimjoin_rs::{
    dedup_chain, dedup_chain_islands, AttributeSchema, DedupEngine, IntervalStore,
    JoinOrchestrator, PointInTimeResolver, RollingWindow,
};
use std::collections::HashMap;
use std::hint::black_box;
use std::time::Duration;

// =============================================================================
// DEDUP BENCHMARKS
// =============================================================================

fn bench_dedup_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("quick/dedup");
    group.sample_size(20);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    for len in [100usize, 10_000] {
        let chain = random_chain("1", "g", 1, len, 3, 42);
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::new("linear", len), &chain, |b, chain| {
            b.iter(|| black_box(dedup_chain(chain).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("islands", len), &chain, |b, chain| {
            b.iter(|| black_box(dedup_chain_islands(chain).unwrap()))
        });
    }

    group.finish();
}

fn bench_dedup_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("quick/dedup");
    group.sample_size(10);

    let store: IntervalStore = (0..2_000u64)
        .flat_map(|entity| random_chain(&entity.to_string(), &entity.to_string(), entity * 100, 20, 3, entity))
        .collect();
    group.throughput(Throughput::Elements(store.record_count() as u64));
    group.bench_function("engine_2000_entities", |b| {
        b.iter(|| black_box(DedupEngine::default().run(&store)))
    });

    group.finish();
}

// =============================================================================
// RESOLVE + JOIN BENCHMARKS
// =============================================================================

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("quick/resolve");

    let chain = random_chain("1", "g", 1, 5_000, 3, 7);
    let merged = dedup_chain(&chain).unwrap();
    let entity = dimjoin_rs::EntityId::from("1");
    let (resolver, _) = PointInTimeResolver::build([(&entity, merged.as_slice())]);
    let key = dimjoin_rs::GroupKey::from("g");
    let days: Vec<time::Date> = chain.iter().map(|record| record.validity.from).collect();

    group.throughput(Throughput::Elements(days.len() as u64));
    group.bench_function("point_in_time_5000", |b| {
        b.iter(|| {
            for day in &days {
                black_box(resolver.resolve(&key, *day));
            }
        })
    });

    group.finish();
}

fn bench_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("quick/join");
    group.sample_size(10);

    let config = GeneratorConfig {
        users: 1_000,
        transactions: 20_000,
        reference_date: Some("2021-01-01".to_string()),
        ..Default::default()
    };
    let dataset = DataGenerator::new(config, AttributeSchema::default())
        .unwrap()
        .generate();
    let store: IntervalStore = dataset.agreements.iter().cloned().collect();
    let outcome = DedupEngine::default().run(&store);
    let (resolver, _) = PointInTimeResolver::build(
        outcome
            .chains
            .iter()
            .map(|(entity, chain)| (entity, chain.as_slice())),
    );
    let users: HashMap<_, _> = dataset.users.iter().cloned().collect();
    let events: Vec<_> = dataset
        .transactions
        .iter()
        .map(|raw| raw.clone().parse().unwrap())
        .collect();

    group.throughput(Throughput::Elements(events.len() as u64));
    for partitions in [1usize, 4] {
        group.bench_with_input(
            BenchmarkId::new("partitions", partitions),
            &events,
            |b, events| {
                b.iter_batched(
                    || events.clone(),
                    |events| {
                        let orchestrator = JoinOrchestrator::new(&resolver, &users)
                            .with_window(RollingWindow::default())
                            .with_partitions(partitions);
                        black_box(orchestrator.run_events(events))
                    },
                    BatchSize::LargeInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_dedup_chain,
    bench_dedup_store,
    bench_resolve,
    bench_join
);
criterion_main!(benches);
