//! Benchmarks for full maintenance runs

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use memory_lifecycle::config::EngineConfig;
use memory_lifecycle::events::EventBus;
use memory_lifecycle::maintenance::MaintenanceScheduler;
use memory_lifecycle::metrics::LifecycleMetrics;
use memory_lifecycle::{InMemoryStore, ManualClock, Memory, MemoryStore, SqliteStore};

fn population(n: usize) -> Vec<Memory> {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            Memory::new(
                format!("m-{:06}", i),
                now - Duration::hours((i as i64 * 53) % 6000),
                (i % 5) as u8 + 1,
                ((i / 5) % 5) as u8 + 1,
            )
        })
        .collect()
}

fn scheduler(store: Arc<dyn MemoryStore>, workers: usize) -> MaintenanceScheduler {
    let mut config = EngineConfig::default();
    config.maintenance.workers = workers;
    MaintenanceScheduler::new(
        store,
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        )),
        &config,
        Arc::new(LifecycleMetrics::new()),
        EventBus::new(),
    )
}

fn bench_in_memory_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("maintenance_in_memory");
    group.sample_size(20);

    for workers in [1, 4] {
        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &w| {
            b.iter_batched(
                || scheduler(Arc::new(InMemoryStore::with_memories(population(10_000))), w),
                |s| s.run(),
                criterion::BatchSize::LargeInput,
            )
        });
    }

    group.finish();
}

fn bench_sqlite_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("maintenance_sqlite");
    group.sample_size(10);
    group.throughput(Throughput::Elements(2_000));

    group.bench_function("run_2000", |b| {
        b.iter_batched(
            || {
                let store = SqliteStore::in_memory().unwrap();
                for m in population(2_000) {
                    store.write(&m).unwrap();
                }
                scheduler(Arc::new(store), 1)
            },
            |s| s.run(),
            criterion::BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_in_memory_run, bench_sqlite_run);
criterion_main!(benches);
