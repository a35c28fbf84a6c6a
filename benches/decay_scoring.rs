//! Benchmarks for decay scoring, rule evaluation and ranking

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use memory_lifecycle::lifecycle::{DecayScorer, LifecycleStateMachine};
use memory_lifecycle::search::{SearchCandidate, WeightedSearchRanker};
use memory_lifecycle::Memory;

fn population(n: usize) -> Vec<Memory> {
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let mut m = Memory::new(
                format!("m-{:06}", i),
                now - Duration::hours((i as i64 * 37) % 9000),
                (i % 5) as u8 + 1,
                ((i / 5) % 5) as u8 + 1,
            );
            m.decay_score = (i % 100) as f64 / 100.0;
            m
        })
        .collect()
}

fn bench_decay_score(c: &mut Criterion) {
    let scorer = DecayScorer::default();
    let memories = population(1000);
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    let mut group = c.benchmark_group("decay_score");
    group.throughput(Throughput::Elements(memories.len() as u64));

    group.bench_function("score_1000", |b| {
        b.iter(|| {
            for m in &memories {
                black_box(scorer.score(black_box(m), now));
            }
        })
    });

    group.finish();
}

fn bench_transition(c: &mut Criterion) {
    let scorer = DecayScorer::default();
    let machine = LifecycleStateMachine::default();
    let memories = population(1000);
    let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

    let mut group = c.benchmark_group("lifecycle_transition");
    group.throughput(Throughput::Elements(memories.len() as u64));

    group.bench_function("evaluate_1000", |b| {
        b.iter(|| {
            for m in &memories {
                let breakdown = scorer.breakdown(m, now);
                black_box(machine.transition(m, breakdown.decay_score, breakdown.elapsed_days, now));
            }
        })
    });

    group.finish();
}

fn bench_rank(c: &mut Criterion) {
    let ranker = WeightedSearchRanker::default();
    let mut group = c.benchmark_group("rank");

    for size in [10, 100, 1000] {
        let candidates: Vec<SearchCandidate> = population(size)
            .into_iter()
            .enumerate()
            .map(|(i, m)| SearchCandidate::new(m, ((i * 7919) % 1000) as f64 / 1000.0))
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("candidates", size), &candidates, |b, input| {
            b.iter(|| black_box(ranker.rank(input.clone())))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_decay_score, bench_transition, bench_rank);
criterion_main!(benches);
