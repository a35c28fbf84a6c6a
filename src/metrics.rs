//! Prometheus-style metrics for the lifecycle engine
//!
//! Counters, labeled counters, histograms and gauges backed by atomics
//! (`f64` values are stored as bits). [`LifecycleMetrics::render_prometheus`]
//! produces the text exposition format.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::types::{LifecycleState, PopulationStats, RunStatus};

/// Maintenance runs take seconds to minutes
const RUN_DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 300.0, 600.0, 1800.0];

/// Classification is a remote call bounded by a timeout of a few seconds
const CLASSIFICATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counter partitioned by label values
#[derive(Debug)]
pub struct LabeledCounter {
    label_names: &'static [&'static str],
    values: DashMap<Vec<String>, u64>,
}

impl LabeledCounter {
    pub fn new(label_names: &'static [&'static str]) -> Self {
        Self {
            label_names,
            values: DashMap::new(),
        }
    }

    pub fn inc(&self, labels: &[&str]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[&str], n: u64) {
        let key: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        *self.values.entry(key).or_insert(0) += n;
    }

    pub fn get(&self, labels: &[&str]) -> u64 {
        let key: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        self.values.get(&key).map(|v| *v).unwrap_or(0)
    }

    /// Sum over all label values
    pub fn total(&self) -> u64 {
        self.values.iter().map(|entry| *entry.value()).sum()
    }

    fn sorted(&self) -> Vec<(Vec<String>, u64)> {
        let mut rows: Vec<_> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        rows.sort();
        rows
    }
}

/// Point-in-time value
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Gauge partitioned by one label
#[derive(Debug)]
pub struct LabeledGauge {
    label_name: &'static str,
    values: DashMap<String, f64>,
}

impl LabeledGauge {
    pub fn new(label_name: &'static str) -> Self {
        Self {
            label_name,
            values: DashMap::new(),
        }
    }

    pub fn set(&self, label: &str, value: f64) {
        self.values.insert(label.to_string(), value);
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.values.get(label).map(|v| *v)
    }

    fn sorted(&self) -> Vec<(String, f64)> {
        let mut rows: Vec<_> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

/// Fixed-bucket histogram
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_bits: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            buckets: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn observe(&self, value: f64) {
        if let Some(idx) = self.bounds.iter().position(|bound| value <= *bound) {
            self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        }
        self.count.fetch_add(1, Ordering::Relaxed);

        let mut current = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self.sum_bits.compare_exchange_weak(
                current,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }
}

/// All metrics exposed by the engine
#[derive(Debug)]
pub struct LifecycleMetrics {
    pub maintenance_runs: LabeledCounter,
    pub decay_recalculations: Counter,
    pub lifecycle_transitions: LabeledCounter,
    pub purged: Counter,
    pub classification_requests: LabeledCounter,
    pub reactivations: LabeledCounter,
    pub maintenance_duration: Histogram,
    pub classification_latency: Histogram,
    pub state_count: LabeledGauge,
    pub decay_score_avg: Gauge,
    pub importance_avg: Gauge,
    pub stability_avg: Gauge,
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleMetrics {
    pub fn new() -> Self {
        Self {
            maintenance_runs: LabeledCounter::new(&["status"]),
            decay_recalculations: Counter::default(),
            lifecycle_transitions: LabeledCounter::new(&["from", "to"]),
            purged: Counter::default(),
            classification_requests: LabeledCounter::new(&["status"]),
            reactivations: LabeledCounter::new(&["from_state"]),
            maintenance_duration: Histogram::new(RUN_DURATION_BUCKETS),
            classification_latency: Histogram::new(CLASSIFICATION_BUCKETS),
            state_count: LabeledGauge::new("state"),
            decay_score_avg: Gauge::default(),
            importance_avg: Gauge::default(),
            stability_avg: Gauge::default(),
        }
    }

    pub fn record_run(&self, status: RunStatus, duration: Duration) {
        self.maintenance_runs.inc(&[status.as_str()]);
        self.maintenance_duration.observe_duration(duration);
    }

    pub fn record_transition(&self, from: LifecycleState, to: LifecycleState) {
        self.lifecycle_transitions
            .inc(&[from.as_str(), to.as_str()]);
    }

    pub fn record_classification(&self, status: &str, latency: Duration) {
        self.classification_requests.inc(&[status]);
        self.classification_latency.observe_duration(latency);
    }

    pub fn record_reactivation(&self, from_state: LifecycleState) {
        self.reactivations.inc(&[from_state.as_str()]);
    }

    /// Refresh population gauges; states with no memories report zero
    pub fn set_population(&self, stats: &PopulationStats) {
        for state in LifecycleState::ALL {
            let count = stats.by_state.get(&state).copied().unwrap_or(0);
            self.state_count.set(state.as_str(), count as f64);
        }
        self.decay_score_avg.set(stats.avg_decay_score);
        self.importance_avg.set(stats.avg_importance);
        self.stability_avg.set(stats.avg_stability);
    }

    /// Text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        render_labeled_counter(
            &mut out,
            "memory_maintenance_runs_total",
            "Maintenance runs by final status",
            &self.maintenance_runs,
        );
        render_counter(
            &mut out,
            "memory_decay_recalculations_total",
            "Decay scores recalculated by maintenance",
            &self.decay_recalculations,
        );
        render_labeled_counter(
            &mut out,
            "memory_lifecycle_transitions_total",
            "Lifecycle state transitions",
            &self.lifecycle_transitions,
        );
        render_counter(
            &mut out,
            "memory_purged_total",
            "Memories permanently purged",
            &self.purged,
        );
        render_labeled_counter(
            &mut out,
            "memory_classification_requests_total",
            "Classification requests by outcome",
            &self.classification_requests,
        );
        render_labeled_counter(
            &mut out,
            "memory_reactivations_total",
            "Reactivations by originating state",
            &self.reactivations,
        );
        render_histogram(
            &mut out,
            "memory_maintenance_duration_seconds",
            "Maintenance run duration",
            &self.maintenance_duration,
        );
        render_histogram(
            &mut out,
            "memory_classification_latency_seconds",
            "Classification gateway latency",
            &self.classification_latency,
        );
        render_labeled_gauge(
            &mut out,
            "memory_lifecycle_state_count",
            "Memories by lifecycle state",
            &self.state_count,
        );
        render_gauge(
            &mut out,
            "memory_decay_score_avg",
            "Average decay score",
            &self.decay_score_avg,
        );
        render_gauge(
            &mut out,
            "memory_importance_avg",
            "Average importance",
            &self.importance_avg,
        );
        render_gauge(
            &mut out,
            "memory_stability_avg",
            "Average stability",
            &self.stability_avg,
        );

        out
    }
}

fn header(out: &mut String, name: &str, help: &str, kind: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} {}", name, kind);
}

fn format_labels(names: &[&str], values: &[String]) -> String {
    let pairs: Vec<String> = names
        .iter()
        .zip(values)
        .map(|(name, value)| format!("{}=\"{}\"", name, escape_label(value)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn render_counter(out: &mut String, name: &str, help: &str, counter: &Counter) {
    header(out, name, help, "counter");
    let _ = writeln!(out, "{} {}", name, counter.get());
}

fn render_labeled_counter(out: &mut String, name: &str, help: &str, counter: &LabeledCounter) {
    header(out, name, help, "counter");
    for (labels, value) in counter.sorted() {
        let _ = writeln!(
            out,
            "{}{} {}",
            name,
            format_labels(counter.label_names, &labels),
            value
        );
    }
}

fn render_gauge(out: &mut String, name: &str, help: &str, gauge: &Gauge) {
    header(out, name, help, "gauge");
    let _ = writeln!(out, "{} {}", name, gauge.get());
}

fn render_labeled_gauge(out: &mut String, name: &str, help: &str, gauge: &LabeledGauge) {
    header(out, name, help, "gauge");
    for (label, value) in gauge.sorted() {
        let _ = writeln!(
            out,
            "{}{} {}",
            name,
            format_labels(&[gauge.label_name], &[label]),
            value
        );
    }
}

fn render_histogram(out: &mut String, name: &str, help: &str, histogram: &Histogram) {
    header(out, name, help, "histogram");
    let mut cumulative = 0;
    for (bound, bucket) in histogram.bounds.iter().zip(&histogram.buckets) {
        cumulative += bucket.load(Ordering::Relaxed);
        let _ = writeln!(out, "{}_bucket{{le=\"{}\"}} {}", name, bound, cumulative);
    }
    let _ = writeln!(out, "{}_bucket{{le=\"+Inf\"}} {}", name, histogram.count());
    let _ = writeln!(out, "{}_sum {}", name, histogram.sum());
    let _ = writeln!(out, "{}_count {}", name, histogram.count());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_labeled_counter_partitions() {
        let metrics = LifecycleMetrics::new();
        metrics.record_transition(LifecycleState::Active, LifecycleState::Dormant);
        metrics.record_transition(LifecycleState::Active, LifecycleState::Dormant);
        metrics.record_transition(LifecycleState::Dormant, LifecycleState::Archived);

        assert_eq!(
            metrics
                .lifecycle_transitions
                .get(&["ACTIVE", "DORMANT"]),
            2
        );
        assert_eq!(metrics.lifecycle_transitions.total(), 3);
        assert_eq!(metrics.lifecycle_transitions.get(&["ACTIVE", "PERMANENT"]), 0);
    }

    #[test]
    fn test_histogram_buckets_are_cumulative() {
        let metrics = LifecycleMetrics::new();
        metrics.record_run(RunStatus::Success, Duration::from_millis(50));
        metrics.record_run(RunStatus::Partial, Duration::from_secs(700));
        metrics.record_run(RunStatus::Partial, Duration::from_secs(7200));

        let text = metrics.render_prometheus();
        assert!(text.contains("memory_maintenance_duration_seconds_bucket{le=\"0.1\"} 1"));
        assert!(text.contains("memory_maintenance_duration_seconds_bucket{le=\"1800\"} 2"));
        assert!(text.contains("memory_maintenance_duration_seconds_bucket{le=\"+Inf\"} 3"));
        assert!(text.contains("memory_maintenance_duration_seconds_count 3"));
        assert!(text.contains("memory_maintenance_runs_total{status=\"partial\"} 2"));
    }

    #[test]
    fn test_population_gauges_cover_every_state() {
        let metrics = LifecycleMetrics::new();
        let mut by_state = BTreeMap::new();
        by_state.insert(LifecycleState::Active, 4);
        metrics.set_population(&PopulationStats {
            total: 4,
            by_state,
            avg_decay_score: 0.25,
            avg_importance: 3.5,
            avg_stability: 2.0,
        });

        assert_eq!(metrics.state_count.get("ACTIVE"), Some(4.0));
        assert_eq!(metrics.state_count.get("SOFT_DELETED"), Some(0.0));
        assert_eq!(metrics.decay_score_avg.get(), 0.25);

        let text = metrics.render_prometheus();
        assert!(text.contains("memory_lifecycle_state_count{state=\"PERMANENT\"} 0"));
        assert!(text.contains("memory_importance_avg 3.5"));
        assert!(text.contains("# TYPE memory_purged_total counter"));
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape_label("a\"b\\c"), "a\\\"b\\\\c");
    }
}
