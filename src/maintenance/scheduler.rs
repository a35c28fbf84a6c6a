//! Bounded maintenance runs
//!
//! A run walks the population oldest-access first in keyset pages, rescoring
//! each memory and persisting lifecycle changes, then sweeps soft-deleted
//! memories whose retention has elapsed. Time budget and stop requests are
//! checked only between batches, so no record is ever half written.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::report::MaintenanceReport;
use crate::clock::Clock;
use crate::config::{EngineConfig, MaintenanceConfig};
use crate::error::Result;
use crate::events::{EventBus, EventKind, LifecycleEvent};
use crate::lifecycle::{DecayScorer, LifecycleStateMachine, Transition};
use crate::metrics::LifecycleMetrics;
use crate::storage::MemoryStore;
use crate::types::{LifecycleUpdate, MaintenanceCheckpoint, Memory, PageCursor, RunStatus};

/// Scoring and rule evaluation for one memory
#[derive(Debug, Clone)]
struct Evaluation {
    id: String,
    transition: Transition,
    update: Option<LifecycleUpdate>,
}

/// Releases the run lease when dropped
struct RunLease<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// How the main pass ended
enum PassEnd {
    Complete,
    Stopped,
    ReadFailed,
}

/// Runs maintenance over a [`MemoryStore`], one run at a time
pub struct MaintenanceScheduler {
    store: Arc<dyn MemoryStore>,
    clock: Arc<dyn Clock>,
    scorer: DecayScorer,
    machine: LifecycleStateMachine,
    config: MaintenanceConfig,
    decay_enabled: bool,
    metrics: Arc<LifecycleMetrics>,
    events: EventBus,
    running: AtomicBool,
    stop_requested: AtomicBool,
}

impl MaintenanceScheduler {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
        metrics: Arc<LifecycleMetrics>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            clock,
            scorer: DecayScorer::new(config.decay.clone(), config.permanent),
            machine: LifecycleStateMachine::new(
                config.lifecycle.clone(),
                config.retention.clone(),
                config.permanent,
            ),
            config: config.maintenance.clone(),
            decay_enabled: config.decay.enabled,
            metrics,
            events,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Whether a run currently holds the lease
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the active run to stop at its next batch boundary
    ///
    /// Returns false when no run is active.
    pub fn request_stop(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.stop_requested.store(true, Ordering::Release);
        true
    }

    fn try_acquire(&self) -> Option<RunLease<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                self.stop_requested.store(false, Ordering::Release);
                RunLease {
                    flag: &self.running,
                }
            })
    }

    /// Execute one maintenance run
    ///
    /// Never fails: storage errors are retried once and then reflected in
    /// the report status.
    pub fn run(&self) -> MaintenanceReport {
        let started_at = self.clock.now();

        let Some(_lease) = self.try_acquire() else {
            warn!("Maintenance run already in progress, skipping trigger");
            let report = MaintenanceReport::skipped(started_at);
            self.metrics
                .record_run(report.status, std::time::Duration::ZERO);
            return report;
        };

        if !self.decay_enabled {
            info!("Decay disabled, skipping maintenance run");
            let report = MaintenanceReport::skipped(started_at);
            self.metrics
                .record_run(report.status, std::time::Duration::ZERO);
            return report;
        }

        let mut report = MaintenanceReport::new(RunStatus::Success, started_at);
        let mut degraded = false;

        let checkpoint = match self.with_retry("load checkpoint", || self.store.load_checkpoint())
        {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                error!(error = %e, "Failed to load maintenance checkpoint, starting from the oldest memory");
                degraded = true;
                MaintenanceCheckpoint::default()
            }
        };

        if let Some(cursor) = &checkpoint.cursor {
            info!(
                cursor_id = %cursor.id,
                cursor_accessed_at = %cursor.last_accessed_at,
                "Resuming maintenance from checkpoint"
            );
        }

        let (pass_end, cursor) = self.main_pass(checkpoint.cursor, started_at, &mut report);
        let (purged, purge_failures) = self.purge_sweep(started_at);
        report.purged = purged;
        report.purge_failures = purge_failures;

        let next_cursor = match pass_end {
            PassEnd::Complete => None,
            PassEnd::Stopped | PassEnd::ReadFailed => cursor,
        };

        if !matches!(pass_end, PassEnd::Complete) {
            report.remaining = match self.store.count_after(next_cursor.as_ref()) {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "Failed to count remaining memories");
                    0
                }
            };
        }

        degraded |= matches!(pass_end, PassEnd::ReadFailed)
            || report.failed_batches > 0
            || report.purge_failures > 0;

        let finished_at = self.clock.now();
        report.status = if degraded {
            RunStatus::Degraded
        } else if matches!(pass_end, PassEnd::Stopped) {
            RunStatus::Partial
        } else {
            RunStatus::Success
        };

        let saved = self.with_retry("save checkpoint", || {
            self.store.save_checkpoint(&MaintenanceCheckpoint {
                cursor: next_cursor.clone(),
                last_run_at: Some(finished_at),
                last_status: Some(report.status),
            })
        });
        if let Err(e) = saved {
            error!(error = %e, "Failed to save maintenance checkpoint");
            report.status = RunStatus::Degraded;
        }

        let elapsed = (finished_at - started_at).to_std().unwrap_or_default();
        report.duration_ms = elapsed.as_millis() as u64;
        self.metrics.record_run(report.status, elapsed);

        info!(
            status = %report.status,
            recalculated = report.recalculated,
            transitions = report.total_transitions(),
            purged = report.purged,
            failed_batches = report.failed_batches,
            stale_skipped = report.stale_skipped,
            remaining = report.remaining,
            duration_ms = report.duration_ms,
            "Maintenance run finished"
        );

        self.events.publish(LifecycleEvent::new(
            finished_at,
            EventKind::MaintenanceCompleted {
                status: report.status,
                recalculated: report.recalculated,
                transitions: report.total_transitions(),
                purged: report.purged,
                remaining: report.remaining,
            },
        ));

        report
    }

    /// Page through the population; returns how the pass ended and the last cursor reached
    fn main_pass(
        &self,
        mut cursor: Option<PageCursor>,
        now: DateTime<Utc>,
        report: &mut MaintenanceReport,
    ) -> (PassEnd, Option<PageCursor>) {
        let budget = self.config.max_duration();
        let batch_size = self.config.batch_size;

        loop {
            let page = match self.with_retry("read page", || {
                self.store.page_older_than(cursor.as_ref(), batch_size)
            }) {
                Ok(page) => page,
                Err(e) => {
                    error!(error = %e, "Failed to read maintenance page, ending pass");
                    return (PassEnd::ReadFailed, cursor);
                }
            };

            let Some(last) = page.last() else {
                return (PassEnd::Complete, cursor);
            };
            let page_cursor = last.cursor();

            self.process_page(&page, now, report);
            cursor = Some(page_cursor);

            if page.len() < batch_size {
                return (PassEnd::Complete, cursor);
            }

            if self.stop_requested.load(Ordering::Acquire) {
                info!("Stop requested, ending maintenance at batch boundary");
                return (PassEnd::Stopped, cursor);
            }

            if self.clock.now() - now >= budget {
                info!(
                    max_duration_minutes = self.config.max_duration_minutes,
                    "Maintenance time budget exhausted"
                );
                return (PassEnd::Stopped, cursor);
            }
        }
    }

    fn process_page(&self, page: &[Memory], now: DateTime<Utc>, report: &mut MaintenanceReport) {
        let Some(evaluations) = self.evaluate_page(page, now) else {
            error!(batch_size = page.len(), "Evaluation worker panicked, skipping batch");
            report.failed_batches += 1;
            return;
        };

        report.recalculated += page.len() as u64;
        self.metrics.decay_recalculations.add(page.len() as u64);

        let updates: Vec<LifecycleUpdate> = evaluations
            .iter()
            .filter_map(|e| e.update.clone())
            .collect();
        if updates.is_empty() {
            return;
        }

        let outcome = match self.with_retry("apply batch", || self.store.apply_batch(&updates)) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, updates = updates.len(), "Batch write failed after retry, skipping batch");
                report.failed_batches += 1;
                return;
            }
        };

        let stale: HashSet<&str> = outcome.stale.iter().map(String::as_str).collect();
        report.stale_skipped += stale.len() as u64;
        if !stale.is_empty() {
            debug!(count = stale.len(), "Skipped updates for memories accessed during the run");
        }

        for evaluation in evaluations.iter().filter(|e| e.update.is_some()) {
            if stale.contains(evaluation.id.as_str()) {
                continue;
            }
            for &(from, to) in &evaluation.transition.hops {
                report.record_transition(from, to);
                self.metrics.record_transition(from, to);
                debug!(memory_id = %evaluation.id, %from, %to, "Lifecycle transition");
                self.events.publish(LifecycleEvent::transitioned(
                    now,
                    evaluation.id.clone(),
                    from,
                    to,
                ));
            }
        }
    }

    /// Score and evaluate a page, splitting it across scoped worker threads
    ///
    /// Each memory belongs to exactly one chunk. Returns `None` if a worker panicked.
    fn evaluate_page(&self, page: &[Memory], now: DateTime<Utc>) -> Option<Vec<Evaluation>> {
        let workers = self.config.workers.clamp(1, page.len().max(1));
        if workers == 1 {
            return Some(page.iter().map(|m| self.evaluate(m, now)).collect());
        }

        let chunk_size = page.len().div_ceil(workers);
        std::thread::scope(|scope| {
            let handles: Vec<_> = page
                .chunks(chunk_size)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|m| self.evaluate(m, now))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut evaluations = Vec::with_capacity(page.len());
            for handle in handles {
                evaluations.extend(handle.join().ok()?);
            }
            Some(evaluations)
        })
    }

    fn evaluate(&self, memory: &Memory, now: DateTime<Utc>) -> Evaluation {
        let breakdown = self.scorer.breakdown(memory, now);
        let transition =
            self.machine
                .transition(memory, breakdown.decay_score, breakdown.elapsed_days, now);
        let update = transition.update_for(memory, breakdown.decay_score);
        Evaluation {
            id: memory.id.clone(),
            transition,
            update,
        }
    }

    /// Purge soft-deleted memories whose retention window has elapsed
    ///
    /// Returns `(purged, failures)`. A memory that fails to purge stays
    /// soft-deleted and is retried on the next run.
    fn purge_sweep(&self, now: DateTime<Utc>) -> (u64, u64) {
        let cutoff = self.machine.retention_cutoff(now);
        let limit = self.config.batch_size;
        let mut failed: HashSet<String> = HashSet::new();
        let mut list_failures = 0u64;
        let mut purged = 0u64;

        loop {
            let due = match self.with_retry("list purge candidates", || {
                self.store.soft_deleted_before(cutoff, limit)
            }) {
                Ok(due) => due,
                Err(e) => {
                    error!(error = %e, "Failed to list purge candidates");
                    list_failures += 1;
                    break;
                }
            };

            let mut progressed = false;
            for memory in &due {
                if failed.contains(&memory.id) {
                    continue;
                }
                match self.with_retry("purge", || self.store.purge(&memory.id)) {
                    Ok(deleted) => {
                        progressed = true;
                        if deleted {
                            purged += 1;
                            self.metrics.purged.inc();
                            debug!(memory_id = %memory.id, "Purged memory");
                            self.events
                                .publish(LifecycleEvent::purged(now, memory.id.clone()));
                        }
                    }
                    Err(e) => {
                        error!(memory_id = %memory.id, error = %e, "Purge failed, will retry next run");
                        failed.insert(memory.id.clone());
                    }
                }
            }

            if due.len() < limit || !progressed {
                break;
            }
        }

        (purged, failed.len() as u64 + list_failures)
    }

    fn with_retry<T>(&self, operation: &str, f: impl Fn() -> Result<T>) -> Result<T> {
        match f() {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!(operation, error = %first, "Storage operation failed, retrying once");
                f()
            }
        }
    }
}
