//! Lifecycle engine facade
//!
//! Wires configuration, clock, storage, classification, metrics and events
//! behind one handle. Construction validates the configuration and fails
//! on any violation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::classification::{ClassificationGateway, ClassificationOutcome, ClassificationResolver};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{LifecycleError, Result};
use crate::events::{EventBus, LifecycleEvent};
use crate::health::HealthReport;
use crate::lifecycle::{
    AccessOutcome, DecayBreakdown, DecayScorer, LifecycleStateMachine, Reactivator,
};
use crate::maintenance::{MaintenanceReport, MaintenanceScheduler, MaintenanceWorker};
use crate::metrics::LifecycleMetrics;
use crate::search::{RankedMemory, SearchCandidate, WeightedSearchRanker};
use crate::storage::MemoryStore;
use crate::types::{LifecycleUpdate, Memory, MemoryId, PopulationStats};

/// Result of capturing a new memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub memory: Memory,
    pub classification: ClassificationOutcome,
}

pub struct LifecycleEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn MemoryStore>,
    classifier: ClassificationResolver,
    scorer: DecayScorer,
    machine: LifecycleStateMachine,
    reactivator: Reactivator,
    ranker: WeightedSearchRanker,
    scheduler: Arc<MaintenanceScheduler>,
    metrics: Arc<LifecycleMetrics>,
    events: EventBus,
}

impl LifecycleEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn MemoryStore>,
        gateway: Arc<dyn ClassificationGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let metrics = Arc::new(LifecycleMetrics::new());
        let events = EventBus::new();

        let scorer = DecayScorer::new(config.decay.clone(), config.permanent);
        let machine = LifecycleStateMachine::new(
            config.lifecycle.clone(),
            config.retention.clone(),
            config.permanent,
        );
        let classifier = ClassificationResolver::new(
            gateway,
            config.classification,
            metrics.clone(),
            events.clone(),
            clock.clone(),
        );
        let scheduler = Arc::new(MaintenanceScheduler::new(
            store.clone(),
            clock.clone(),
            &config,
            metrics.clone(),
            events.clone(),
        ));

        Ok(Self {
            reactivator: Reactivator::new(scorer.clone(), machine.clone()),
            ranker: WeightedSearchRanker::new(config.search)?,
            config,
            clock,
            store,
            classifier,
            scorer,
            machine,
            scheduler,
            metrics,
            events,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn MemoryStore> {
        &self.store
    }

    /// Classify `content` and store a new memory under `id`
    ///
    /// A memory classified permanent is stored as `PERMANENT` right away.
    pub async fn capture(&self, id: impl Into<MemoryId>, content: &str) -> Result<CaptureResult> {
        let id = id.into();
        if self.store.read(&id)?.is_some() {
            return Err(LifecycleError::InvalidInput(format!(
                "memory {} already exists",
                id
            )));
        }

        let outcome = self.classifier.classify_with_fallback(content).await;
        let labels = outcome.classification();
        let now = self.clock.now();

        let mut memory = Memory::new(id, now, labels.importance, labels.stability);
        let breakdown = self.scorer.breakdown(&memory, now);
        self.machine
            .transition(&memory, breakdown.decay_score, breakdown.elapsed_days, now)
            .apply(&mut memory, breakdown.decay_score);

        self.store.write(&memory)?;
        debug!(
            memory_id = %memory.id,
            importance = memory.importance,
            stability = memory.stability,
            state = %memory.lifecycle_state,
            fallback = outcome.is_fallback(),
            "Captured memory"
        );

        Ok(CaptureResult {
            memory,
            classification: outcome,
        })
    }

    pub fn get(&self, id: &str) -> Result<Memory> {
        self.store
            .read(id)?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    /// Record a read or search hit, reactivating dormant/archived memories
    ///
    /// The access itself is an atomic store-side touch, so a concurrent
    /// access carrying a newer timestamp is never overwritten. The follow-up
    /// state change is conditional on the touched `last_accessed_at`.
    pub fn record_access(&self, id: &str) -> Result<AccessOutcome> {
        let now = self.clock.now();
        let touched = self
            .store
            .touch(id, now)?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))?;
        let mut outcome = self.reactivator.reevaluate(touched.clone(), now);

        let changed = outcome.memory.lifecycle_state != touched.lifecycle_state
            || outcome.memory.decay_score != touched.decay_score
            || outcome.memory.soft_deleted_at != touched.soft_deleted_at;
        if changed {
            let written = self.store.apply_batch(&[LifecycleUpdate {
                id: touched.id.clone(),
                observed_last_accessed_at: touched.last_accessed_at,
                lifecycle_state: outcome.memory.lifecycle_state,
                decay_score: outcome.memory.decay_score,
                soft_deleted_at: outcome.memory.soft_deleted_at,
            }])?;
            if !written.stale.is_empty() {
                debug!(memory_id = %id, "Newer access landed first, keeping stored state");
                outcome.memory = self.get(id)?;
                outcome.reactivated = false;
            }
        }

        if outcome.reactivated {
            self.metrics.record_reactivation(outcome.previous_state);
            self.events.publish(LifecycleEvent::reactivated(
                now,
                outcome.memory.id.clone(),
                outcome.previous_state,
            ));
            info!(
                memory_id = %outcome.memory.id,
                from_state = %outcome.previous_state,
                "Memory reactivated"
            );
        }

        Ok(outcome)
    }

    /// Current decay breakdown for a memory, without persisting anything
    pub fn score(&self, id: &str) -> Result<DecayBreakdown> {
        let memory = self.get(id)?;
        Ok(self.scorer.breakdown(&memory, self.clock.now()))
    }

    /// Order search candidates by composite score
    pub fn rank(&self, candidates: Vec<SearchCandidate>) -> Vec<RankedMemory> {
        self.ranker.rank(candidates)
    }

    /// Run maintenance now (blocking) and refresh the population gauges
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let report = self.scheduler.run();
        if let Err(e) = self.refresh_gauges() {
            warn!(error = %e, "Failed to refresh population gauges");
        }
        report
    }

    /// Spawn the background worker on the current tokio runtime
    pub fn start_worker(&self) -> MaintenanceWorker {
        MaintenanceWorker::start(
            self.scheduler.clone(),
            self.config.maintenance.schedule_interval_hours,
        )
    }

    /// Ask an in-flight maintenance run to stop at its next batch boundary
    pub fn request_stop(&self) -> bool {
        self.scheduler.request_stop()
    }

    pub fn refresh_gauges(&self) -> Result<PopulationStats> {
        let stats = self.store.population_stats()?;
        self.metrics.set_population(&stats);
        Ok(stats)
    }

    pub fn health(&self) -> Result<HealthReport> {
        let checkpoint = self.store.load_checkpoint()?;
        let stats = self.store.population_stats()?;
        Ok(HealthReport {
            decay_enabled: self.config.decay.enabled,
            last_maintenance_run: checkpoint.last_run_at,
            last_status: checkpoint.last_status,
            maintenance_running: self.scheduler.is_running(),
            schedule_interval_hours: self.config.maintenance.schedule_interval_hours,
            total_memories: stats.total,
        })
    }

    pub fn metrics(&self) -> &Arc<LifecycleMetrics> {
        &self.metrics
    }

    /// Prometheus text exposition of all metrics
    pub fn render_metrics(&self) -> String {
        self.metrics.render_prometheus()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }
}
