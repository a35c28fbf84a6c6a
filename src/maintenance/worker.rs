//! Background maintenance worker
//!
//! Ticks every `schedule_interval_hours` (no ticking when 0) and accepts
//! manual triggers. Runs execute on the blocking pool; a trigger that
//! arrives while a run is active is answered with a skipped report by the
//! scheduler's lease rather than queued.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::report::MaintenanceReport;
use super::scheduler::MaintenanceScheduler;
use crate::error::{LifecycleError, Result};

/// Commands for the maintenance worker
#[derive(Debug)]
pub enum MaintenanceCommand {
    /// Start a run now; the report is sent back if a reply channel is given
    Trigger(Option<oneshot::Sender<MaintenanceReport>>),
    /// Finish the in-flight run (stopping at its next batch boundary) and exit
    Stop(oneshot::Sender<()>),
}

/// Handle to the background maintenance task
pub struct MaintenanceWorker {
    sender: mpsc::Sender<MaintenanceCommand>,
    scheduler: Arc<MaintenanceScheduler>,
}

impl MaintenanceWorker {
    /// Spawn the worker on the current tokio runtime
    pub fn start(scheduler: Arc<MaintenanceScheduler>, schedule_interval_hours: u64) -> Self {
        let (sender, mut receiver) = mpsc::channel::<MaintenanceCommand>(16);
        let task_scheduler = scheduler.clone();

        tokio::spawn(async move {
            let scheduling = schedule_interval_hours > 0;
            let period = Duration::from_secs(schedule_interval_hours.max(1) * 3600);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Every spawned run, including ones the lease answers as skipped
            let mut in_flight: Vec<JoinHandle<()>> = Vec::new();

            if scheduling {
                tracing::info!(interval_hours = schedule_interval_hours, "Maintenance worker started");
            } else {
                tracing::info!("Maintenance worker started (manual trigger only)");
            }

            loop {
                tokio::select! {
                    cmd = receiver.recv() => {
                        match cmd {
                            Some(MaintenanceCommand::Trigger(reply)) => {
                                in_flight.retain(|h| !h.is_finished());
                                in_flight.push(Self::spawn_run(task_scheduler.clone(), reply));
                            }
                            Some(MaintenanceCommand::Stop(ack)) => {
                                task_scheduler.request_stop();
                                for handle in in_flight.drain(..) {
                                    let _ = handle.await;
                                }
                                let _ = ack.send(());
                                break;
                            }
                            None => break,
                        }
                    }
                    _ = ticker.tick(), if scheduling => {
                        tracing::debug!("Scheduled maintenance tick");
                        in_flight.retain(|h| !h.is_finished());
                        in_flight.push(Self::spawn_run(task_scheduler.clone(), None));
                    }
                }
            }

            tracing::info!("Maintenance worker stopped");
        });

        Self { sender, scheduler }
    }

    fn spawn_run(
        scheduler: Arc<MaintenanceScheduler>,
        reply: Option<oneshot::Sender<MaintenanceReport>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || scheduler.run()).await {
                Ok(report) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(report);
                    }
                }
                Err(e) => tracing::error!(error = %e, "Maintenance run task failed"),
            }
        })
    }

    /// Trigger a run and wait for its report
    pub async fn trigger(&self) -> Result<MaintenanceReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MaintenanceCommand::Trigger(Some(tx)))
            .await
            .map_err(|_| LifecycleError::Internal("Maintenance worker stopped".to_string()))?;
        rx.await
            .map_err(|_| LifecycleError::Internal("Maintenance run aborted".to_string()))
    }

    /// Ask the in-flight run to stop at its next batch boundary, without stopping the worker
    pub fn request_stop(&self) -> bool {
        self.scheduler.request_stop()
    }

    /// Stop the worker, waiting for any in-flight run to reach a batch boundary
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(MaintenanceCommand::Stop(tx))
            .await
            .map_err(|_| LifecycleError::Internal("Maintenance worker stopped".to_string()))?;
        rx.await
            .map_err(|_| LifecycleError::Internal("Maintenance worker stopped".to_string()))
    }
}
