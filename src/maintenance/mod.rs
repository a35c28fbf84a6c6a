//! Scheduled maintenance: rescoring, lifecycle transitions and purging

mod report;
mod scheduler;
mod worker;

pub use report::MaintenanceReport;
pub use scheduler::MaintenanceScheduler;
pub use worker::{MaintenanceCommand, MaintenanceWorker};
