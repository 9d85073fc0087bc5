//! Read-only observers of queue backlog and worker health.
//!
//! Monitors never raise: a failure to observe broker or store state is
//! reported as a degraded status value.

pub mod queue;
pub mod workers;

use serde::Serialize;

pub use queue::{Backlog, QueueDepth, QueueMonitor};
pub use workers::{WorkerHealth, WorkerHealthMonitor, WorkerSnapshot};

/// Overall state of an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Ok,
    Degraded,
    Unavailable,
}
