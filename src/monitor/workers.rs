//! # Worker Health Monitor
//!
//! Polls the broker's worker registry and active task inventory on every
//! call. Results are never cached.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::broker::Broker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealthStatus {
    Healthy,
    /// The registry is empty
    NoWorkers,
    /// Workers report active tasks but are missing from the registry
    Degraded,
    /// The broker could not be reached
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Idle,
    Busy,
    /// Reports active tasks without being registered
    Unregistered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub worker_name: String,
    pub active_task_count: usize,
    pub status: WorkerState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerHealth {
    pub status: WorkerHealthStatus,
    /// Registered workers
    pub total_workers: usize,
    /// Workers with at least one claimed task
    pub active_workers: usize,
    pub workers: Vec<WorkerSnapshot>,
    pub checked_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl WorkerHealth {
    fn unavailable(detail: String) -> Self {
        Self {
            status: WorkerHealthStatus::Unavailable,
            total_workers: 0,
            active_workers: 0,
            workers: Vec::new(),
            checked_at: Utc::now(),
            detail: Some(detail),
        }
    }
}

#[derive(Clone)]
pub struct WorkerHealthMonitor {
    broker: Arc<dyn Broker>,
}

impl WorkerHealthMonitor {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn health(&self) -> WorkerHealth {
        let registered = match self.broker.inspect_registered().await {
            Ok(registered) => registered,
            Err(err) => {
                warn!(error = %err, "worker registry unavailable");
                return WorkerHealth::unavailable(err.to_string());
            }
        };
        let active = match self.broker.inspect_active().await {
            Ok(active) => active,
            Err(err) => {
                warn!(error = %err, "active task inventory unavailable");
                return WorkerHealth::unavailable(err.to_string());
            }
        };

        let names: BTreeSet<&String> = registered.keys().chain(active.keys()).collect();
        let workers: Vec<WorkerSnapshot> = names
            .into_iter()
            .map(|name| {
                let active_task_count = active.get(name).map(Vec::len).unwrap_or(0);
                let status = if !registered.contains_key(name) {
                    WorkerState::Unregistered
                } else if active_task_count > 0 {
                    WorkerState::Busy
                } else {
                    WorkerState::Idle
                };
                WorkerSnapshot {
                    worker_name: name.clone(),
                    active_task_count,
                    status,
                }
            })
            .collect();

        let active_workers = workers
            .iter()
            .filter(|worker| worker.active_task_count > 0)
            .count();
        let unregistered: Vec<&str> = workers
            .iter()
            .filter(|worker| worker.status == WorkerState::Unregistered)
            .map(|worker| worker.worker_name.as_str())
            .collect();

        let (status, detail) = if !unregistered.is_empty() {
            (
                WorkerHealthStatus::Degraded,
                Some(format!(
                    "active workers missing from registry: {}",
                    unregistered.join(", ")
                )),
            )
        } else if registered.is_empty() {
            (WorkerHealthStatus::NoWorkers, None)
        } else {
            (WorkerHealthStatus::Healthy, None)
        };

        debug!(
            status = ?status,
            total_workers = registered.len(),
            active_workers,
            "worker health polled"
        );

        WorkerHealth {
            status,
            total_workers: registered.len(),
            active_workers,
            workers,
            checked_at: Utc::now(),
            detail,
        }
    }
}
