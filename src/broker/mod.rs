//! # Broker Interface
//!
//! Contract for the task queue that executes job work. The orchestrator
//! assumes at-least-once delivery and treats every broker call as fallible.

pub mod local;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crate::error::ExecutionError;

pub use local::{LocalBroker, TaskHandler};

/// Errors surfaced by a broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("broker rejected task {task_name}: {reason}")]
    Rejected { task_name: String, reason: String },
}

/// A task currently claimed by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveTask {
    pub execution_id: String,
    pub task_name: String,
    pub queue: String,
    pub started_at: DateTime<Utc>,
}

/// Registration details a worker advertises.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub queues: Vec<String>,
    pub concurrency: u32,
    pub registered_tasks: Vec<String>,
}

/// Final outcome of one task execution, delivered back to the orchestrator.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub execution_id: String,
    pub task_name: String,
    pub args: JsonValue,
    pub result: Result<JsonValue, ExecutionError>,
}

impl TaskOutcome {
    /// Job the task was submitted for, read from the `job_id` argument.
    pub fn job_id(&self) -> Option<Uuid> {
        self.args
            .get("job_id")
            .and_then(JsonValue::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Task queue consumed by the orchestrator.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueues `task_name` on `queue`; returns the execution handle.
    async fn submit(
        &self,
        task_name: &str,
        args: JsonValue,
        queue: &str,
    ) -> Result<String, BrokerError>;

    /// Requests termination of an execution. Returns whether it was known.
    async fn revoke(&self, execution_id: &str) -> Result<bool, BrokerError>;

    /// Tasks currently claimed, keyed by worker name.
    async fn inspect_active(&self) -> Result<BTreeMap<String, Vec<ActiveTask>>, BrokerError>;

    /// Registered workers, keyed by worker name.
    async fn inspect_registered(&self) -> Result<BTreeMap<String, WorkerInfo>, BrokerError>;

    /// Tasks waiting on or claimed from `queue`.
    async fn queue_length(&self, queue: &str) -> Result<u64, BrokerError>;
}

/// Arguments every orchestrated task receives.
pub fn task_args(job_id: Uuid, params: &JsonValue) -> JsonValue {
    serde_json::json!({
        "job_id": job_id.to_string(),
        "params": params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_reads_job_id_from_args() {
        let job_id = Uuid::new_v4();
        let outcome = TaskOutcome {
            execution_id: "e1".to_string(),
            task_name: "scraping.scrape_account".to_string(),
            args: task_args(job_id, &json!({"account_id": 1})),
            result: Ok(json!(null)),
        };
        assert_eq!(outcome.job_id(), Some(job_id));

        let orphan = TaskOutcome {
            args: json!({"params": {}}),
            ..outcome
        };
        assert_eq!(orphan.job_id(), None);
    }
}
