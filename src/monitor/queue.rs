//! # Queue & Backlog Monitor

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::broker::Broker;
use crate::models::JobKind;
use crate::repositories::JobStore;

use super::MonitorStatus;

/// Where a queue depth figure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthSource {
    /// Tasks waiting on or claimed from the broker queue
    Broker,
    /// Running jobs recorded in the job store; used when the broker is unreachable
    Store,
    /// Neither source answered
    Unknown,
}

impl DepthSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepthSource::Broker => "broker",
            DepthSource::Store => "store",
            DepthSource::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueDepth {
    pub queue: String,
    pub depth: u64,
    pub source: DepthSource,
}

/// Snapshot of outstanding work. Consumers must tolerate staleness.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Backlog {
    /// Pending jobs, paused ones included
    pub total_pending: u64,
    pub total_running: u64,
    pub total_scheduled: u64,
    /// Pending jobs keyed by priority
    pub by_priority: BTreeMap<i16, u64>,
    pub per_queue_depth: BTreeMap<String, u64>,
    pub status: MonitorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl Backlog {
    /// Sum of every queue's depth.
    pub fn total_queue_depth(&self) -> u64 {
        self.per_queue_depth.values().sum()
    }
}

#[derive(Clone)]
pub struct QueueMonitor {
    jobs: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    queues: Vec<String>,
}

impl QueueMonitor {
    pub fn new(jobs: Arc<dyn JobStore>, broker: Arc<dyn Broker>) -> Self {
        Self {
            jobs,
            broker,
            queues: JobKind::queues().into_iter().map(str::to_string).collect(),
        }
    }

    /// Overrides the queues reported in `per_queue_depth`.
    pub fn with_queues<I, S>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    /// Tasks waiting on or claimed from `queue`.
    pub async fn queue_depth(&self, queue: &str) -> QueueDepth {
        match self.broker.queue_length(queue).await {
            Ok(depth) => QueueDepth {
                queue: queue.to_string(),
                depth,
                source: DepthSource::Broker,
            },
            Err(err) => {
                warn!(queue, error = %err, "broker queue length unavailable; using job store");
                match self.jobs.running_in_queue(queue).await {
                    Ok(depth) => QueueDepth {
                        queue: queue.to_string(),
                        depth,
                        source: DepthSource::Store,
                    },
                    Err(err) => {
                        warn!(queue, error = %err, "job store queue count unavailable");
                        QueueDepth {
                            queue: queue.to_string(),
                            depth: 0,
                            source: DepthSource::Unknown,
                        }
                    }
                }
            }
        }
    }

    /// Current backlog. Never fails; observation problems degrade `status`.
    pub async fn backlog(&self) -> Backlog {
        let mut status = MonitorStatus::Ok;
        let mut detail = Vec::new();

        let counts = match self.jobs.counts().await {
            Ok(counts) => counts,
            Err(err) => {
                warn!(error = %err, "job counts unavailable");
                status = MonitorStatus::Unavailable;
                detail.push(format!("job store: {}", err));
                Default::default()
            }
        };

        let mut per_queue_depth = BTreeMap::new();
        for queue in &self.queues {
            let depth = self.queue_depth(queue).await;
            if depth.source != DepthSource::Broker {
                if status == MonitorStatus::Ok {
                    status = MonitorStatus::Degraded;
                }
                detail.push(format!("queue {} depth from {}", queue, depth.source.as_str()));
            }
            per_queue_depth.insert(depth.queue, depth.depth);
        }

        Backlog {
            total_pending: counts.pending,
            total_running: counts.running,
            total_scheduled: counts.scheduled,
            by_priority: counts.pending_by_priority,
            per_queue_depth,
            status,
            detail: (!detail.is_empty()).then(|| detail.join("; ")),
            observed_at: Utc::now(),
        }
    }
}
