//! # Dependency Resolver
//!
//! Decides whether a job's prerequisite has completed and hands newly
//! satisfied dependents to a [`Dispatcher`]. Failed or cancelled
//! prerequisites block permanently; the resolver reports that and leaves the
//! decision about the dependent to the caller.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::{JobModel, JobStatus};
use crate::repositories::JobStore;

/// Why a job cannot run yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockingReason {
    /// The referenced prerequisite does not exist.
    Missing { prerequisite: Uuid },
    /// The prerequisite has not finished yet.
    Unfinished {
        prerequisite: Uuid,
        status: JobStatus,
    },
    /// The prerequisite ended without completing; this never clears.
    Terminal {
        prerequisite: Uuid,
        status: JobStatus,
    },
}

impl BlockingReason {
    pub fn is_permanent(&self) -> bool {
        matches!(self, BlockingReason::Terminal { .. })
    }
}

impl std::fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockingReason::Missing { prerequisite } => {
                write!(f, "prerequisite {} does not exist", prerequisite)
            }
            BlockingReason::Unfinished {
                prerequisite,
                status,
            } => write!(f, "prerequisite {} is {}", prerequisite, status),
            BlockingReason::Terminal {
                prerequisite,
                status,
            } => write!(
                f,
                "prerequisite {} is {} and will never complete",
                prerequisite, status
            ),
        }
    }
}

/// Result of [`DependencyResolver::is_satisfied`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyCheck {
    pub satisfied: bool,
    pub blocking_reasons: Vec<BlockingReason>,
}

impl DependencyCheck {
    fn satisfied() -> Self {
        Self {
            satisfied: true,
            blocking_reasons: Vec::new(),
        }
    }

    fn blocked(reason: BlockingReason) -> Self {
        Self {
            satisfied: false,
            blocking_reasons: vec![reason],
        }
    }

    pub fn is_permanently_blocked(&self) -> bool {
        self.blocking_reasons.iter().any(BlockingReason::is_permanent)
    }

    pub fn describe(&self) -> String {
        self.blocking_reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Something that can try to start a job. Implemented by the lifecycle
/// manager; dispatch re-validates everything under a conditional update.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Returns true when the job was handed to the broker.
    async fn try_dispatch(&self, job_id: Uuid) -> Result<bool, OrchestratorError>;
}

/// Counts from a release pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReleaseSummary {
    pub examined: usize,
    pub dispatched: usize,
    pub still_blocked: usize,
}

#[derive(Clone)]
pub struct DependencyResolver {
    jobs: Arc<dyn JobStore>,
    scan_limit: u64,
}

impl DependencyResolver {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self {
            jobs,
            scan_limit: 500,
        }
    }

    pub fn with_scan_limit(mut self, scan_limit: u64) -> Self {
        self.scan_limit = scan_limit.max(1);
        self
    }

    pub async fn is_satisfied(&self, job: &JobModel) -> Result<DependencyCheck, OrchestratorError> {
        let Some(prerequisite) = job.depends_on else {
            return Ok(DependencyCheck::satisfied());
        };

        let check = match self.jobs.find(prerequisite).await? {
            None => DependencyCheck::blocked(BlockingReason::Missing { prerequisite }),
            Some(parent) => match parent.status {
                JobStatus::Completed => DependencyCheck::satisfied(),
                JobStatus::Failed | JobStatus::Cancelled => {
                    DependencyCheck::blocked(BlockingReason::Terminal {
                        prerequisite,
                        status: parent.status,
                    })
                }
                status => DependencyCheck::blocked(BlockingReason::Unfinished {
                    prerequisite,
                    status,
                }),
            },
        };

        Ok(check)
    }

    /// Dispatches every waiting dependent of `completed_job_id` whose
    /// dependency is now satisfied. Safe to run repeatedly.
    pub async fn release_dependents(
        &self,
        completed_job_id: Uuid,
        dispatcher: &dyn Dispatcher,
    ) -> Result<ReleaseSummary, OrchestratorError> {
        let dependents = self.jobs.dependents_of(completed_job_id).await?;
        let summary = self.release(dependents, dispatcher).await;

        if summary.examined > 0 {
            info!(
                job_id = %completed_job_id,
                examined = summary.examined,
                dispatched = summary.dispatched,
                "released dependents"
            );
        }
        Ok(summary)
    }

    /// Periodic sweep over every dependent still waiting, covering completions
    /// whose release callback was missed.
    pub async fn release_blocked(
        &self,
        dispatcher: &dyn Dispatcher,
    ) -> Result<ReleaseSummary, OrchestratorError> {
        let waiting = self.jobs.waiting_dependents(Utc::now(), self.scan_limit).await?;
        let summary = self.release(waiting, dispatcher).await;

        if summary.dispatched > 0 {
            info!(
                examined = summary.examined,
                dispatched = summary.dispatched,
                "release scan dispatched waiting dependents"
            );
        }
        Ok(summary)
    }

    async fn release(&self, candidates: Vec<JobModel>, dispatcher: &dyn Dispatcher) -> ReleaseSummary {
        let mut summary = ReleaseSummary::default();

        for job in candidates {
            summary.examined += 1;

            let check = match self.is_satisfied(&job).await {
                Ok(check) => check,
                Err(err) => {
                    warn!(job_id = %job.id, error = %err, "dependency check failed");
                    summary.still_blocked += 1;
                    continue;
                }
            };

            if !check.satisfied {
                debug!(job_id = %job.id, reasons = %check.describe(), "dependent still blocked");
                summary.still_blocked += 1;
                continue;
            }

            match dispatcher.try_dispatch(job.id).await {
                Ok(true) => summary.dispatched += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(job_id = %job.id, error = %err, "failed to dispatch released dependent");
                }
            }
        }

        summary
    }
}
