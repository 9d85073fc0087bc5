//! # Job Lifecycle Manager
//!
//! Sole owner of job state transitions. Every mutation is a conditional
//! update on the job's current status; a writer that loses a race, or a
//! duplicate broker callback, observes an `IllegalTransition` that is logged
//! and absorbed so callers only ever see precondition violations.
//!
//! ```text
//! pending --(dispatch)--> running
//! pending --(pause/resume)--> pending[paused]
//! running --(success)--> completed
//! running --(failure, retries remain)--> pending (not_before = now + delay)
//! running --(failure, no retries)--> failed
//! pending|running --(cancel)--> cancelled
//! scheduled --(due & dependency satisfied)--> pending
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use sea_orm::{ActiveValue::NotSet, Set};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::broker::{Broker, task_args};
use crate::dependency::{BlockingReason, DependencyResolver, Dispatcher, ReleaseSummary};
use crate::error::{ExecutionError, OrchestratorError};
use crate::models::job::ActiveModel;
use crate::models::{JobKind, JobModel, JobStatus};
use crate::repositories::job::{EMBEDDED_CHECKPOINTS_KEY, MAX_WRITE_ATTEMPTS, into_object};
use crate::repositories::{JobStore, TransitionGuard};
use crate::retry::RetryPolicy;

pub const DEFAULT_PRIORITY: i16 = 5;
pub const MIN_PRIORITY: i16 = 0;
pub const MAX_PRIORITY: i16 = 9;
/// Progress reported while running never reaches 100; only completion does.
pub const MAX_RUNNING_PROGRESS: f64 = 99.0;
const MAX_RETRY_CEILING: u32 = 100;

/// Submission request for a new job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJob {
    pub job_type: String,
    #[serde(default)]
    pub params: JsonValue,
    #[serde(default)]
    pub priority: Option<i16>,
    #[serde(default)]
    pub sla_budget_seconds: Option<i64>,
    #[serde(default)]
    pub depends_on: Option<Uuid>,
    /// Dispatch no earlier than this; a future time creates a `scheduled` job
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl SubmitJob {
    pub fn new<S: Into<String>>(job_type: S, params: JsonValue) -> Self {
        Self {
            job_type: job_type.into(),
            params,
            ..Self::default()
        }
    }

    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn sla_budget_seconds(mut self, seconds: i64) -> Self {
        self.sla_budget_seconds = Some(seconds);
        self
    }

    pub fn depends_on(mut self, prerequisite: Uuid) -> Self {
        self.depends_on = Some(prerequisite);
        self
    }

    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Result of a dispatch attempt. None of these are errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Dispatched { execution_id: String },
    Blocked { reasons: Vec<BlockingReason> },
    NotEligible { reason: String },
    BrokerUnavailable { message: String },
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched { .. })
    }
}

/// Counts from one dispatch sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub promoted: usize,
    pub dispatched: usize,
    pub broker_failures: usize,
}

fn record_transition(from: JobStatus, to: JobStatus) {
    let metric_labels = vec![
        ("from", from.as_str().to_string()),
        ("to", to.as_str().to_string()),
    ];
    counter!("jobs_transitions_total", &metric_labels).increment(1);
}

/// Owns the job state machine.
#[derive(Clone)]
pub struct JobLifecycleManager {
    jobs: Arc<dyn JobStore>,
    broker: Arc<dyn Broker>,
    resolver: DependencyResolver,
    retry_policy: RetryPolicy,
    default_max_retries: u32,
    broker_retry: Duration,
}

impl JobLifecycleManager {
    pub fn new(jobs: Arc<dyn JobStore>, broker: Arc<dyn Broker>, retry_policy: RetryPolicy) -> Self {
        Self {
            resolver: DependencyResolver::new(jobs.clone()),
            jobs,
            broker,
            retry_policy,
            default_max_retries: 3,
            broker_retry: Duration::from_secs(15),
        }
    }

    /// Retry ceiling for jobs submitted without one.
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries.min(MAX_RETRY_CEILING);
        self
    }

    /// Delay before re-dispatching a job whose broker submission failed.
    pub fn with_broker_retry(mut self, delay: Duration) -> Self {
        self.broker_retry = delay;
        self
    }

    pub fn resolver(&self) -> &DependencyResolver {
        &self.resolver
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    async fn load(&self, job_id: Uuid) -> Result<JobModel, OrchestratorError> {
        self.jobs
            .find(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound { id: job_id })
    }

    /// Logs and absorbs a transition that lost a race or duplicates a callback.
    fn absorb(&self, err: OrchestratorError) {
        counter!("jobs_illegal_transitions_total").increment(1);
        warn!(error = %err, "ignoring illegal transition");
    }

    /// Validates and records a new job.
    #[instrument(skip_all, fields(job_type = %request.job_type))]
    pub async fn submit(&self, request: SubmitJob) -> Result<JobModel, OrchestratorError> {
        let kind: JobKind = request
            .job_type
            .parse()
            .map_err(|e: String| OrchestratorError::invalid_field("job_type", e))?;

        let params = match request.params {
            JsonValue::Null => json!({}),
            JsonValue::Object(map) => JsonValue::Object(map),
            _ => {
                return Err(OrchestratorError::invalid_field(
                    "params",
                    "params must be a JSON object",
                ));
            }
        };
        for key in kind.required_params() {
            if params.get(*key).is_none_or(JsonValue::is_null) {
                return Err(OrchestratorError::invalid_field(
                    format!("params.{}", key),
                    format!("{} jobs require '{}'", kind, key),
                ));
            }
        }

        let priority = request.priority.unwrap_or(DEFAULT_PRIORITY);
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(OrchestratorError::invalid_field(
                "priority",
                format!(
                    "priority must be between {} and {}, got {}",
                    MIN_PRIORITY, MAX_PRIORITY, priority
                ),
            ));
        }

        if let Some(budget) = request.sla_budget_seconds {
            if budget <= 0 {
                return Err(OrchestratorError::invalid_field(
                    "sla_budget_seconds",
                    "SLA budget must be positive",
                ));
            }
        }

        let max_retries = request.max_retries.unwrap_or(self.default_max_retries);
        if max_retries > MAX_RETRY_CEILING {
            return Err(OrchestratorError::invalid_field(
                "max_retries",
                format!("max_retries must not exceed {}", MAX_RETRY_CEILING),
            ));
        }

        if let Some(prerequisite) = request.depends_on {
            if self.jobs.find(prerequisite).await?.is_none() {
                return Err(OrchestratorError::invalid_field(
                    "depends_on",
                    format!("prerequisite job {} does not exist", prerequisite),
                ));
            }
        }

        let now = Utc::now();
        let scheduled_for = request.run_at.filter(|at| *at > now);
        let status = if scheduled_for.is_some() {
            JobStatus::Scheduled
        } else {
            JobStatus::Pending
        };

        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            execution_id: Set(None),
            job_type: Set(kind),
            queue: Set(kind.queue().to_string()),
            params: Set(params),
            status: Set(status),
            paused: Set(false),
            priority: Set(priority),
            progress: Set(0.0),
            depends_on: Set(request.depends_on),
            sla_budget_seconds: Set(request.sla_budget_seconds),
            scheduled_for: Set(scheduled_for.map(|at| at.fixed_offset())),
            not_before: Set(None),
            retry_count: Set(0),
            max_retries: Set(max_retries as i32),
            result: Set(None),
            error: Set(None),
            last_error: Set(None),
            revision: Set(0),
            created_at: Set(now.fixed_offset()),
            started_at: Set(None),
            completed_at: Set(None),
            updated_at: Set(now.fixed_offset()),
        };

        let job = self.jobs.insert(job).await?;

        let metric_labels = vec![("job_type", kind.as_str().to_string())];
        counter!("jobs_submitted_total", &metric_labels).increment(1);
        info!(
            job_id = %job.id,
            job_type = %kind,
            queue = %job.queue,
            status = %job.status,
            priority = job.priority,
            depends_on = ?job.depends_on,
            "job submitted"
        );

        Ok(job)
    }

    /// Attempts to move a job to `running` and hand it to the broker.
    #[instrument(skip(self))]
    pub async fn dispatch(&self, job_id: Uuid) -> Result<DispatchOutcome, OrchestratorError> {
        let now = Utc::now();
        let mut job = self.load(job_id).await?;

        if job.status == JobStatus::Scheduled {
            if !job.is_due(now) {
                return Ok(DispatchOutcome::NotEligible {
                    reason: "scheduled time not reached".to_string(),
                });
            }

            let check = self.resolver.is_satisfied(&job).await?;
            if !check.satisfied {
                return Ok(DispatchOutcome::Blocked {
                    reasons: check.blocking_reasons,
                });
            }

            let promote = ActiveModel {
                status: Set(JobStatus::Pending),
                ..Default::default()
            };
            match self
                .jobs
                .transition(job_id, &TransitionGuard::status_in(&[JobStatus::Scheduled]), promote)
                .await?
            {
                Some(promoted) => {
                    record_transition(JobStatus::Scheduled, JobStatus::Pending);
                    debug!("scheduled job promoted to pending");
                    job = promoted;
                }
                None => job = self.load(job_id).await?,
            }
        }

        if job.status != JobStatus::Pending {
            return Ok(DispatchOutcome::NotEligible {
                reason: format!("job is {}", job.status),
            });
        }
        if job.paused {
            return Ok(DispatchOutcome::NotEligible {
                reason: "job is paused".to_string(),
            });
        }
        if job.is_backing_off(now) {
            return Ok(DispatchOutcome::NotEligible {
                reason: "retry backoff has not elapsed".to_string(),
            });
        }

        let check = self.resolver.is_satisfied(&job).await?;
        if !check.satisfied {
            debug!(reasons = %check.describe(), "dispatch blocked by dependency");
            return Ok(DispatchOutcome::Blocked {
                reasons: check.blocking_reasons,
            });
        }

        let claim = ActiveModel {
            status: Set(JobStatus::Running),
            started_at: match job.started_at {
                Some(_) => NotSet,
                None => Set(Some(now.fixed_offset())),
            },
            not_before: Set(None),
            ..Default::default()
        };
        let guard = TransitionGuard::status_in(&[JobStatus::Pending]).paused(false);
        let Some(claimed) = self.jobs.transition(job_id, &guard, claim).await? else {
            debug!("job claimed concurrently");
            return Ok(DispatchOutcome::NotEligible {
                reason: "job was claimed concurrently".to_string(),
            });
        };
        record_transition(JobStatus::Pending, JobStatus::Running);

        let kind = claimed.job_type;
        let args = task_args(claimed.id, &claimed.params);
        match self.broker.submit(kind.task_name(), args, &claimed.queue).await {
            Ok(execution_id) => {
                let record = ActiveModel {
                    execution_id: Set(Some(execution_id.clone())),
                    ..Default::default()
                };
                self.jobs
                    .transition(
                        job_id,
                        &TransitionGuard::status_in(&[JobStatus::Running]),
                        record,
                    )
                    .await?;

                info!(
                    execution_id = %execution_id,
                    task_name = kind.task_name(),
                    queue = %claimed.queue,
                    retry_count = claimed.retry_count,
                    "job dispatched"
                );
                Ok(DispatchOutcome::Dispatched { execution_id })
            }
            Err(err) => {
                let not_before = now
                    + chrono::Duration::from_std(self.broker_retry)
                        .unwrap_or_else(|_| chrono::Duration::seconds(15));
                let revert = ActiveModel {
                    status: Set(JobStatus::Pending),
                    started_at: Set(job.started_at),
                    not_before: Set(Some(not_before.fixed_offset())),
                    ..Default::default()
                };
                if self
                    .jobs
                    .transition(
                        job_id,
                        &TransitionGuard::status_in(&[JobStatus::Running]),
                        revert,
                    )
                    .await?
                    .is_some()
                {
                    record_transition(JobStatus::Running, JobStatus::Pending);
                }

                counter!("jobs_broker_unavailable_total").increment(1);
                warn!(
                    error = %err,
                    retry_at = %not_before,
                    "broker submission failed; job returned to pending"
                );
                Ok(DispatchOutcome::BrokerUnavailable {
                    message: err.to_string(),
                })
            }
        }
    }

    /// Records a successful outcome and releases dependents. Idempotent.
    #[instrument(skip(self, result))]
    pub async fn complete(
        &self,
        job_id: Uuid,
        result: JsonValue,
    ) -> Result<JobModel, OrchestratorError> {
        let now = Utc::now();
        let mut attempts = 0;

        // The merged result is only written against the revision it was read
        // from, so a checkpoint embedded mid-merge is never overwritten.
        let completed = loop {
            let job = self.load(job_id).await?;
            match job.status {
                JobStatus::Completed => {
                    debug!("duplicate completion ignored");
                    return Ok(job);
                }
                JobStatus::Running => {}
                other => {
                    self.absorb(OrchestratorError::IllegalTransition {
                        id: job_id,
                        from: other,
                        to: JobStatus::Completed,
                    });
                    return Ok(job);
                }
            }

            if attempts == MAX_WRITE_ATTEMPTS {
                return Err(OrchestratorError::ConcurrentUpdate {
                    id: job_id,
                    attempts,
                });
            }
            attempts += 1;

            let changes = ActiveModel {
                status: Set(JobStatus::Completed),
                progress: Set(100.0),
                completed_at: Set(Some(now.fixed_offset())),
                not_before: Set(None),
                result: Set(Some(merge_result(job.result.clone(), result.clone()))),
                error: Set(None),
                ..Default::default()
            };
            let guard = TransitionGuard::status_in(&[JobStatus::Running]).at_revision(job.revision);
            if let Some(completed) = self.jobs.transition(job_id, &guard, changes).await? {
                break completed;
            }
            debug!(attempt = attempts, "job changed during completion; retrying");
        };

        record_transition(JobStatus::Running, JobStatus::Completed);
        if let Some(started_at) = completed.started_at_utc() {
            let seconds = (now - started_at).num_milliseconds().max(0) as f64 / 1000.0;
            let metric_labels = vec![("job_type", completed.job_type.as_str().to_string())];
            histogram!("jobs_duration_seconds", &metric_labels).record(seconds);
        }
        info!(retry_count = completed.retry_count, "job completed");

        if let Err(err) = self.release_dependents(job_id).await {
            warn!(error = %err, "failed to release dependents");
        }

        Ok(completed)
    }

    /// Records a failed execution, scheduling a retry when the policy allows.
    /// Idempotent.
    #[instrument(skip(self, error))]
    pub async fn fail(
        &self,
        job_id: Uuid,
        error: ExecutionError,
    ) -> Result<JobModel, OrchestratorError> {
        let job = self.load(job_id).await?;

        match job.status {
            JobStatus::Failed => {
                debug!("duplicate failure ignored");
                return Ok(job);
            }
            JobStatus::Running => {}
            other => {
                self.absorb(OrchestratorError::IllegalTransition {
                    id: job_id,
                    from: other,
                    to: JobStatus::Failed,
                });
                return Ok(job);
            }
        }

        let now = Utc::now();
        let decision = self.retry_policy.should_retry(&job, &error);
        let error_record = json!({
            "message": error.message,
            "category": error.category,
            "classification": decision.classification,
            "status_code": error.status_code,
            "retry_count": job.retry_count,
            "reason": decision.reason,
            "recorded_at": now,
        });

        let (target, changes) = if decision.retry {
            let delay = chrono::Duration::from_std(decision.delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));
            (
                JobStatus::Pending,
                ActiveModel {
                    status: Set(JobStatus::Pending),
                    retry_count: Set(job.retry_count + 1),
                    execution_id: Set(None),
                    not_before: Set(Some((now + delay).fixed_offset())),
                    error: Set(None),
                    last_error: Set(Some(error_record)),
                    ..Default::default()
                },
            )
        } else {
            (
                JobStatus::Failed,
                ActiveModel {
                    status: Set(JobStatus::Failed),
                    completed_at: Set(Some(now.fixed_offset())),
                    not_before: Set(None),
                    error: Set(Some(error_record.clone())),
                    last_error: Set(Some(error_record)),
                    ..Default::default()
                },
            )
        };

        let Some(updated) = self
            .jobs
            .transition(job_id, &TransitionGuard::status_in(&[JobStatus::Running]), changes)
            .await?
        else {
            let current = self.load(job_id).await?;
            if current.status != JobStatus::Failed {
                self.absorb(OrchestratorError::IllegalTransition {
                    id: job_id,
                    from: current.status,
                    to: target,
                });
            }
            return Ok(current);
        };

        record_transition(JobStatus::Running, target);
        if decision.retry {
            let metric_labels = vec![(
                "classification",
                decision.classification.as_str().to_string(),
            )];
            counter!("jobs_retry_scheduled_total", &metric_labels).increment(1);
            info!(
                retry_count = updated.retry_count,
                max_retries = updated.max_retries,
                delay_seconds = decision.delay.as_secs_f64(),
                classification = decision.classification.as_str(),
                error = %error,
                "job failed; retry scheduled"
            );
        } else {
            warn!(
                retry_count = updated.retry_count,
                classification = decision.classification.as_str(),
                reason = %decision.reason,
                error = %error,
                "job failed"
            );
        }

        Ok(updated)
    }

    /// Pauses a pending job. Returns false when it is not pending and unpaused.
    #[instrument(skip(self))]
    pub async fn pause(&self, job_id: Uuid) -> Result<bool, OrchestratorError> {
        self.load(job_id).await?;
        let changes = ActiveModel {
            paused: Set(true),
            ..Default::default()
        };
        let guard = TransitionGuard::status_in(&[JobStatus::Pending]).paused(false);
        let paused = self.jobs.transition(job_id, &guard, changes).await?.is_some();
        if paused {
            info!("job paused");
        }
        Ok(paused)
    }

    /// Resumes a paused pending job. Returns false when it is not paused.
    #[instrument(skip(self))]
    pub async fn resume(&self, job_id: Uuid) -> Result<bool, OrchestratorError> {
        self.load(job_id).await?;
        let changes = ActiveModel {
            paused: Set(false),
            ..Default::default()
        };
        let guard = TransitionGuard::status_in(&[JobStatus::Pending]).paused(true);
        let resumed = self.jobs.transition(job_id, &guard, changes).await?.is_some();
        if resumed {
            info!("job resumed");
        }
        Ok(resumed)
    }

    /// Cancels a pending or running job. Broker revoke is best-effort; the
    /// stored status is authoritative.
    #[instrument(skip(self))]
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool, OrchestratorError> {
        let job = self.load(job_id).await?;
        if !matches!(job.status, JobStatus::Pending | JobStatus::Running) {
            debug!(status = %job.status, "cancel ignored");
            return Ok(false);
        }

        if job.status == JobStatus::Running {
            if let Some(execution_id) = job.execution_id.as_deref() {
                match self.broker.revoke(execution_id).await {
                    Ok(known) => debug!(execution_id, known, "revoke requested"),
                    Err(err) => warn!(execution_id, error = %err, "broker revoke failed"),
                }
            }
        }

        let changes = ActiveModel {
            status: Set(JobStatus::Cancelled),
            completed_at: Set(Some(Utc::now().fixed_offset())),
            not_before: Set(None),
            ..Default::default()
        };
        let guard = TransitionGuard::status_in(&[JobStatus::Pending, JobStatus::Running]);
        match self.jobs.transition(job_id, &guard, changes).await? {
            Some(_) => {
                record_transition(job.status, JobStatus::Cancelled);
                info!(previous = %job.status, "job cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Records progress for a running job. Progress never decreases and stays
    /// below 100 until completion. Returns whether the value was applied.
    pub async fn report_progress(
        &self,
        job_id: Uuid,
        percent: f64,
    ) -> Result<bool, OrchestratorError> {
        if !percent.is_finite() || !(0.0..=100.0).contains(&percent) {
            return Err(OrchestratorError::invalid_field(
                "progress",
                format!("progress must be between 0 and 100, got {}", percent),
            ));
        }
        self.load(job_id).await?;

        let progress = percent.min(MAX_RUNNING_PROGRESS);
        let changes = ActiveModel {
            progress: Set(progress),
            ..Default::default()
        };
        let guard = TransitionGuard::status_in(&[JobStatus::Running]).progress_at_most(progress);
        Ok(self.jobs.transition(job_id, &guard, changes).await?.is_some())
    }

    /// Dispatches every waiting dependent of `completed_job_id` that is now satisfied.
    pub async fn release_dependents(
        &self,
        completed_job_id: Uuid,
    ) -> Result<ReleaseSummary, OrchestratorError> {
        self.resolver.release_dependents(completed_job_id, self).await
    }

    /// Sweeps dependents whose release callback may have been missed.
    pub async fn release_blocked(&self) -> Result<ReleaseSummary, OrchestratorError> {
        self.resolver.release_blocked(self).await
    }

    /// Promotes due scheduled jobs and dispatches up to `batch` ready jobs.
    pub async fn dispatch_ready(&self, batch: u64) -> Result<SweepSummary, OrchestratorError> {
        let now = Utc::now();
        let mut summary = SweepSummary::default();

        for job in self.jobs.due_scheduled(now, batch).await? {
            match self.dispatch(job.id).await {
                Ok(DispatchOutcome::Dispatched { .. }) => {
                    summary.promoted += 1;
                    summary.dispatched += 1;
                }
                Ok(DispatchOutcome::BrokerUnavailable { .. }) => {
                    summary.promoted += 1;
                    summary.broker_failures += 1;
                }
                Ok(_) => {}
                Err(err) => warn!(job_id = %job.id, error = %err, "scheduled dispatch failed"),
            }
        }

        for job in self.jobs.dispatchable(now, batch).await? {
            match self.dispatch(job.id).await {
                Ok(DispatchOutcome::Dispatched { .. }) => summary.dispatched += 1,
                Ok(DispatchOutcome::BrokerUnavailable { .. }) => {
                    summary.broker_failures += 1;
                    // The broker is down; the rest of the batch would fail the same way.
                    break;
                }
                Ok(_) => {}
                Err(err) => warn!(job_id = %job.id, error = %err, "dispatch failed"),
            }
        }

        Ok(summary)
    }
}

#[async_trait]
impl Dispatcher for JobLifecycleManager {
    async fn try_dispatch(&self, job_id: Uuid) -> Result<bool, OrchestratorError> {
        Ok(self.dispatch(job_id).await?.is_dispatched())
    }
}

/// Combines a completion result with checkpoints already embedded in the
/// job record so completing a job does not drop them.
fn merge_result(existing: Option<JsonValue>, result: JsonValue) -> JsonValue {
    let checkpoints = into_object(existing).remove(EMBEDDED_CHECKPOINTS_KEY);
    let Some(checkpoints) = checkpoints else {
        return result;
    };

    let mut merged = into_object(Some(result));
    merged
        .entry(EMBEDDED_CHECKPOINTS_KEY.to_string())
        .or_insert(checkpoints);
    JsonValue::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_keeps_embedded_checkpoints() {
        let existing = json!({"checkpoints": {"cursor": {"payload": 1}}});
        let merged = merge_result(Some(existing), json!({"posts": 40}));
        assert_eq!(merged["posts"], 40);
        assert_eq!(merged["checkpoints"]["cursor"]["payload"], 1);
    }

    #[test]
    fn merge_without_checkpoints_is_passthrough() {
        assert_eq!(merge_result(None, json!([1, 2])), json!([1, 2]));
        assert_eq!(
            merge_result(Some(json!({"posts": 1})), json!("done")),
            json!("done")
        );
    }

    #[test]
    fn merge_wraps_scalar_results() {
        let merged = merge_result(Some(json!({"checkpoints": {}})), json!(7));
        assert_eq!(merged["value"], 7);
        assert!(merged["checkpoints"].is_object());
    }

    #[test]
    fn submit_request_deserializes_with_defaults() {
        let request: SubmitJob =
            serde_json::from_value(json!({"job_type": "scrape_all"})).unwrap();
        assert_eq!(request.job_type, "scrape_all");
        assert!(request.params.is_null());
        assert!(request.priority.is_none());
    }
}
