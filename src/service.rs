//! # Job Orchestrator
//!
//! Facade wiring the lifecycle manager, checkpoints, monitors, SLA tracker
//! and scaling advisor over one job store and broker, plus the background
//! loops that keep work moving.

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::broker::{Broker, TaskOutcome};
use crate::checkpoint::{Checkpoint, CheckpointManager, CheckpointStore};
use crate::config::{AppConfig, SchedulerConfig, SlaConfig};
use crate::cursor::{decode_cursor, encode_cursor};
use crate::error::OrchestratorError;
use crate::lifecycle::{DispatchOutcome, JobLifecycleManager, SubmitJob};
use crate::models::JobModel;
use crate::monitor::{Backlog, QueueMonitor, WorkerHealth, WorkerHealthMonitor};
use crate::repositories::{JobFilter, JobStore};
use crate::retry::RetryPolicy;
use crate::scaling::{ScalingAdvisor, ScalingRecommendation, compute_recommendation};
use crate::sla::{SlaCompliance, SlaReport, SlaTracker};

pub const DEFAULT_PAGE_SIZE: u64 = 50;
pub const MAX_PAGE_SIZE: u64 = 200;

/// Page request for [`JobOrchestrator::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct PageRequest {
    /// Opaque cursor from a previous page's `next_cursor`
    pub cursor: Option<String>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobModel>,
    pub next_cursor: Option<String>,
}

/// Single entry point for callers of the orchestration subsystem.
#[derive(Clone)]
pub struct JobOrchestrator {
    jobs: Arc<dyn JobStore>,
    lifecycle: JobLifecycleManager,
    checkpoints: CheckpointManager,
    queues: QueueMonitor,
    workers: WorkerHealthMonitor,
    sla: SlaTracker,
    scaling: ScalingAdvisor,
    scheduler: SchedulerConfig,
    sla_config: SlaConfig,
}

impl JobOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        broker: Arc<dyn Broker>,
        checkpoint_store: Arc<dyn CheckpointStore>,
        config: &AppConfig,
    ) -> Self {
        let lifecycle = JobLifecycleManager::new(
            jobs.clone(),
            broker.clone(),
            RetryPolicy::from_config(&config.retry),
        )
        .with_default_max_retries(config.retry.max_retries)
        .with_broker_retry(config.scheduler.broker_retry());
        let queues = QueueMonitor::new(jobs.clone(), broker.clone());
        let workers = WorkerHealthMonitor::new(broker);

        Self {
            checkpoints: CheckpointManager::new(
                checkpoint_store,
                jobs.clone(),
                config.checkpoint.ttl(),
            ),
            sla: SlaTracker::new(jobs.clone()),
            scaling: ScalingAdvisor::new(queues.clone(), workers.clone(), config.scaling.clone()),
            lifecycle,
            queues,
            workers,
            jobs,
            scheduler: config.scheduler.clone(),
            sla_config: config.sla.clone(),
        }
    }

    pub fn lifecycle(&self) -> &JobLifecycleManager {
        &self.lifecycle
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub async fn submit_job(&self, request: SubmitJob) -> Result<JobModel, OrchestratorError> {
        self.lifecycle.submit(request).await
    }

    /// Submits a job and immediately attempts to dispatch it.
    pub async fn submit_and_dispatch(
        &self,
        request: SubmitJob,
    ) -> Result<(JobModel, DispatchOutcome), OrchestratorError> {
        let job = self.lifecycle.submit(request).await?;
        let outcome = self.lifecycle.dispatch(job.id).await?;
        Ok((job, outcome))
    }

    pub async fn dispatch_job(&self, job_id: Uuid) -> Result<DispatchOutcome, OrchestratorError> {
        self.lifecycle.dispatch(job_id).await
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<JobModel, OrchestratorError> {
        self.jobs
            .find(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound { id: job_id })
    }

    /// Newest-first page of jobs with keyset pagination.
    pub async fn list_jobs(
        &self,
        filter: &JobFilter,
        page: &PageRequest,
    ) -> Result<JobPage, OrchestratorError> {
        let limit = page.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(OrchestratorError::invalid_field(
                "limit",
                format!("limit must be between 1 and {}", MAX_PAGE_SIZE),
            ));
        }
        let after = page.cursor.as_deref().map(decode_cursor).transpose()?;

        let mut jobs = self.jobs.list(filter, after.as_ref(), limit + 1).await?;
        let next_cursor = if jobs.len() as u64 > limit {
            jobs.truncate(limit as usize);
            jobs.last()
                .map(|job| encode_cursor(&job.created_at_utc(), &job.id))
        } else {
            None
        };

        Ok(JobPage { jobs, next_cursor })
    }

    pub async fn pause_job(&self, job_id: Uuid) -> Result<bool, OrchestratorError> {
        self.lifecycle.pause(job_id).await
    }

    pub async fn resume_job(&self, job_id: Uuid) -> Result<bool, OrchestratorError> {
        self.lifecycle.resume(job_id).await
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> Result<bool, OrchestratorError> {
        self.lifecycle.cancel(job_id).await
    }

    pub async fn report_progress(
        &self,
        job_id: Uuid,
        percent: f64,
    ) -> Result<bool, OrchestratorError> {
        self.lifecycle.report_progress(job_id, percent).await
    }

    pub async fn backlog(&self) -> Backlog {
        self.queues.backlog().await
    }

    pub async fn worker_health(&self) -> WorkerHealth {
        self.workers.health().await
    }

    pub async fn sla_status(&self, job_id: Uuid) -> Result<SlaCompliance, OrchestratorError> {
        self.sla.compliance(job_id).await
    }

    /// Compliance over `window`, or the configured default window.
    pub async fn sla_report(
        &self,
        window: Option<ChronoDuration>,
    ) -> Result<SlaReport, OrchestratorError> {
        self.sla
            .compliance_rate(window.unwrap_or_else(|| self.sla_config.window()))
            .await
    }

    pub async fn scaling_recommendation(&self) -> ScalingRecommendation {
        self.scaling.recommend().await
    }

    pub async fn save_checkpoint(
        &self,
        job_id: Uuid,
        name: &str,
        payload: JsonValue,
    ) -> Result<Checkpoint, OrchestratorError> {
        self.checkpoints.save(job_id, name, payload).await
    }

    pub async fn load_checkpoint(
        &self,
        job_id: Uuid,
        name: &str,
    ) -> Result<Option<Checkpoint>, OrchestratorError> {
        self.checkpoints.load(job_id, name).await
    }

    pub async fn delete_checkpoint(&self, job_id: Uuid, name: &str) -> Result<bool, OrchestratorError> {
        self.checkpoints.delete(job_id, name).await
    }

    /// Applies a broker outcome to its job. Outcomes from a superseded
    /// execution are dropped.
    pub async fn handle_outcome(
        &self,
        outcome: TaskOutcome,
    ) -> Result<Option<JobModel>, OrchestratorError> {
        let job = match outcome.job_id() {
            Some(job_id) => self.jobs.find(job_id).await?,
            None => self.jobs.find_by_execution_id(&outcome.execution_id).await?,
        };
        let Some(job) = job else {
            warn!(
                execution_id = %outcome.execution_id,
                task_name = %outcome.task_name,
                "outcome for unknown job dropped"
            );
            counter!("orchestrator_outcomes_dropped_total").increment(1);
            return Ok(None);
        };

        if let Some(current) = job.execution_id.as_deref() {
            if current != outcome.execution_id {
                debug!(
                    job_id = %job.id,
                    execution_id = %outcome.execution_id,
                    current_execution_id = current,
                    "stale outcome dropped"
                );
                counter!("orchestrator_outcomes_dropped_total").increment(1);
                return Ok(None);
            }
        }

        let updated = match outcome.result {
            Ok(result) => self.lifecycle.complete(job.id, result).await?,
            Err(error) => self.lifecycle.fail(job.id, error).await?,
        };
        Ok(Some(updated))
    }

    /// Runs the background loops until `shutdown` fires: dispatch sweep,
    /// dependency release scan, monitor poll and broker outcome consumption.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        shutdown: CancellationToken,
        mut outcomes: UnboundedReceiver<TaskOutcome>,
    ) -> Result<(), OrchestratorError> {
        info!(
            dispatch_tick_seconds = self.scheduler.dispatch_tick_seconds,
            release_scan_seconds = self.scheduler.release_scan_seconds,
            monitor_poll_seconds = self.scheduler.monitor_poll_seconds,
            "Starting job orchestrator"
        );

        let mut dispatch_tick = interval(self.scheduler.dispatch_tick());
        let mut release_scan = interval(self.scheduler.release_scan());
        let mut monitor_poll = interval(self.scheduler.monitor_poll());
        for timer in [&mut dispatch_tick, &mut release_scan, &mut monitor_poll] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        let mut outcomes_open = true;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Job orchestrator shutdown requested");
                    break;
                }
                maybe_outcome = outcomes.recv(), if outcomes_open => {
                    match maybe_outcome {
                        Some(outcome) => {
                            let execution_id = outcome.execution_id.clone();
                            if let Err(err) = self.handle_outcome(outcome).await {
                                error!(error = ?err, execution_id = %execution_id, "Failed to apply task outcome");
                            }
                        }
                        None => {
                            warn!("Broker outcome channel closed");
                            outcomes_open = false;
                        }
                    }
                }
                _ = dispatch_tick.tick() => {
                    let tick_started = Instant::now();
                    match self.lifecycle.dispatch_ready(self.scheduler.dispatch_batch).await {
                        Ok(summary) => {
                            if summary.dispatched > 0 || summary.broker_failures > 0 {
                                debug!(
                                    promoted = summary.promoted,
                                    dispatched = summary.dispatched,
                                    broker_failures = summary.broker_failures,
                                    "Dispatch tick completed"
                                );
                            }
                        }
                        Err(err) => error!(error = ?err, "Dispatch tick failed"),
                    }
                    histogram!("orchestrator_dispatch_tick_duration_ms")
                        .record(tick_started.elapsed().as_secs_f64() * 1_000.0);
                }
                _ = release_scan.tick() => {
                    if let Err(err) = self.lifecycle.release_blocked().await {
                        error!(error = ?err, "Dependency release scan failed");
                    }
                }
                _ = monitor_poll.tick() => {
                    self.publish_metrics().await;
                    self.checkpoints.purge_expired().await;
                }
            }
        }

        info!("Job orchestrator stopped");
        Ok(())
    }

    /// Polls the monitors once and publishes their readings as gauges.
    pub async fn publish_metrics(&self) -> ScalingRecommendation {
        let backlog = self.queues.backlog().await;
        let health = self.workers.health().await;

        gauge!("orchestrator_backlog_pending").set(backlog.total_pending as f64);
        gauge!("orchestrator_backlog_running").set(backlog.total_running as f64);
        gauge!("orchestrator_backlog_scheduled").set(backlog.total_scheduled as f64);
        for (queue, depth) in &backlog.per_queue_depth {
            let metric_labels = vec![("queue", queue.clone())];
            gauge!("orchestrator_queue_depth", &metric_labels).set(*depth as f64);
        }
        gauge!("orchestrator_workers_total").set(health.total_workers as f64);
        gauge!("orchestrator_workers_active").set(health.active_workers as f64);

        let recommendation = compute_recommendation(
            backlog.total_pending,
            backlog.total_queue_depth(),
            health.total_workers,
            self.scaling.config(),
        );
        gauge!("orchestrator_recommended_workers").set(recommendation.recommended_workers as f64);

        debug!(
            backlog_status = ?backlog.status,
            worker_status = ?health.status,
            pending = backlog.total_pending,
            workers = health.total_workers,
            recommended_workers = recommendation.recommended_workers,
            "Monitor poll completed"
        );
        recommendation
    }
}
