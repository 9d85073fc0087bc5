//! # SLA Tracker
//!
//! Compares job durations against their declared time budget. Reporting
//! only; nothing here feeds back into scheduling.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::models::{JobModel, JobStatus};
use crate::repositories::JobStore;

/// Per-job compliance. `met_sla` is `None` when there is no opinion: no
/// budget was declared or the job never started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaCompliance {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub met_sla: Option<bool>,
    pub sla_budget_seconds: Option<i64>,
    pub elapsed_seconds: Option<f64>,
    pub violation_percent: Option<f64>,
    /// A running job already past its budget
    pub at_risk: bool,
}

/// Aggregate compliance over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlaReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Completed or failed jobs that finished in the window
    pub finished: usize,
    /// Finished jobs that declared a budget and have a measurable duration
    pub evaluated: usize,
    pub met: usize,
    pub violated: usize,
    /// `met / evaluated`; `None` when nothing was evaluated
    pub compliance_rate: Option<f64>,
    pub mean_violation_percent: Option<f64>,
}

fn seconds(duration: Duration) -> f64 {
    duration.num_milliseconds().max(0) as f64 / 1000.0
}

/// Elapsed time for a job at `now`: actual duration once finished,
/// elapsed-so-far while running, `None` before it starts.
pub fn elapsed(job: &JobModel, now: DateTime<Utc>) -> Option<Duration> {
    let started_at = job.started_at_utc()?;
    let end = match job.status {
        JobStatus::Running => now,
        _ => job.completed_at_utc()?,
    };
    Some(end - started_at)
}

pub fn violation_percent(elapsed_seconds: f64, budget_seconds: f64) -> f64 {
    if budget_seconds <= 0.0 {
        return 0.0;
    }
    ((elapsed_seconds - budget_seconds) / budget_seconds * 100.0).max(0.0)
}

/// Compliance of one job evaluated at `now`.
pub fn evaluate(job: &JobModel, now: DateTime<Utc>) -> SlaCompliance {
    let elapsed_seconds = elapsed(job, now).map(seconds);
    let budget = job.sla_budget_seconds.filter(|budget| *budget > 0);

    let (met_sla, violation) = match (budget, elapsed_seconds) {
        (Some(budget), Some(elapsed)) => {
            let budget = budget as f64;
            (Some(elapsed <= budget), Some(violation_percent(elapsed, budget)))
        }
        _ => (None, None),
    };

    SlaCompliance {
        job_id: job.id,
        status: job.status,
        met_sla,
        sla_budget_seconds: job.sla_budget_seconds,
        elapsed_seconds,
        violation_percent: violation,
        at_risk: job.status == JobStatus::Running && met_sla == Some(false),
    }
}

/// Aggregates compliance of jobs finished between `window_start` and `window_end`.
pub fn summarize(
    jobs: &[JobModel],
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> SlaReport {
    let mut report = SlaReport {
        window_start,
        window_end,
        finished: 0,
        evaluated: 0,
        met: 0,
        violated: 0,
        compliance_rate: None,
        mean_violation_percent: None,
    };
    let mut violation_total = 0.0;

    for job in jobs {
        if !matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            continue;
        }
        let Some(completed_at) = job.completed_at_utc() else {
            continue;
        };
        if completed_at < window_start || completed_at > window_end {
            continue;
        }
        report.finished += 1;

        let compliance = evaluate(job, window_end);
        match compliance.met_sla {
            Some(true) => report.met += 1,
            Some(false) => report.violated += 1,
            None => continue,
        }
        report.evaluated += 1;
        violation_total += compliance.violation_percent.unwrap_or(0.0);
    }

    if report.evaluated > 0 {
        let evaluated = report.evaluated as f64;
        report.compliance_rate = Some(report.met as f64 / evaluated);
        report.mean_violation_percent = Some(violation_total / evaluated);
    }
    report
}

#[derive(Clone)]
pub struct SlaTracker {
    jobs: Arc<dyn JobStore>,
}

impl SlaTracker {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    pub async fn compliance(&self, job_id: Uuid) -> Result<SlaCompliance, OrchestratorError> {
        let job = self
            .jobs
            .find(job_id)
            .await?
            .ok_or(OrchestratorError::JobNotFound { id: job_id })?;
        Ok(evaluate(&job, Utc::now()))
    }

    /// Share of jobs finished within the trailing `window` that met their budget.
    pub async fn compliance_rate(&self, window: Duration) -> Result<SlaReport, OrchestratorError> {
        let window_end = Utc::now();
        let window_start = window_end - window;
        let finished = self.jobs.finished_since(window_start).await?;
        let report = summarize(&finished, window_start, window_end);

        debug!(
            finished = report.finished,
            evaluated = report.evaluated,
            compliance_rate = ?report.compliance_rate,
            "sla report computed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobKind;
    use serde_json::json;

    fn job(status: JobStatus, budget: Option<i64>, ran_for: Option<i64>) -> JobModel {
        let now = Utc::now();
        let started = now - Duration::seconds(ran_for.unwrap_or(0));
        JobModel {
            id: Uuid::new_v4(),
            execution_id: None,
            job_type: JobKind::ScrapeOne,
            queue: "scraping".to_string(),
            params: json!({"account_id": 1}),
            status,
            paused: false,
            priority: 5,
            progress: 0.0,
            depends_on: None,
            sla_budget_seconds: budget,
            scheduled_for: None,
            not_before: None,
            retry_count: 0,
            max_retries: 3,
            result: None,
            error: None,
            last_error: None,
            revision: 0,
            created_at: started.fixed_offset(),
            started_at: ran_for.map(|_| started.fixed_offset()),
            completed_at: match status {
                JobStatus::Completed | JobStatus::Failed if ran_for.is_some() => {
                    Some(now.fixed_offset())
                }
                _ => None,
            },
            updated_at: now.fixed_offset(),
        }
    }

    #[test]
    fn no_budget_means_no_opinion() {
        let compliance = evaluate(&job(JobStatus::Completed, None, Some(30)), Utc::now());
        assert_eq!(compliance.met_sla, None);
        assert_eq!(compliance.violation_percent, None);
        assert!(compliance.elapsed_seconds.is_some());
    }

    #[test]
    fn completed_job_uses_actual_duration() {
        let compliance = evaluate(&job(JobStatus::Completed, Some(60), Some(90)), Utc::now());
        assert_eq!(compliance.met_sla, Some(false));
        let violation = compliance.violation_percent.unwrap();
        assert!((violation - 50.0).abs() < 0.5, "violation was {}", violation);
        assert!(!compliance.at_risk);
    }

    #[test]
    fn running_job_past_budget_is_at_risk() {
        let running = job(JobStatus::Running, Some(10), Some(20));
        let compliance = evaluate(&running, Utc::now());
        assert_eq!(compliance.met_sla, Some(false));
        assert!(compliance.at_risk);

        let fresh = evaluate(&job(JobStatus::Running, Some(600), Some(5)), Utc::now());
        assert_eq!(fresh.met_sla, Some(true));
        assert_eq!(fresh.violation_percent, Some(0.0));
    }

    #[test]
    fn pending_job_has_no_elapsed_time() {
        let compliance = evaluate(&job(JobStatus::Pending, Some(60), None), Utc::now());
        assert_eq!(compliance.elapsed_seconds, None);
        assert_eq!(compliance.met_sla, None);
    }

    #[test]
    fn violation_is_never_negative() {
        assert_eq!(violation_percent(10.0, 60.0), 0.0);
        assert_eq!(violation_percent(120.0, 60.0), 100.0);
        assert_eq!(violation_percent(5.0, 0.0), 0.0);
    }

    #[test]
    fn summary_counts_only_budgeted_finished_jobs() {
        let now = Utc::now();
        let jobs = vec![
            job(JobStatus::Completed, Some(60), Some(30)),
            job(JobStatus::Completed, Some(60), Some(120)),
            job(JobStatus::Failed, Some(60), Some(10)),
            job(JobStatus::Completed, None, Some(10)),
            job(JobStatus::Running, Some(60), Some(10)),
        ];
        let report = summarize(&jobs, now - Duration::hours(1), now + Duration::seconds(1));

        assert_eq!(report.finished, 4);
        assert_eq!(report.evaluated, 3);
        assert_eq!(report.met, 2);
        assert_eq!(report.violated, 1);
        let rate = report.compliance_rate.unwrap();
        assert!((rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_window_has_no_rate() {
        let now = Utc::now();
        let report = summarize(&[], now - Duration::hours(24), now);
        assert_eq!(report.compliance_rate, None);
        assert_eq!(report.finished, 0);
    }
}
