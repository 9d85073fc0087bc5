//! Job entity model
//!
//! This module contains the SeaORM entity model for the jobs table, which
//! records every orchestrated unit of scrape or backfill work together with
//! its lifecycle status, retry bookkeeping and timing columns.

use chrono::{DateTime, Duration, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Job entity representing one unit of asynchronously executed work
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "jobs")]
pub struct Model {
    /// Store primary key
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Opaque execution handle assigned by the broker on the latest dispatch
    pub execution_id: Option<String>,

    /// Kind of work
    pub job_type: JobKind,

    /// Broker queue the kind is routed to
    pub queue: String,

    /// Kind-specific parameters
    #[sea_orm(column_type = "JsonBinary")]
    pub params: JsonValue,

    /// Lifecycle status
    pub status: JobStatus,

    /// Pause flag, only meaningful while pending
    pub paused: bool,

    /// Lower values are more urgent
    pub priority: i16,

    /// Completion percentage (0-100)
    #[sea_orm(column_type = "Double")]
    pub progress: f64,

    /// Prerequisite job that must complete first
    pub depends_on: Option<Uuid>,

    /// Expected maximum duration in seconds
    pub sla_budget_seconds: Option<i64>,

    /// Dispatch time for scheduled jobs
    pub scheduled_for: Option<DateTimeWithTimeZone>,

    /// Earliest re-dispatch time after a retryable failure
    pub not_before: Option<DateTimeWithTimeZone>,

    /// Retries made so far
    pub retry_count: i32,

    /// Retry ceiling for this job
    pub max_retries: i32,

    /// Opaque result payload, may embed a `checkpoints` map
    #[sea_orm(column_type = "JsonBinary")]
    pub result: Option<JsonValue>,

    /// Terminal failure details, present only once the job has failed
    #[sea_orm(column_type = "JsonBinary")]
    pub error: Option<JsonValue>,

    /// Most recent execution failure, including ones that were retried
    #[sea_orm(column_type = "JsonBinary")]
    pub last_error: Option<JsonValue>,

    /// Bumped on every write; conditional updates compare against it
    pub revision: i64,

    pub created_at: DateTimeWithTimeZone,

    /// Set on first dispatch and never overwritten
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Set when the job reaches a terminal status
    pub completed_at: Option<DateTimeWithTimeZone>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::DependsOn",
        to = "Column::Id"
    )]
    Prerequisite,
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle status of a job. `paused` is a sub-state of `Pending`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "scheduled")]
    Scheduled,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Edges of the lifecycle state machine.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (*self, next),
            (Pending, Running)
                | (Pending, Pending)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Pending)
                | (Running, Cancelled)
                | (Scheduled, Pending)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Queue for account scraping work.
pub const SCRAPING_QUEUE: &str = "scraping";
/// Queue for historical backfills, kept apart so long runs do not starve scrapes.
pub const BACKFILL_QUEUE: &str = "backfill";

/// Closed set of job kinds, each mapped to a broker task and queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    #[sea_orm(string_value = "scrape_all")]
    ScrapeAll,
    #[sea_orm(string_value = "scrape_one")]
    ScrapeOne,
    #[sea_orm(string_value = "scrape_platform")]
    ScrapePlatform,
    #[sea_orm(string_value = "backfill")]
    Backfill,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::ScrapeAll,
        JobKind::ScrapeOne,
        JobKind::ScrapePlatform,
        JobKind::Backfill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ScrapeAll => "scrape_all",
            JobKind::ScrapeOne => "scrape_one",
            JobKind::ScrapePlatform => "scrape_platform",
            JobKind::Backfill => "backfill",
        }
    }

    /// Registered broker task name.
    pub fn task_name(&self) -> &'static str {
        match self {
            JobKind::ScrapeAll => "scraping.scrape_all_accounts",
            JobKind::ScrapeOne => "scraping.scrape_account",
            JobKind::ScrapePlatform => "scraping.scrape_platform",
            JobKind::Backfill => "scraping.backfill_account",
        }
    }

    pub fn queue(&self) -> &'static str {
        match self {
            JobKind::Backfill => BACKFILL_QUEUE,
            _ => SCRAPING_QUEUE,
        }
    }

    /// Every queue some kind routes to.
    pub fn queues() -> Vec<&'static str> {
        let mut queues: Vec<&'static str> = Self::ALL.iter().map(|kind| kind.queue()).collect();
        queues.sort_unstable();
        queues.dedup();
        queues
    }

    /// Parameter keys that must be present for this kind.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            JobKind::ScrapeAll => &[],
            JobKind::ScrapeOne => &["account_id"],
            JobKind::ScrapePlatform => &["platform"],
            JobKind::Backfill => &["account_id", "days"],
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    /// Accepts both `scrape_one` and `scrape-one` spellings.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown job type '{}'", value))
    }
}

impl Model {
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        self.created_at.with_timezone(&Utc)
    }

    pub fn started_at_utc(&self) -> Option<DateTime<Utc>> {
        self.started_at.map(|dt| dt.with_timezone(&Utc))
    }

    pub fn completed_at_utc(&self) -> Option<DateTime<Utc>> {
        self.completed_at.map(|dt| dt.with_timezone(&Utc))
    }

    pub fn sla_budget(&self) -> Option<Duration> {
        self.sla_budget_seconds.map(Duration::seconds)
    }

    /// Whether retry backoff still holds the job back at `now`.
    pub fn is_backing_off(&self, now: DateTime<Utc>) -> bool {
        self.not_before
            .map(|not_before| not_before.with_timezone(&Utc) > now)
            .unwrap_or(false)
    }

    /// Whether a scheduled job's dispatch time has been reached at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for
            .map(|at| at.with_timezone(&Utc) <= now)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_kind_parses_both_spellings() {
        assert_eq!("scrape-one".parse::<JobKind>(), Ok(JobKind::ScrapeOne));
        assert_eq!("SCRAPE_ALL".parse::<JobKind>(), Ok(JobKind::ScrapeAll));
        assert!("scrape-everything".parse::<JobKind>().is_err());
    }

    #[test]
    fn backfill_routes_to_its_own_queue() {
        assert_eq!(JobKind::Backfill.queue(), BACKFILL_QUEUE);
        assert_eq!(JobKind::ScrapePlatform.queue(), SCRAPING_QUEUE);
        assert_eq!(JobKind::queues(), vec![BACKFILL_QUEUE, SCRAPING_QUEUE]);
    }

    #[test]
    fn terminal_statuses_have_no_outgoing_edges() {
        use sea_orm::Iterable;
        for from in JobStatus::iter().filter(JobStatus::is_terminal) {
            for to in JobStatus::iter() {
                assert!(!from.can_transition_to(to), "{} -> {} allowed", from, to);
            }
        }
    }

    #[test]
    fn scheduled_only_moves_to_pending() {
        use sea_orm::Iterable;
        let targets: Vec<JobStatus> = JobStatus::iter()
            .filter(|to| JobStatus::Scheduled.can_transition_to(*to))
            .collect();
        assert_eq!(targets, vec![JobStatus::Pending]);
    }
}
