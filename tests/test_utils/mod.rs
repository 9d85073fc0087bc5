//! Test utilities for orchestration tests.
//!
//! Provides an in-memory SQLite job store with migrations applied and a
//! recording broker double that can be switched offline.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use orchestrator::broker::{ActiveTask, Broker, BrokerError, WorkerInfo};
use orchestrator::lifecycle::{JobLifecycleManager, SubmitJob};
use orchestrator::models::JobStatus;
use orchestrator::models::job::ActiveModel;
use orchestrator::repositories::{JobRepository, JobStore, TransitionGuard};
use orchestrator::retry::RetryPolicy;
use sea_orm::{Database, DatabaseConnection, Set};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// A task submission seen by [`RecordingBroker`].
#[derive(Debug, Clone)]
pub struct Submission {
    pub execution_id: String,
    pub task_name: String,
    pub args: JsonValue,
    pub queue: String,
}

impl Submission {
    pub fn job_id(&self) -> Option<Uuid> {
        self.args
            .get("job_id")
            .and_then(JsonValue::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
    }
}

/// Broker double that records calls and executes nothing.
#[derive(Default)]
pub struct RecordingBroker {
    offline: AtomicBool,
    next_id: AtomicUsize,
    submissions: Mutex<Vec<Submission>>,
    revoked: Mutex<Vec<String>>,
    registered: Mutex<BTreeMap<String, WorkerInfo>>,
    active: Mutex<BTreeMap<String, Vec<ActiveTask>>>,
    queue_lengths: Mutex<HashMap<String, u64>>,
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn submissions_for(&self, job_id: Uuid) -> Vec<Submission> {
        self.submissions()
            .into_iter()
            .filter(|submission| submission.job_id() == Some(job_id))
            .collect()
    }

    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn register_worker(&self, name: &str) {
        self.registered.lock().unwrap().insert(
            name.to_string(),
            WorkerInfo {
                queues: vec!["scraping".to_string(), "backfill".to_string()],
                concurrency: 10,
                registered_tasks: Vec::new(),
            },
        );
    }

    pub fn set_active(&self, worker: &str, tasks: usize) {
        let entries = (0..tasks)
            .map(|n| ActiveTask {
                execution_id: format!("{}-task-{}", worker, n),
                task_name: "scraping.scrape_account".to_string(),
                queue: "scraping".to_string(),
                started_at: chrono::Utc::now(),
            })
            .collect();
        self.active.lock().unwrap().insert(worker.to_string(), entries);
    }

    pub fn set_queue_length(&self, queue: &str, length: u64) {
        self.queue_lengths
            .lock()
            .unwrap()
            .insert(queue.to_string(), length);
    }

    fn check_online(&self) -> Result<(), BrokerError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn submit(
        &self,
        task_name: &str,
        args: JsonValue,
        queue: &str,
    ) -> Result<String, BrokerError> {
        self.check_online()?;
        let execution_id = format!("exec-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.submissions.lock().unwrap().push(Submission {
            execution_id: execution_id.clone(),
            task_name: task_name.to_string(),
            args,
            queue: queue.to_string(),
        });
        Ok(execution_id)
    }

    async fn revoke(&self, execution_id: &str) -> Result<bool, BrokerError> {
        self.check_online()?;
        self.revoked.lock().unwrap().push(execution_id.to_string());
        Ok(true)
    }

    async fn inspect_active(&self) -> Result<BTreeMap<String, Vec<ActiveTask>>, BrokerError> {
        self.check_online()?;
        Ok(self.active.lock().unwrap().clone())
    }

    async fn inspect_registered(&self) -> Result<BTreeMap<String, WorkerInfo>, BrokerError> {
        self.check_online()?;
        Ok(self.registered.lock().unwrap().clone())
    }

    async fn queue_length(&self, queue: &str) -> Result<u64, BrokerError> {
        self.check_online()?;
        Ok(self
            .queue_lengths
            .lock()
            .unwrap()
            .get(queue)
            .copied()
            .unwrap_or(0))
    }
}

/// Retry policy with deterministic delays.
pub fn test_retry_policy() -> RetryPolicy {
    RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(3600), 0.0)
}

/// Store, broker double and lifecycle manager over one in-memory database.
pub struct Harness {
    pub db: DatabaseConnection,
    pub jobs: Arc<JobRepository>,
    pub broker: Arc<RecordingBroker>,
    pub manager: JobLifecycleManager,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        let db = setup_test_db().await?;
        let jobs = Arc::new(JobRepository::new(db.clone()));
        let broker = Arc::new(RecordingBroker::new());
        let manager = JobLifecycleManager::new(jobs.clone(), broker.clone(), test_retry_policy());
        Ok(Self {
            db,
            jobs,
            broker,
            manager,
        })
    }

    pub async fn submit_scrape(&self, account_id: i64) -> Result<Uuid> {
        let job = self
            .manager
            .submit(SubmitJob::new(
                "scrape_one",
                json!({ "account_id": account_id }),
            ))
            .await?;
        Ok(job.id)
    }

    pub async fn status(&self, job_id: Uuid) -> Result<JobStatus> {
        let job = self
            .jobs
            .find(job_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("job {} missing", job_id))?;
        Ok(job.status)
    }

    /// Clears retry backoff so a retried job is immediately dispatchable.
    pub async fn expire_backoff(&self, job_id: Uuid) -> Result<()> {
        let changes = ActiveModel {
            not_before: Set(None),
            ..Default::default()
        };
        self.jobs
            .transition(
                job_id,
                &TransitionGuard::status_in(&[JobStatus::Pending]),
                changes,
            )
            .await?;
        Ok(())
    }

    /// Moves a scheduled job's run time into the past.
    pub async fn make_due(&self, job_id: Uuid) -> Result<()> {
        let changes = ActiveModel {
            scheduled_for: Set(Some((chrono::Utc::now() - chrono::Duration::seconds(1)).fixed_offset())),
            ..Default::default()
        };
        self.jobs
            .transition(
                job_id,
                &TransitionGuard::status_in(&[JobStatus::Scheduled]),
                changes,
            )
            .await?;
        Ok(())
    }
}
