//! In-process broker backed by tokio tasks.
//!
//! Named workers share a semaphore sized `workers * concurrency`. Each
//! submission spawns the registered [`TaskHandler`] for its task name and
//! reports a [`TaskOutcome`] on the outcome channel when it finishes.
//! Revoked tasks are aborted and report nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex, RwLock, Semaphore, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{ActiveTask, Broker, BrokerError, TaskOutcome, WorkerInfo};
use crate::config::BrokerConfig;
use crate::error::ExecutionError;
use crate::telemetry::{ExecutionContext, with_execution_context};

/// Executes the work behind one task name.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, args: JsonValue) -> Result<JsonValue, ExecutionError>;
}

struct TrackedTask {
    task_name: String,
    queue: String,
    worker: String,
    started_at: Option<DateTime<Utc>>,
    abort: AbortHandle,
}

type TaskTable = Arc<Mutex<HashMap<String, TrackedTask>>>;

/// Tokio-based broker for single-process deployments and tests.
pub struct LocalBroker {
    workers: Vec<String>,
    queues: Vec<String>,
    concurrency: u32,
    next_worker: AtomicUsize,
    semaphore: Arc<Semaphore>,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    tasks: TaskTable,
    outcomes: mpsc::UnboundedSender<TaskOutcome>,
    closed: AtomicBool,
}

impl LocalBroker {
    /// Creates a broker serving `queues` and the receiver its outcomes arrive on.
    pub fn new(
        config: &BrokerConfig,
        queues: Vec<String>,
    ) -> (Self, mpsc::UnboundedReceiver<TaskOutcome>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let workers = (1..=config.workers.max(1))
            .map(|n| format!("local-worker-{}", n))
            .collect::<Vec<_>>();
        let permits = workers.len() * config.worker_concurrency.max(1) as usize;

        let broker = Self {
            workers,
            queues,
            concurrency: config.worker_concurrency.max(1),
            next_worker: AtomicUsize::new(0),
            semaphore: Arc::new(Semaphore::new(permits)),
            handlers: RwLock::new(HashMap::new()),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            outcomes: tx,
            closed: AtomicBool::new(false),
        };
        (broker, rx)
    }

    /// Registers the handler executed for `task_name`, replacing any previous one.
    pub async fn register<H>(&self, task_name: &str, handler: H)
    where
        H: TaskHandler + 'static,
    {
        self.handlers
            .write()
            .await
            .insert(task_name.to_string(), Arc::new(handler));
        debug!(task_name, "task handler registered");
    }

    /// Stops accepting work; queued tasks that have not started are failed.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.semaphore.close();
        info!("local broker closed");
    }

    fn assign_worker(&self) -> String {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        self.workers[index].clone()
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn submit(
        &self,
        task_name: &str,
        args: JsonValue,
        queue: &str,
    ) -> Result<String, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("local broker is closed".to_string()));
        }
        if !self.queues.iter().any(|q| q == queue) {
            return Err(BrokerError::Rejected {
                task_name: task_name.to_string(),
                reason: format!("queue '{}' is not served", queue),
            });
        }

        let execution_id = Uuid::new_v4().to_string();
        let handler = self.handlers.read().await.get(task_name).cloned();
        let worker = self.assign_worker();
        let job_id = args
            .get("job_id")
            .and_then(JsonValue::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok());

        // Held across spawn so the task cannot observe the table before its entry exists.
        let mut table = self.tasks.lock().await;

        let run = {
            let semaphore = self.semaphore.clone();
            let tasks = self.tasks.clone();
            let execution_id = execution_id.clone();
            let task_name = task_name.to_string();
            let args = args.clone();
            tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return Err(ExecutionError::transient("broker closed before task started"));
                };
                if let Some(task) = tasks.lock().await.get_mut(&execution_id) {
                    task.started_at = Some(Utc::now());
                }

                let Some(handler) = handler else {
                    return Err(ExecutionError::permanent(format!(
                        "no handler registered for task {}",
                        task_name
                    ))
                    .with_category("unknown_task"));
                };

                match job_id {
                    Some(job_id) => {
                        let context = ExecutionContext {
                            job_id,
                            execution_id: execution_id.clone(),
                        };
                        with_execution_context(context, handler.run(args)).await
                    }
                    None => handler.run(args).await,
                }
            })
        };

        table.insert(
            execution_id.clone(),
            TrackedTask {
                task_name: task_name.to_string(),
                queue: queue.to_string(),
                worker: worker.clone(),
                started_at: None,
                abort: run.abort_handle(),
            },
        );
        drop(table);

        let tasks = self.tasks.clone();
        let outcomes = self.outcomes.clone();
        let outcome_id = execution_id.clone();
        let outcome_task = task_name.to_string();
        tokio::spawn(async move {
            let result = match run.await {
                Ok(result) => Some(result),
                Err(err) if err.is_cancelled() => None,
                Err(err) => Some(Err(ExecutionError::permanent(format!(
                    "task panicked: {}",
                    err
                )))),
            };
            tasks.lock().await.remove(&outcome_id);

            if let Some(result) = result {
                let outcome = TaskOutcome {
                    execution_id: outcome_id,
                    task_name: outcome_task,
                    args,
                    result,
                };
                if outcomes.send(outcome).is_err() {
                    warn!("task outcome dropped; no receiver");
                }
            }
        });

        debug!(
            execution_id = %execution_id,
            task_name,
            queue,
            worker = %worker,
            "task submitted"
        );
        Ok(execution_id)
    }

    async fn revoke(&self, execution_id: &str) -> Result<bool, BrokerError> {
        match self.tasks.lock().await.remove(execution_id) {
            Some(task) => {
                task.abort.abort();
                info!(execution_id, task_name = %task.task_name, "task revoked");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn inspect_active(&self) -> Result<BTreeMap<String, Vec<ActiveTask>>, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("local broker is closed".to_string()));
        }

        let mut active: BTreeMap<String, Vec<ActiveTask>> = BTreeMap::new();
        for (execution_id, task) in self.tasks.lock().await.iter() {
            if let Some(started_at) = task.started_at {
                active.entry(task.worker.clone()).or_default().push(ActiveTask {
                    execution_id: execution_id.clone(),
                    task_name: task.task_name.clone(),
                    queue: task.queue.clone(),
                    started_at,
                });
            }
        }
        Ok(active)
    }

    async fn inspect_registered(&self) -> Result<BTreeMap<String, WorkerInfo>, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("local broker is closed".to_string()));
        }

        let mut registered_tasks: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        registered_tasks.sort();

        Ok(self
            .workers
            .iter()
            .map(|name| {
                (
                    name.clone(),
                    WorkerInfo {
                        queues: self.queues.clone(),
                        concurrency: self.concurrency,
                        registered_tasks: registered_tasks.clone(),
                    },
                )
            })
            .collect())
    }

    async fn queue_length(&self, queue: &str) -> Result<u64, BrokerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("local broker is closed".to_string()));
        }

        Ok(self
            .tasks
            .lock()
            .await
            .values()
            .filter(|task| task.queue == queue)
            .count() as u64)
    }
}
