//! # Job Repository
//!
//! Persistence for the `jobs` table. Every state-changing write is a
//! conditional `UPDATE ... WHERE id = ? AND status IN (...)`, so concurrent
//! writers race on the row and exactly one of them wins. Each write also
//! bumps `revision`; read-modify-write paths compare against it and retry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Condition, Expr, SelectStatement};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, QueryTrait, Set,
};
use serde_json::{Map, Value as JsonValue, json};
use uuid::Uuid;

use crate::cursor::CursorData;
use crate::error::OrchestratorError;
use crate::models::job::{ActiveModel, Column, Entity, JobKind, JobStatus, Model};

/// Key inside `jobs.result` holding embedded checkpoints.
pub const EMBEDDED_CHECKPOINTS_KEY: &str = "checkpoints";

/// Attempts a read-modify-write makes before reporting `ConcurrentUpdate`.
pub const MAX_WRITE_ATTEMPTS: usize = 8;

/// Optional filters for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobKind>,
    pub queue: Option<String>,
    pub paused: Option<bool>,
}

/// Preconditions a conditional update must observe on the stored row.
#[derive(Debug, Clone, Default)]
pub struct TransitionGuard {
    pub statuses: Vec<JobStatus>,
    pub paused: Option<bool>,
    pub progress_at_most: Option<f64>,
    /// Row must not have been written since this revision was read.
    pub revision: Option<i64>,
}

impl TransitionGuard {
    pub fn status_in(statuses: &[JobStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = Some(paused);
        self
    }

    pub fn progress_at_most(mut self, progress: f64) -> Self {
        self.progress_at_most = Some(progress);
        self
    }

    pub fn at_revision(mut self, revision: i64) -> Self {
        self.revision = Some(revision);
        self
    }
}

/// Point-in-time aggregate counts used by the backlog monitor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub scheduled: u64,
    pub pending_by_priority: BTreeMap<i16, u64>,
    pub pending_by_queue: BTreeMap<String, u64>,
    pub running_by_queue: BTreeMap<String, u64>,
}

/// Job Store contract consumed by the orchestration components.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: ActiveModel) -> Result<Model, OrchestratorError>;

    async fn find(&self, id: Uuid) -> Result<Option<Model>, OrchestratorError>;

    async fn find_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Option<Model>, OrchestratorError>;

    /// Newest-first page of jobs strictly after `after`.
    async fn list(
        &self,
        filter: &JobFilter,
        after: Option<&CursorData>,
        limit: u64,
    ) -> Result<Vec<Model>, OrchestratorError>;

    /// Applies `changes` only if the stored row satisfies `guard`.
    /// Returns the updated row, or `None` when the guard did not match.
    /// A status change that is not a lifecycle edge from every guarded
    /// status is rejected with `IllegalTransition` before touching the row.
    async fn transition(
        &self,
        id: Uuid,
        guard: &TransitionGuard,
        changes: ActiveModel,
    ) -> Result<Option<Model>, OrchestratorError>;

    /// Pending or scheduled jobs waiting on `prerequisite`.
    async fn dependents_of(&self, prerequisite: Uuid) -> Result<Vec<Model>, OrchestratorError>;

    /// Unpaused dependents whose prerequisite completed and that are
    /// otherwise ready at `now`: pending past any backoff, or scheduled and
    /// due. Permanently blocked dependents are never returned.
    async fn waiting_dependents(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, OrchestratorError>;

    /// Unpaused pending jobs whose backoff elapsed and whose prerequisite,
    /// if any, completed; ordered by priority then age.
    async fn dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, OrchestratorError>;

    /// Scheduled jobs whose dispatch time has been reached and whose
    /// prerequisite, if any, completed.
    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, OrchestratorError>;

    async fn counts(&self) -> Result<JobCounts, OrchestratorError>;

    async fn running_in_queue(&self, queue: &str) -> Result<u64, OrchestratorError>;

    /// Completed or failed jobs whose `completed_at` is at or after `since`.
    async fn finished_since(&self, since: DateTime<Utc>) -> Result<Vec<Model>, OrchestratorError>;

    /// Writes `entry` under `result.checkpoints[name]`. Returns `false` when
    /// the job does not exist.
    async fn embed_checkpoint(
        &self,
        id: Uuid,
        name: &str,
        entry: JsonValue,
    ) -> Result<bool, OrchestratorError>;

    /// Removes `result.checkpoints[name]`. Returns whether an entry existed.
    async fn remove_embedded_checkpoint(
        &self,
        id: Uuid,
        name: &str,
    ) -> Result<bool, OrchestratorError>;
}

/// SeaORM-backed Job Store
#[derive(Clone)]
pub struct JobRepository {
    db: DatabaseConnection,
}

impl JobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Rewrites `result` as a JSON object, retrying when another writer got
    /// in between. `edit` returns false to leave the row untouched.
    /// Returns `None` when the job does not exist.
    async fn update_result<F>(&self, id: Uuid, mut edit: F) -> Result<Option<bool>, OrchestratorError>
    where
        F: FnMut(&mut Map<String, JsonValue>) -> bool + Send,
    {
        for _ in 0..MAX_WRITE_ATTEMPTS {
            let Some(job) = self.find(id).await? else {
                return Ok(None);
            };

            let mut result = into_object(job.result);
            if !edit(&mut result) {
                return Ok(Some(false));
            }

            let changes = ActiveModel {
                result: Set(Some(JsonValue::Object(result))),
                updated_at: Set(Utc::now().fixed_offset()),
                ..Default::default()
            };
            let applied = Entity::update_many()
                .set(changes)
                .col_expr(Column::Revision, Expr::col(Column::Revision).add(1))
                .filter(Column::Id.eq(id))
                .filter(Column::Revision.eq(job.revision))
                .exec(&self.db)
                .await?;
            if applied.rows_affected > 0 {
                return Ok(Some(true));
            }
            tracing::debug!(job_id = %id, revision = job.revision, "result changed concurrently; retrying");
        }

        Err(OrchestratorError::ConcurrentUpdate {
            id,
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }
}

fn waiting_statuses() -> [JobStatus; 2] {
    [JobStatus::Pending, JobStatus::Scheduled]
}

fn completed_ids() -> SelectStatement {
    Entity::find()
        .select_only()
        .column(Column::Id)
        .filter(Column::Status.eq(JobStatus::Completed))
        .into_query()
}

/// No prerequisite, or a completed one.
fn dependency_satisfied() -> Condition {
    Condition::any()
        .add(Column::DependsOn.is_null())
        .add(Column::DependsOn.in_subquery(completed_ids()))
}

fn backoff_elapsed(now: DateTimeWithTimeZone) -> Condition {
    Condition::any()
        .add(Column::NotBefore.is_null())
        .add(Column::NotBefore.lte(now))
}

#[async_trait]
impl JobStore for JobRepository {
    async fn insert(&self, job: ActiveModel) -> Result<Model, OrchestratorError> {
        let model = job.insert(&self.db).await.map_err(|e| {
            tracing::error!(error = %e, "failed to insert job");
            e
        })?;
        Ok(model)
    }

    async fn find(&self, id: Uuid) -> Result<Option<Model>, OrchestratorError> {
        Ok(Entity::find_by_id(id).one(&self.db).await?)
    }

    async fn find_by_execution_id(
        &self,
        execution_id: &str,
    ) -> Result<Option<Model>, OrchestratorError> {
        Ok(Entity::find()
            .filter(Column::ExecutionId.eq(execution_id))
            .one(&self.db)
            .await?)
    }

    async fn list(
        &self,
        filter: &JobFilter,
        after: Option<&CursorData>,
        limit: u64,
    ) -> Result<Vec<Model>, OrchestratorError> {
        let mut query = Entity::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id);

        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status));
        }
        if let Some(kind) = filter.job_type {
            query = query.filter(Column::JobType.eq(kind));
        }
        if let Some(queue) = &filter.queue {
            query = query.filter(Column::Queue.eq(queue.as_str()));
        }
        if let Some(paused) = filter.paused {
            query = query.filter(Column::Paused.eq(paused));
        }
        if let Some(cursor) = after {
            let created_at = cursor.created_at.fixed_offset();
            query = query.filter(
                Condition::any()
                    .add(Column::CreatedAt.lt(created_at))
                    .add(
                        Condition::all()
                            .add(Column::CreatedAt.eq(created_at))
                            .add(Column::Id.lt(cursor.id)),
                    ),
            );
        }

        Ok(query.limit(limit).all(&self.db).await?)
    }

    async fn transition(
        &self,
        id: Uuid,
        guard: &TransitionGuard,
        mut changes: ActiveModel,
    ) -> Result<Option<Model>, OrchestratorError> {
        if let ActiveValue::Set(to) = &changes.status {
            let to = *to;
            if let Some(from) = guard
                .statuses
                .iter()
                .copied()
                .find(|from| !from.can_transition_to(to))
            {
                return Err(OrchestratorError::IllegalTransition { id, from, to });
            }
        }
        changes.updated_at = Set(Utc::now().fixed_offset());

        let mut update = Entity::update_many()
            .set(changes)
            .col_expr(Column::Revision, Expr::col(Column::Revision).add(1))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.is_in(guard.statuses.iter().copied()));

        if let Some(paused) = guard.paused {
            update = update.filter(Column::Paused.eq(paused));
        }
        if let Some(progress) = guard.progress_at_most {
            update = update.filter(Column::Progress.lte(progress));
        }
        if let Some(revision) = guard.revision {
            update = update.filter(Column::Revision.eq(revision));
        }

        let result = update.exec(&self.db).await?;
        if result.rows_affected == 0 {
            return Ok(None);
        }

        self.find(id).await
    }

    async fn dependents_of(&self, prerequisite: Uuid) -> Result<Vec<Model>, OrchestratorError> {
        Ok(Entity::find()
            .filter(Column::DependsOn.eq(prerequisite))
            .filter(Column::Status.is_in(waiting_statuses()))
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    async fn waiting_dependents(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, OrchestratorError> {
        let now = now.fixed_offset();
        Ok(Entity::find()
            .filter(Column::DependsOn.in_subquery(completed_ids()))
            .filter(Column::Paused.eq(false))
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(Column::Status.eq(JobStatus::Pending))
                            .add(backoff_elapsed(now)),
                    )
                    .add(
                        Condition::all()
                            .add(Column::Status.eq(JobStatus::Scheduled))
                            .add(Column::ScheduledFor.lte(now)),
                    ),
            )
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    async fn dispatchable(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, OrchestratorError> {
        let now = now.fixed_offset();
        Ok(Entity::find()
            .filter(Column::Status.eq(JobStatus::Pending))
            .filter(Column::Paused.eq(false))
            .filter(backoff_elapsed(now))
            .filter(dependency_satisfied())
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    async fn due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<Model>, OrchestratorError> {
        Ok(Entity::find()
            .filter(Column::Status.eq(JobStatus::Scheduled))
            .filter(Column::ScheduledFor.lte(now.fixed_offset()))
            .filter(dependency_satisfied())
            .order_by_asc(Column::ScheduledFor)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    async fn counts(&self) -> Result<JobCounts, OrchestratorError> {
        let rows = Entity::find()
            .select_only()
            .column(Column::Status)
            .column(Column::Queue)
            .column_as(Expr::col(Column::Id).count(), "count")
            .filter(Column::Status.is_in([
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Scheduled,
            ]))
            .group_by(Column::Status)
            .group_by(Column::Queue)
            .into_tuple::<(JobStatus, String, i64)>()
            .all(&self.db)
            .await?;

        let mut counts = JobCounts::default();
        for (status, queue, count) in rows {
            let count = count.max(0) as u64;
            match status {
                JobStatus::Pending => {
                    counts.pending += count;
                    *counts.pending_by_queue.entry(queue).or_default() += count;
                }
                JobStatus::Running => {
                    counts.running += count;
                    *counts.running_by_queue.entry(queue).or_default() += count;
                }
                JobStatus::Scheduled => counts.scheduled += count,
                _ => {}
            }
        }

        let by_priority = Entity::find()
            .select_only()
            .column(Column::Priority)
            .column_as(Expr::col(Column::Id).count(), "count")
            .filter(Column::Status.eq(JobStatus::Pending))
            .group_by(Column::Priority)
            .into_tuple::<(i16, i64)>()
            .all(&self.db)
            .await?;
        counts.pending_by_priority = by_priority
            .into_iter()
            .map(|(priority, count)| (priority, count.max(0) as u64))
            .collect();

        Ok(counts)
    }

    async fn running_in_queue(&self, queue: &str) -> Result<u64, OrchestratorError> {
        use sea_orm::PaginatorTrait;

        Ok(Entity::find()
            .filter(Column::Queue.eq(queue))
            .filter(Column::Status.eq(JobStatus::Running))
            .count(&self.db)
            .await?)
    }

    async fn finished_since(&self, since: DateTime<Utc>) -> Result<Vec<Model>, OrchestratorError> {
        Ok(Entity::find()
            .filter(Column::Status.is_in([JobStatus::Completed, JobStatus::Failed]))
            .filter(Column::CompletedAt.gte(since.fixed_offset()))
            .order_by_asc(Column::CompletedAt)
            .all(&self.db)
            .await?)
    }

    async fn embed_checkpoint(
        &self,
        id: Uuid,
        name: &str,
        entry: JsonValue,
    ) -> Result<bool, OrchestratorError> {
        let written = self
            .update_result(id, |result| {
                let checkpoints = result
                    .entry(EMBEDDED_CHECKPOINTS_KEY.to_string())
                    .or_insert_with(|| json!({}));
                if !checkpoints.is_object() {
                    *checkpoints = json!({});
                }
                if let Some(map) = checkpoints.as_object_mut() {
                    map.insert(name.to_string(), entry.clone());
                }
                true
            })
            .await?;
        Ok(written.is_some())
    }

    async fn remove_embedded_checkpoint(
        &self,
        id: Uuid,
        name: &str,
    ) -> Result<bool, OrchestratorError> {
        let removed = self
            .update_result(id, |result| {
                result
                    .get_mut(EMBEDDED_CHECKPOINTS_KEY)
                    .and_then(JsonValue::as_object_mut)
                    .and_then(|map| map.remove(name))
                    .is_some()
            })
            .await?;
        Ok(removed.unwrap_or(false))
    }
}

/// Normalizes a stored result into a JSON object, keeping a non-object
/// payload under `value`.
pub fn into_object(result: Option<JsonValue>) -> Map<String, JsonValue> {
    match result {
        Some(JsonValue::Object(map)) => map,
        Some(JsonValue::Null) | None => Map::new(),
        Some(other) => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// Embedded checkpoint entry `name`, if present in `result`.
pub fn embedded_checkpoint<'a>(result: Option<&'a JsonValue>, name: &str) -> Option<&'a JsonValue> {
    result?
        .get(EMBEDDED_CHECKPOINTS_KEY)?
        .as_object()?
        .get(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobKind;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> JobRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        JobRepository::new(db)
    }

    fn pending(kind: JobKind, priority: i16) -> ActiveModel {
        let now = Utc::now().fixed_offset();
        ActiveModel {
            id: Set(Uuid::new_v4()),
            execution_id: Set(None),
            job_type: Set(kind),
            queue: Set(kind.queue().to_string()),
            params: Set(json!({})),
            status: Set(JobStatus::Pending),
            paused: Set(false),
            priority: Set(priority),
            progress: Set(0.0),
            depends_on: Set(None),
            sla_budget_seconds: Set(None),
            scheduled_for: Set(None),
            not_before: Set(None),
            retry_count: Set(0),
            max_retries: Set(3),
            result: Set(None),
            error: Set(None),
            last_error: Set(None),
            revision: Set(0),
            created_at: Set(now),
            started_at: Set(None),
            completed_at: Set(None),
            updated_at: Set(now),
        }
    }

    #[tokio::test]
    async fn transition_only_applies_when_guard_matches() {
        let repo = setup().await;
        let job = repo.insert(pending(JobKind::ScrapeAll, 5)).await.unwrap();

        let claim = ActiveModel {
            status: Set(JobStatus::Running),
            ..Default::default()
        };
        let guard = TransitionGuard::status_in(&[JobStatus::Pending]).paused(false);

        let first = repo.transition(job.id, &guard, claim.clone()).await.unwrap();
        assert_eq!(first.map(|j| j.status), Some(JobStatus::Running));

        let second = repo.transition(job.id, &guard, claim).await.unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn transition_rejects_edges_outside_the_state_machine() {
        let repo = setup().await;
        let job = repo.insert(pending(JobKind::ScrapeAll, 5)).await.unwrap();

        let reopen = ActiveModel {
            status: Set(JobStatus::Completed),
            ..Default::default()
        };
        let err = repo
            .transition(job.id, &TransitionGuard::status_in(&[JobStatus::Pending]), reopen)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::IllegalTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed,
                ..
            }
        ));
        assert_eq!(repo.find(job.id).await.unwrap().unwrap().revision, 0);
    }

    #[tokio::test]
    async fn every_write_bumps_revision() {
        let repo = setup().await;
        let job = repo.insert(pending(JobKind::ScrapeAll, 5)).await.unwrap();
        assert_eq!(job.revision, 0);

        let pause = ActiveModel {
            paused: Set(true),
            ..Default::default()
        };
        let guard = TransitionGuard::status_in(&[JobStatus::Pending]).at_revision(0);
        let paused = repo.transition(job.id, &guard, pause.clone()).await.unwrap().unwrap();
        assert_eq!(paused.revision, 1);

        // A writer still holding revision 0 loses.
        assert!(repo.transition(job.id, &guard, pause).await.unwrap().is_none());

        repo.embed_checkpoint(job.id, "cursor", json!({})).await.unwrap();
        assert_eq!(repo.find(job.id).await.unwrap().unwrap().revision, 2);
    }

    #[tokio::test]
    async fn dispatchable_orders_by_priority_and_skips_paused() {
        let repo = setup().await;
        let low = repo.insert(pending(JobKind::ScrapeAll, 8)).await.unwrap();
        let high = repo.insert(pending(JobKind::ScrapeAll, 1)).await.unwrap();
        let mut paused = pending(JobKind::ScrapeAll, 0);
        paused.paused = Set(true);
        repo.insert(paused).await.unwrap();

        let ids: Vec<Uuid> = repo
            .dispatchable(Utc::now(), 10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![high.id, low.id]);
    }

    #[tokio::test]
    async fn due_scheduled_skips_unsatisfied_dependencies() {
        let repo = setup().await;
        let mut failed = pending(JobKind::ScrapeAll, 5);
        failed.status = Set(JobStatus::Failed);
        let failed = repo.insert(failed).await.unwrap();

        let due = (Utc::now() - chrono::Duration::minutes(5)).fixed_offset();
        let mut blocked = pending(JobKind::ScrapeAll, 5);
        blocked.status = Set(JobStatus::Scheduled);
        blocked.scheduled_for = Set(Some(due));
        blocked.depends_on = Set(Some(failed.id));
        repo.insert(blocked).await.unwrap();

        let mut free = pending(JobKind::ScrapeAll, 5);
        free.status = Set(JobStatus::Scheduled);
        free.scheduled_for = Set(Some(due + chrono::Duration::seconds(1)));
        let free = repo.insert(free).await.unwrap();

        let ids: Vec<Uuid> = repo
            .due_scheduled(Utc::now(), 1)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec![free.id]);
        assert!(repo.waiting_dependents(Utc::now(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedded_checkpoints_survive_other_result_keys() {
        let repo = setup().await;
        let mut active = pending(JobKind::Backfill, 5);
        active.result = Set(Some(json!({"posts": 12})));
        let job = repo.insert(active).await.unwrap();

        assert!(
            repo.embed_checkpoint(job.id, "cursor", json!({"payload": {"page": 3}}))
                .await
                .unwrap()
        );

        let stored = repo.find(job.id).await.unwrap().unwrap();
        assert_eq!(stored.result.as_ref().unwrap()["posts"], 12);
        assert_eq!(
            embedded_checkpoint(stored.result.as_ref(), "cursor").unwrap()["payload"]["page"],
            3
        );

        assert!(repo.remove_embedded_checkpoint(job.id, "cursor").await.unwrap());
        assert!(!repo.remove_embedded_checkpoint(job.id, "cursor").await.unwrap());
        assert!(!repo.embed_checkpoint(Uuid::new_v4(), "x", json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_embeds_keep_every_name() {
        let repo = setup().await;
        let job = repo.insert(pending(JobKind::ScrapeAll, 5)).await.unwrap();

        let mut handles = Vec::new();
        for shard in 0..6 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.embed_checkpoint(job.id, &format!("shard-{}", shard), json!({ "shard": shard }))
                    .await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().unwrap());
        }

        let stored = repo.find(job.id).await.unwrap().unwrap();
        for shard in 0..6 {
            let name = format!("shard-{}", shard);
            assert_eq!(
                embedded_checkpoint(stored.result.as_ref(), &name).unwrap()["shard"],
                shard
            );
        }
    }

    #[tokio::test]
    async fn counts_group_by_status_queue_and_priority() {
        let repo = setup().await;
        repo.insert(pending(JobKind::ScrapeOne, 2)).await.unwrap();
        repo.insert(pending(JobKind::ScrapeOne, 2)).await.unwrap();
        repo.insert(pending(JobKind::Backfill, 7)).await.unwrap();
        let mut running = pending(JobKind::Backfill, 7);
        running.status = Set(JobStatus::Running);
        running.started_at = Set(Some(Utc::now().fixed_offset()));
        repo.insert(running).await.unwrap();

        let counts = repo.counts().await.unwrap();
        assert_eq!(counts.pending, 3);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.pending_by_priority.get(&2), Some(&2));
        assert_eq!(counts.pending_by_queue.get("scraping"), Some(&2));
        assert_eq!(counts.running_by_queue.get("backfill"), Some(&1));
        assert_eq!(repo.running_in_queue("backfill").await.unwrap(), 1);
    }
}
