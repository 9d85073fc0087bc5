//! # Checkpoint Repository
//!
//! Durable [`CheckpointStore`] over the `checkpoint_entries` table. Entries
//! outlive the process; expiry is checked on read and swept by
//! `purge_expired`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use serde_json::Value as JsonValue;

use crate::checkpoint::{CheckpointStore, CheckpointStoreError};
use crate::models::checkpoint_entry::{ActiveModel, Column, Entity};

impl From<DbErr> for CheckpointStoreError {
    fn from(err: DbErr) -> Self {
        CheckpointStoreError::Unavailable(err.to_string())
    }
}

/// SeaORM-backed checkpoint store
#[derive(Clone)]
pub struct CheckpointRepository {
    db: DatabaseConnection,
}

impl CheckpointRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CheckpointStore for CheckpointRepository {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CheckpointStoreError> {
        let Some(entry) = Entity::find_by_id(key.to_string()).one(&self.db).await? else {
            return Ok(None);
        };

        if entry.expires_at.with_timezone(&Utc) <= Utc::now() {
            Entity::delete_by_id(key.to_string()).exec(&self.db).await?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Duration,
    ) -> Result<(), CheckpointStoreError> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CheckpointStoreError::Corrupt(format!("invalid ttl: {}", e)))?;

        let entry = ActiveModel {
            key: Set(key.to_string()),
            value: Set(value),
            expires_at: Set((now + ttl).fixed_offset()),
            updated_at: Set(now.fixed_offset()),
        };
        Entity::insert(entry)
            .on_conflict(
                OnConflict::column(Column::Key)
                    .update_columns([Column::Value, Column::ExpiresAt, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CheckpointStoreError> {
        let result = Entity::delete_by_id(key.to_string()).exec(&self.db).await?;
        Ok(result.rows_affected > 0)
    }

    async fn purge_expired(&self) -> Result<u64, CheckpointStoreError> {
        let result = Entity::delete_many()
            .filter(Column::ExpiresAt.lte(Utc::now().fixed_offset()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use serde_json::json;

    async fn setup() -> CheckpointRepository {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        CheckpointRepository::new(db)
    }

    #[tokio::test]
    async fn set_upserts_and_get_reads_back() {
        let store = setup().await;
        let ttl = Duration::from_secs(60);
        store.set("checkpoint:a:cursor", json!({"page": 1}), ttl).await.unwrap();
        store.set("checkpoint:a:cursor", json!({"page": 2}), ttl).await.unwrap();

        assert_eq!(
            store.get("checkpoint:a:cursor").await.unwrap(),
            Some(json!({"page": 2}))
        );
        assert!(store.delete("checkpoint:a:cursor").await.unwrap());
        assert!(!store.delete("checkpoint:a:cursor").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent_and_are_purged() {
        let store = setup().await;
        store.set("stale", json!(1), Duration::ZERO).await.unwrap();
        store.set("other-stale", json!(2), Duration::ZERO).await.unwrap();
        store.set("fresh", json!(3), Duration::from_secs(60)).await.unwrap();

        assert_eq!(store.get("stale").await.unwrap(), None);
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert_eq!(store.get("fresh").await.unwrap(), Some(json!(3)));
    }
}
