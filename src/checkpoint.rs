//! # Checkpoint & Resume
//!
//! Named partial-progress snapshots for long-running jobs. Checkpoints live
//! in a TTL key/value store keyed `checkpoint:{job_id}:{name}`; when that
//! store rejects a write they are embedded into the job's `result` under
//! `checkpoints[name]`. Loads consult both locations and return the most
//! recently saved copy.
//!
//! The durable store is [`crate::repositories::CheckpointRepository`].
//! [`InMemoryCheckpointStore`] keeps entries for the life of the process
//! only and refuses writes once full, so the fallback still catches them.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::OrchestratorError;
use crate::repositories::JobStore;
use crate::repositories::job::embedded_checkpoint;

const MAX_NAME_LEN: usize = 128;

/// Errors raised by a checkpoint store backend.
#[derive(Debug, Error)]
pub enum CheckpointStoreError {
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    #[error("checkpoint entry is corrupt: {0}")]
    Corrupt(String),
    #[error("checkpoint store is full ({capacity} live entries)")]
    Full { capacity: usize },
}

/// Key/value store with per-entry TTL.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CheckpointStoreError>;

    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Duration,
    ) -> Result<(), CheckpointStoreError>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, CheckpointStoreError>;

    /// Drops expired entries, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64, CheckpointStoreError> {
        Ok(0)
    }
}

struct StoreEntry {
    value: JsonValue,
    expires_at: Instant,
}

/// Bounded in-process checkpoint store. Entries expire lazily on access.
/// A write that would push out a live entry is refused with
/// [`CheckpointStoreError::Full`] instead of evicting it.
pub struct InMemoryCheckpointStore {
    entries: Mutex<LruCache<String, StoreEntry>>,
}

impl InMemoryCheckpointStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn drop_expired(entries: &mut LruCache<String, StoreEntry>, now: Instant) -> u64 {
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len() as u64
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>, CheckpointStoreError> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: JsonValue,
        ttl: Duration,
    ) -> Result<(), CheckpointStoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if !entries.contains(key) && entries.len() >= entries.cap().get() {
            Self::drop_expired(&mut entries, now);
            if entries.len() >= entries.cap().get() {
                return Err(CheckpointStoreError::Full {
                    capacity: entries.cap().get(),
                });
            }
        }

        let entry = StoreEntry {
            value,
            expires_at: now + ttl,
        };
        entries.put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CheckpointStoreError> {
        Ok(self.entries.lock().await.pop(key).is_some())
    }

    async fn purge_expired(&self) -> Result<u64, CheckpointStoreError> {
        let mut entries = self.entries.lock().await;
        Ok(Self::drop_expired(&mut entries, Instant::now()))
    }
}

/// Where a loaded checkpoint came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    Store,
    Embedded,
}

/// A named snapshot of a job's partial progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Checkpoint {
    pub job_id: Uuid,
    pub name: String,
    pub payload: JsonValue,
    pub saved_at: DateTime<Utc>,
    pub source: CheckpointSource,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCheckpoint {
    payload: JsonValue,
    saved_at: DateTime<Utc>,
}

impl StoredCheckpoint {
    fn from_value(value: &JsonValue) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

pub fn checkpoint_key(job_id: Uuid, name: &str) -> String {
    format!("checkpoint:{}:{}", job_id, name)
}

/// Saves, loads and deletes checkpoints across the store and the job record.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    jobs: Arc<dyn JobStore>,
    ttl: Duration,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, jobs: Arc<dyn JobStore>, ttl: Duration) -> Self {
        Self { store, jobs, ttl }
    }

    /// Upserts a checkpoint. Falls back to embedding in the job record when
    /// the store rejects the write.
    pub async fn save(
        &self,
        job_id: Uuid,
        name: &str,
        payload: JsonValue,
    ) -> Result<Checkpoint, OrchestratorError> {
        validate_name(name)?;
        if self.jobs.find(job_id).await?.is_none() {
            return Err(OrchestratorError::JobNotFound { id: job_id });
        }

        let saved_at = Utc::now();
        let entry = json!({ "payload": payload, "saved_at": saved_at });
        let key = checkpoint_key(job_id, name);

        let source = match self.store.set(&key, entry.clone(), self.ttl).await {
            Ok(()) => CheckpointSource::Store,
            Err(err) => {
                warn!(
                    job_id = %job_id,
                    checkpoint = name,
                    error = %err,
                    "checkpoint store write failed; embedding checkpoint in job record"
                );
                metrics::counter!("checkpoint_fallback_total").increment(1);
                if !self.jobs.embed_checkpoint(job_id, name, entry).await? {
                    return Err(OrchestratorError::JobNotFound { id: job_id });
                }
                CheckpointSource::Embedded
            }
        };

        debug!(job_id = %job_id, checkpoint = name, source = ?source, "checkpoint saved");

        Ok(Checkpoint {
            job_id,
            name: name.to_string(),
            payload,
            saved_at,
            source,
        })
    }

    /// Most recently saved copy across the store and the job record.
    pub async fn load(
        &self,
        job_id: Uuid,
        name: &str,
    ) -> Result<Option<Checkpoint>, OrchestratorError> {
        validate_name(name)?;

        let from_store = match self.store.get(&checkpoint_key(job_id, name)).await {
            Ok(Some(value)) => match StoredCheckpoint::from_value(&value) {
                Some(stored) => Some(stored),
                None => {
                    warn!(job_id = %job_id, checkpoint = name, "ignoring corrupt checkpoint entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(
                    job_id = %job_id,
                    checkpoint = name,
                    error = %err,
                    "checkpoint store read failed; using job record only"
                );
                None
            }
        };

        let embedded = self
            .jobs
            .find(job_id)
            .await?
            .and_then(|job| {
                embedded_checkpoint(job.result.as_ref(), name).and_then(StoredCheckpoint::from_value)
            });

        let newest = match (from_store, embedded) {
            (Some(store), Some(embedded)) if embedded.saved_at > store.saved_at => {
                Some((embedded, CheckpointSource::Embedded))
            }
            (Some(store), _) => Some((store, CheckpointSource::Store)),
            (None, Some(embedded)) => Some((embedded, CheckpointSource::Embedded)),
            (None, None) => None,
        };

        Ok(newest.map(|(stored, source)| Checkpoint {
            job_id,
            name: name.to_string(),
            payload: stored.payload,
            saved_at: stored.saved_at,
            source,
        }))
    }

    /// Payload to resume from. Never changes the job's status.
    pub async fn resume(
        &self,
        job_id: Uuid,
        name: &str,
    ) -> Result<Option<JsonValue>, OrchestratorError> {
        Ok(self.load(job_id, name).await?.map(|checkpoint| checkpoint.payload))
    }

    /// Removes a checkpoint from both locations. Returns whether any copy existed.
    pub async fn delete(&self, job_id: Uuid, name: &str) -> Result<bool, OrchestratorError> {
        validate_name(name)?;

        let from_store = match self.store.delete(&checkpoint_key(job_id, name)).await {
            Ok(existed) => existed,
            Err(err) => {
                warn!(job_id = %job_id, checkpoint = name, error = %err, "checkpoint store delete failed");
                false
            }
        };
        let embedded = self.jobs.remove_embedded_checkpoint(job_id, name).await?;

        Ok(from_store || embedded)
    }

    /// Sweeps expired entries from the store. Failures are logged, not raised.
    pub async fn purge_expired(&self) -> u64 {
        match self.store.purge_expired().await {
            Ok(purged) => {
                if purged > 0 {
                    debug!(purged, "expired checkpoints purged");
                }
                purged
            }
            Err(err) => {
                warn!(error = %err, "checkpoint purge failed");
                0
            }
        }
    }
}

fn validate_name(name: &str) -> Result<(), OrchestratorError> {
    if name.trim().is_empty() {
        return Err(OrchestratorError::invalid_field(
            "name",
            "checkpoint name cannot be empty",
        ));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(OrchestratorError::invalid_field(
            "name",
            format!("checkpoint name exceeds {} bytes", MAX_NAME_LEN),
        ));
    }
    Ok(())
}
