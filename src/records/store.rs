//! Record store: concurrency-safe collection of records
//!
//! Each record sits behind its own async mutex. Every state transition of a
//! record (artifact write, slot flag, readiness, `notified` test-and-set,
//! metadata save, removal) runs under that mutex, so concurrent producers
//! for the same id are serialized while different ids never wait on each
//! other. The store-wide map lock is only held for lookups, inserts on
//! create, and evictions on remove.
//!
//! Lock order is map then record, and the map lock is never held while
//! waiting on a record lock.

use super::backend::RecordBackend;
use super::recovery::RecoveryLoader;
use super::types::{
    validate_contact_address, validate_id, ArtifactKind, ArtifactPayload, Metadata, Record,
};
use crate::error::{Error, Result};
use crate::notify::{NotificationJob, NotificationQueue};
use bytes::Bytes;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// One record plus its tombstone
struct RecordCell {
    state: Mutex<Record>,
    /// Set under `state` once the record's storage is gone
    removed: AtomicBool,
}

impl RecordCell {
    fn new(record: Record) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(record),
            removed: AtomicBool::new(false),
        })
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

/// Owner of every record, rebuilt from storage at startup
pub struct RecordStore {
    backend: Arc<dyn RecordBackend>,
    records: RwLock<IndexMap<String, Arc<RecordCell>>>,
    notifications: Arc<NotificationQueue>,
}

impl RecordStore {
    /// Recover all persisted records and open the store
    pub async fn open(
        backend: Arc<dyn RecordBackend>,
        notifications: Arc<NotificationQueue>,
    ) -> Result<Self> {
        let recovered = RecoveryLoader::new(backend.clone()).load().await?;
        let records = recovered
            .into_iter()
            .map(|record| (record.id.clone(), RecordCell::new(record)))
            .collect();

        Ok(Self {
            backend,
            records: RwLock::new(records),
            notifications,
        })
    }

    async fn lookup(&self, id: &str) -> Option<Arc<RecordCell>> {
        self.records.read().await.get(id).cloned()
    }

    async fn lookup_or_not_found(&self, id: &str) -> Result<Arc<RecordCell>> {
        self.lookup(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Record '{}' not found", id)))
    }

    /// Create a record, or return the existing one untouched
    pub async fn create(&self, id: &str) -> Result<Record> {
        validate_id(id)?;

        loop {
            let existing = {
                let mut records = self.records.write().await;
                let live = records.get(id).filter(|cell| !cell.is_removed()).cloned();
                match live {
                    Some(cell) => cell,
                    None => {
                        self.backend.create_namespace(id).await?;
                        let record = Record::new(id);
                        // A tombstoned entry is replaced at the end of the order
                        records.shift_remove(id);
                        records.insert(id.to_string(), RecordCell::new(record.clone()));
                        tracing::info!(record_id = %id, "Record created");
                        return Ok(record);
                    }
                }
            };

            let record = existing.state.lock().await;
            if !existing.is_removed() {
                tracing::debug!(record_id = %id, "Record already exists, returning it");
                return Ok(record.clone());
            }
            // Removed while we waited for the lock; the next pass replaces it
        }
    }

    /// Snapshot of one record
    pub async fn get(&self, id: &str) -> Option<Record> {
        let cell = self.lookup(id).await?;
        let record = cell.state.lock().await;
        if cell.is_removed() {
            return None;
        }
        Some(record.clone())
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.lookup(id)
            .await
            .is_some_and(|cell| !cell.is_removed())
    }

    /// False for unknown ids
    pub async fn is_ready(&self, id: &str) -> bool {
        self.get(id).await.is_some_and(|record| record.is_ready())
    }

    /// Snapshot of all records in insertion order
    pub async fn list(&self) -> Vec<Record> {
        let cells: Vec<Arc<RecordCell>> = self.records.read().await.values().cloned().collect();

        let mut records = Vec::with_capacity(cells.len());
        for cell in cells {
            let record = cell.state.lock().await;
            if !cell.is_removed() {
                records.push(record.clone());
            }
        }
        records
    }

    /// Number of live records
    pub async fn len(&self) -> usize {
        self.records
            .read()
            .await
            .values()
            .filter(|cell| !cell.is_removed())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Persist one artifact and return the record's readiness.
    ///
    /// The write, the slot flag, the readiness check and the `notified`
    /// test-and-set happen under the record lock, so of any number of
    /// concurrent calls completing the record exactly one enqueues a
    /// notification. The handoff itself happens after the lock is released.
    /// On a write failure the slot is re-synced with what is left on disk.
    pub async fn load_artifact(
        &self,
        id: &str,
        kind: ArtifactKind,
        payload: impl Into<ArtifactPayload>,
    ) -> Result<bool> {
        let payload = payload.into();
        if kind == ArtifactKind::Params {
            if let ArtifactPayload::Bytes(bytes) = &payload {
                serde_json::from_slice::<serde_json::Value>(bytes).map_err(|e| {
                    Error::InvalidPayload(format!("params must be a JSON document: {}", e))
                })?;
            }
        }
        let data = payload.into_bytes()?;
        let cell = self.lookup_or_not_found(id).await?;

        let (ready, job) = {
            let mut record = cell.state.lock().await;
            if cell.is_removed() {
                return Err(Error::NotFound(format!("Record '{}' not found", id)));
            }

            if let Err(e) = self.backend.write_artifact(id, kind, data).await {
                // The overwrite may have removed the previous blob before failing
                let present = self.backend.artifact_exists(id, kind).await.unwrap_or(false);
                record.slots.set(kind, present);
                tracing::warn!(record_id = %id, %kind, present, "Artifact write failed");
                return Err(e);
            }
            record.slots.mark_present(kind);

            let ready = record.is_ready();
            let job = record.claim_notification().then(|| NotificationJob {
                record_id: record.id.clone(),
                contact_address: record.metadata.contact_address.clone(),
                code_payload: record.metadata.code_payload.clone(),
                ready_at: chrono::Utc::now(),
            });
            (ready, job)
        };

        tracing::debug!(record_id = %id, %kind, ready, "Artifact stored");

        if let Some(job) = job {
            tracing::info!(record_id = %id, "Record ready, handing off notification");
            // `notified` is already committed; delivery is at most once
            if let Err(e) = self.notifications.enqueue(job).await {
                tracing::error!(record_id = %id, "Failed to enqueue notification: {}", e);
            }
        }

        Ok(ready)
    }

    /// Read back an artifact blob
    pub async fn read_artifact(&self, id: &str, kind: ArtifactKind) -> Result<Bytes> {
        let cell = self.lookup_or_not_found(id).await?;
        let record = cell.state.lock().await;
        if cell.is_removed() {
            return Err(Error::NotFound(format!("Record '{}' not found", id)));
        }
        if !record.slots.is_present(kind) {
            return Err(Error::NotFound(format!("Record '{}' has no {} artifact", id, kind)));
        }

        self.backend
            .read_artifact(id, kind)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Record '{}' has no {} artifact", id, kind)))
    }

    /// Replace the metadata document; the code payload is kept once set
    pub async fn save_metadata(&self, id: &str, metadata: Metadata) -> Result<Metadata> {
        validate_contact_address(&metadata.contact_address)?;
        let cell = self.lookup_or_not_found(id).await?;
        let mut record = cell.state.lock().await;
        if cell.is_removed() {
            return Err(Error::NotFound(format!("Record '{}' not found", id)));
        }

        let next = record.metadata.replaced_by(metadata);
        self.backend.write_metadata(id, &next).await?;
        record.metadata = next.clone();
        Ok(next)
    }

    pub async fn metadata(&self, id: &str) -> Result<Metadata> {
        self.get(id)
            .await
            .map(|record| record.metadata)
            .ok_or_else(|| Error::NotFound(format!("Record '{}' not found", id)))
    }

    /// Delete a record's storage and evict it. False if the id is unknown.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let Some(cell) = self.lookup(id).await else {
            return Ok(false);
        };

        {
            let _record = cell.state.lock().await;
            if cell.is_removed() {
                return Ok(false);
            }
            self.backend.remove(id).await?;
            cell.removed.store(true, Ordering::Release);
        }

        let mut records = self.records.write().await;
        if records
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            records.shift_remove(id);
        }
        tracing::info!(record_id = %id, "Record removed");
        Ok(true)
    }
}
