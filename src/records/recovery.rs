//! Startup reconstruction of records from the persistence backend
//!
//! There is no write-ahead log. Each record is rebuilt by probing which
//! artifact blobs exist and reading the metadata document if there is one.
//! A damaged record never blocks the rest of the scan.

use super::backend::RecordBackend;
use super::types::{validate_id, ArtifactKind, Metadata, Record};
use crate::error::{Error, Result};
use std::sync::Arc;

/// Rebuilds in-memory records from what is persisted
pub struct RecoveryLoader {
    backend: Arc<dyn RecordBackend>,
}

impl RecoveryLoader {
    pub fn new(backend: Arc<dyn RecordBackend>) -> Self {
        Self { backend }
    }

    /// Scan every persisted namespace, in id order.
    ///
    /// Fails only when the storage root itself cannot be enumerated.
    pub async fn load(&self) -> Result<Vec<Record>> {
        let ids = self.backend.list_ids().await?;
        let mut records = Vec::with_capacity(ids.len());

        for id in ids {
            if let Err(e) = validate_id(&id) {
                tracing::warn!("Skipping storage entry during recovery: {}", e);
                continue;
            }
            records.push(self.load_one(&id).await);
        }

        let ready = records.iter().filter(|r| r.is_ready()).count();
        tracing::info!(records = records.len(), ready, "Recovered records from storage");
        Ok(records)
    }

    async fn load_one(&self, id: &str) -> Record {
        let mut record = Record::new(id);

        record.metadata = match self.backend.read_metadata(id).await {
            Ok(Some(mut metadata)) => {
                metadata.uuid = id.to_string();
                metadata
            }
            Ok(None) => Metadata::for_record(id),
            Err(Error::Serialization(e)) => {
                tracing::warn!(record_id = %id, "Malformed metadata, using defaults: {}", e);
                Metadata::for_record(id)
            }
            Err(e) => {
                tracing::warn!(record_id = %id, "Failed to read metadata, using defaults: {}", e);
                Metadata::for_record(id)
            }
        };

        for kind in ArtifactKind::ALL {
            match self.backend.artifact_exists(id, kind).await {
                Ok(true) => record.slots.mark_present(kind),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(record_id = %id, %kind, "Failed to probe artifact, treating as absent: {}", e);
                }
            }
        }

        // Completion before the restart cannot be told apart from completion
        // now, so a recovered ready record never notifies again.
        record.notified = record.is_ready();
        record
    }
}
