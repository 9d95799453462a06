//! Persistence backend for records
//!
//! Layout under the storage root:
//! ```text
//! ~/YummyVerse/
//! ├── <record-id>/
//! │   ├── meta.json
//! │   ├── qr.png
//! │   ├── image.png
//! │   ├── model.glb
//! │   ├── audio.wav
//! │   └── params.json
//! └── ...
//! ```
//!
//! Presence of a file is the only signal recovery uses. There is no
//! manifest, version, or checksum next to the blobs.

use super::types::{ArtifactKind, Metadata, METADATA_FILE};
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Durable blob and document storage addressed by record id
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Every record namespace currently persisted, sorted by id
    async fn list_ids(&self) -> Result<Vec<String>>;

    /// Allocate an (empty) namespace for a record
    async fn create_namespace(&self, id: &str) -> Result<()>;

    /// Replace the blob for `kind`
    async fn write_artifact(&self, id: &str, kind: ArtifactKind, data: Bytes) -> Result<()>;

    /// Read the blob for `kind`, `None` if it was never written
    async fn read_artifact(&self, id: &str, kind: ArtifactKind) -> Result<Option<Bytes>>;

    /// Probe for the blob without reading it
    async fn artifact_exists(&self, id: &str, kind: ArtifactKind) -> Result<bool>;

    /// Replace the metadata document
    async fn write_metadata(&self, id: &str, metadata: &Metadata) -> Result<()>;

    /// Read the metadata document, `None` if absent.
    /// A document that does not parse is an error.
    async fn read_metadata(&self, id: &str) -> Result<Option<Metadata>>;

    /// Delete the namespace and everything in it. Missing namespaces are fine.
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Filesystem backend: one directory per record
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open (and create if needed) the storage root
    pub async fn open(root: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn artifact_path(&self, id: &str, kind: ArtifactKind) -> PathBuf {
        self.record_dir(id).join(kind.file_name())
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.record_dir(id).join(METADATA_FILE)
    }
}

/// Remove-then-write. Not atomic: a crash in between leaves the file
/// missing or truncated, and recovery reports what is on disk.
async fn overwrite(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            return Err(e);
        }
    }
    tokio::fs::write(path, data).await
}

#[async_trait]
impl RecordBackend for FsBackend {
    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => ids.push(name),
                Err(name) => {
                    tracing::warn!("Skipping non UTF-8 record directory {:?}", name);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn create_namespace(&self, id: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.record_dir(id)).await?;
        Ok(())
    }

    async fn write_artifact(&self, id: &str, kind: ArtifactKind, data: Bytes) -> Result<()> {
        tokio::fs::create_dir_all(self.record_dir(id)).await?;
        overwrite(&self.artifact_path(id, kind), &data).await?;
        Ok(())
    }

    async fn read_artifact(&self, id: &str, kind: ArtifactKind) -> Result<Option<Bytes>> {
        match tokio::fs::read(self.artifact_path(id, kind)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn artifact_exists(&self, id: &str, kind: ArtifactKind) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.artifact_path(id, kind)).await?)
    }

    async fn write_metadata(&self, id: &str, metadata: &Metadata) -> Result<()> {
        let json = serde_json::to_vec_pretty(metadata)?;
        tokio::fs::create_dir_all(self.record_dir(id)).await?;
        overwrite(&self.metadata_path(id), &json).await?;
        Ok(())
    }

    async fn read_metadata(&self, id: &str) -> Result<Option<Metadata>> {
        let data = match tokio::fs::read(self.metadata_path(id)).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        match tokio::fs::remove_dir_all(self.record_dir(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
