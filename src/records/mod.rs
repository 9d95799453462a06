//! Records module: per-request artifact tracking
//!
//! Each record groups five artifacts (QR code, photo, 3D model, audio,
//! generation parameters) plus a metadata document under one directory of
//! the storage root. The store rebuilds itself from that directory tree at
//! startup and fires a single completion notification per record once all
//! five artifacts are present.

pub mod backend;
pub mod handler;
pub mod recovery;
pub mod store;
pub mod types;

pub use backend::{FsBackend, RecordBackend};
pub use handler::{records_router, RecordsState};
pub use recovery::RecoveryLoader;
pub use store::RecordStore;
pub use types::{ArtifactKind, ArtifactPayload, ArtifactSlots, Metadata, Record};
