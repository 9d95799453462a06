//! Record model and wire types
//!
//! A [`Record`] tracks five independent artifact slots for one request id,
//! plus the metadata document and a one-shot `notified` flag. Readiness is
//! derived from the slots and never stored.

use crate::error::{Error, Result};
use bytes::Bytes;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// File name of the per-record metadata document
pub const METADATA_FILE: &str = "meta.json";

/// The closed set of tracked artifact kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Rendered QR code image
    Code,
    /// Uploaded photo
    Image,
    /// Generated 3D model
    Model,
    /// Generated audio
    Audio,
    /// Generation parameters (JSON document)
    Params,
}

impl ArtifactKind {
    /// All kinds, in slot order
    pub const ALL: [ArtifactKind; 5] = [
        ArtifactKind::Code,
        ArtifactKind::Image,
        ArtifactKind::Model,
        ArtifactKind::Audio,
        ArtifactKind::Params,
    ];

    /// Fixed blob name inside the record directory
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Code => "qr.png",
            Self::Image => "image.png",
            Self::Model => "model.glb",
            Self::Audio => "audio.wav",
            Self::Params => "params.json",
        }
    }

    /// Content type served on download
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Code | Self::Image => "image/png",
            Self::Model => "model/gltf-binary",
            Self::Audio => "audio/wav",
            Self::Params => "application/json",
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Code => 0,
            Self::Image => 1,
            Self::Model => 2,
            Self::Audio => 3,
            Self::Params => 4,
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code => write!(f, "code"),
            Self::Image => write!(f, "image"),
            Self::Model => write!(f, "model"),
            Self::Audio => write!(f, "audio"),
            Self::Params => write!(f, "params"),
        }
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "code" | "qr" => Ok(Self::Code),
            "image" => Ok(Self::Image),
            "model" => Ok(Self::Model),
            "audio" => Ok(Self::Audio),
            "params" => Ok(Self::Params),
            other => Err(format!("unknown artifact kind: {}", other)),
        }
    }
}

/// Presence flags for the five artifact kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArtifactSlots([bool; 5]);

impl ArtifactSlots {
    pub fn is_present(&self, kind: ArtifactKind) -> bool {
        self.0[kind.index()]
    }

    pub fn mark_present(&mut self, kind: ArtifactKind) {
        self.0[kind.index()] = true;
    }

    pub fn set(&mut self, kind: ArtifactKind, present: bool) {
        self.0[kind.index()] = present;
    }

    /// True iff every slot is filled
    pub fn all_present(&self) -> bool {
        self.0.iter().all(|present| *present)
    }

    /// Kinds that are still missing, in slot order
    pub fn missing(&self) -> Vec<ArtifactKind> {
        ArtifactKind::ALL
            .into_iter()
            .filter(|kind| !self.is_present(*kind))
            .collect()
    }
}

impl Serialize for ArtifactSlots {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(ArtifactKind::ALL.len()))?;
        for kind in ArtifactKind::ALL {
            map.serialize_entry(&kind, &self.is_present(kind))?;
        }
        map.end()
    }
}

/// Structured per-record metadata, persisted as `meta.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    /// Record id echoed into the document
    pub uuid: String,
    /// Contact address the completion notification goes to
    #[serde(rename = "email")]
    pub contact_address: String,
    /// Base64 PNG of the QR code; set once
    #[serde(rename = "qr_code")]
    pub code_payload: String,
    /// Free-form request text
    #[serde(rename = "request")]
    pub request_text: String,
}

impl Metadata {
    /// Metadata document for a fresh record
    pub fn for_record(id: &str) -> Self {
        Self {
            uuid: id.to_string(),
            ..Default::default()
        }
    }

    /// Apply a replacement document, keeping an already-set code payload
    pub(crate) fn replaced_by(&self, mut next: Metadata) -> Metadata {
        if !self.code_payload.is_empty() && next.code_payload != self.code_payload {
            if !next.code_payload.is_empty() {
                tracing::warn!(record_id = %self.uuid, "Ignoring attempt to change code payload");
            }
            next.code_payload = self.code_payload.clone();
        }
        next.uuid = self.uuid.clone();
        next
    }
}

/// In-memory bookkeeping entity for one request id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub metadata: Metadata,
    pub slots: ArtifactSlots,
    pub notified: bool,
}

impl Record {
    /// Empty record with no artifacts
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            metadata: Metadata::for_record(&id),
            id,
            slots: ArtifactSlots::default(),
            notified: false,
        }
    }

    /// A record is ready iff all five artifacts are present
    pub fn is_ready(&self) -> bool {
        self.slots.all_present()
    }

    /// Test-and-set of the one-shot `notified` flag.
    ///
    /// Returns true exactly once over the record's lifetime: on the first
    /// call made while the record is ready. Callers must hold the record's
    /// lock across the slot mutation and this call.
    pub(crate) fn claim_notification(&mut self) -> bool {
        if self.notified || !self.is_ready() {
            return false;
        }
        self.notified = true;
        true
    }
}

/// Payload handed to `load_artifact`
#[derive(Debug, Clone)]
pub enum ArtifactPayload {
    /// Opaque binary blob
    Bytes(Bytes),
    /// Structured document, stored as pretty JSON
    Document(serde_json::Value),
}

impl ArtifactPayload {
    /// Bytes as written to the backend
    pub fn into_bytes(self) -> Result<Bytes> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Document(value) => Ok(Bytes::from(serde_json::to_vec_pretty(&value)?)),
        }
    }
}

impl From<Vec<u8>> for ArtifactPayload {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for ArtifactPayload {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<serde_json::Value> for ArtifactPayload {
    fn from(value: serde_json::Value) -> Self {
        Self::Document(value)
    }
}

/// Reject contact addresses that could break out of a mail header
pub fn validate_contact_address(address: &str) -> Result<()> {
    if address.chars().any(char::is_control) {
        return Err(Error::InvalidPayload(format!(
            "contact address contains control characters: {:?}",
            address
        )));
    }
    Ok(())
}

/// Reject ids that cannot serve as a single directory name
pub fn validate_id(id: &str) -> Result<()> {
    static ID_PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = ID_PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._-]{1,128}$").expect("static id pattern compiles")
    });
    if id == "." || id == ".." || !pattern.is_match(id) {
        return Err(Error::InvalidId(id.to_string()));
    }
    Ok(())
}

// =============================================================================
// Wire types
// =============================================================================

/// Record summary returned by the HTTP API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: String,
    pub email: String,
    pub request: String,
    pub slots: ArtifactSlots,
    pub missing: Vec<ArtifactKind>,
    pub ready: bool,
    pub notified: bool,
}

impl From<&Record> for RecordSummary {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            email: record.metadata.contact_address.clone(),
            request: record.metadata.request_text.clone(),
            slots: record.slots,
            missing: record.slots.missing(),
            ready: record.is_ready(),
            notified: record.notified,
        }
    }
}

/// Request body for registering a record
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecordRequest {
    pub id: String,
    pub email: Option<String>,
    pub request: Option<String>,
    /// Base64 PNG of the rendered QR code
    pub qr_code: Option<String>,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

/// API error detail
#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}
