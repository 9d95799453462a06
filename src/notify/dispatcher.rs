//! Notification dispatcher abstraction

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One completion notification, produced at most once per record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub record_id: String,
    pub contact_address: String,
    /// Base64 QR image taken from the record metadata
    pub code_payload: String,
    pub ready_at: DateTime<Utc>,
}

/// Outbound delivery of completion notifications.
///
/// Called from queue workers, never while a record lock is held. Retry and
/// backoff, if any, are the implementation's business.
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    /// Dispatcher name for logs
    fn name(&self) -> &str;

    /// Deliver one notification
    async fn notify(&self, job: &NotificationJob) -> Result<()>;
}
