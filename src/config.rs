//! YummyVerse configuration management

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main YummyVerse configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YummyConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Record storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Notification queue configuration
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Outbound email configuration
    #[serde(default)]
    pub email: EmailConfig,
}

impl YummyConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.notify.queue_capacity == 0 {
            return Err(Error::Config(
                "notify.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.notify.workers == 0 {
            return Err(Error::Config(
                "notify.workers must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,

    /// Largest accepted artifact upload in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: Vec::new(),
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Record storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory holding one sub-directory per record.
    /// A leading `~/` is expanded to the home directory.
    pub path: PathBuf,
}

impl StorageConfig {
    /// Storage root with `~/` expanded
    pub fn resolved_path(&self) -> PathBuf {
        expand_home(&self.path)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/YummyVerse"),
        }
    }
}

/// What to do with a notification job when the queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Producer waits until a worker frees capacity
    #[default]
    Block,
    /// Job is dropped and an error is logged
    Drop,
}

/// Notification queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Bounded queue capacity
    pub queue_capacity: usize,

    /// Number of dispatch workers draining the queue
    pub workers: usize,

    /// Full-queue policy
    pub backpressure: Backpressure,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            workers: 2,
            backpressure: Backpressure::Block,
        }
    }
}

/// Outbound email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    /// `From` address; the mail API substitutes the authorized account for "me"
    pub sender: String,

    /// Subject line
    pub subject: String,

    /// Plain-text body
    pub body: String,

    /// File name of the attached QR image
    pub attachment_name: String,

    /// Base URL of the Gmail REST API
    pub api_base: String,

    /// Environment variable holding the OAuth bearer token
    pub access_token_env: String,

    /// Log messages instead of sending them
    pub debug: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            sender: "me".to_string(),
            subject: "YummyVerseのQRコード".to_string(),
            body: "YummyVerseのQRコードをお送りします。アプリで読み取ってください。".to_string(),
            attachment_name: "qr_code.png".to_string(),
            api_base: "https://gmail.googleapis.com/gmail/v1".to_string(),
            access_token_env: "YUMMYVERSE_GMAIL_TOKEN".to_string(),
            debug: false,
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs_next::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}
