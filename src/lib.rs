//! YummyVerse - Artifact tracking backend for generated dining experiences
//!
//! Every visitor request gets an id. Independent producers upload the
//! pieces of that request (QR code, photo, 3D model, audio, generation
//! parameters) at any time and in any order. Once the last piece lands the
//! visitor is emailed their QR code, exactly once.
//!
//! ## Architecture
//!
//! ```text
//!   producers ──HTTP──▶ records::handler ──▶ records::RecordStore ──▶ FsBackend
//!                                                  │                  (one dir per id)
//!                                    ready + first │
//!                                                  ▼
//!                                        notify::NotificationQueue
//!                                                  │ workers
//!                                                  ▼
//!                                        notify::EmailDispatcher ──▶ Gmail API
//! ```
//!
//! ## Modules
//!
//! - [`records`]: Record model, storage backend, recovery, store and HTTP API
//! - [`notify`]: Notification jobs, bounded queue and email delivery
//! - [`api`]: Application router
//! - [`config`]: Configuration management

pub mod api;
pub mod config;
pub mod error;
pub mod notify;
pub mod records;

pub use config::YummyConfig;
pub use error::{Error, Result};
