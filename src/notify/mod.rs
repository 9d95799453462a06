//! Completion notifications
//!
//! A record that becomes ready produces exactly one [`NotificationJob`].
//! Jobs travel through a bounded [`NotificationQueue`] to a pool of workers
//! that call a [`NotificationDispatcher`], normally the [`EmailDispatcher`].

pub mod dispatcher;
pub mod email;
pub mod queue;

pub use dispatcher::{NotificationDispatcher, NotificationJob};
pub use email::EmailDispatcher;
pub use queue::{NotificationQueue, QueueStats};
