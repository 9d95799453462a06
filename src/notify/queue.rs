//! Bounded notification queue drained by a worker pool
//!
//! The record store hands jobs off here after releasing the record lock.
//! Workers call the dispatcher; a slow or failing delivery only occupies
//! its worker. Failures are logged and never roll back `notified`.

use super::dispatcher::{NotificationDispatcher, NotificationJob};
use crate::config::{Backpressure, NotifyConfig};
use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Delivery counters
#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Bounded queue plus the workers draining it
pub struct NotificationQueue {
    tx: RwLock<Option<mpsc::Sender<NotificationJob>>>,
    backpressure: Backpressure,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<QueueCounters>,
}

impl NotificationQueue {
    /// Create the queue and spawn `config.workers` dispatch workers
    pub fn start(config: &NotifyConfig, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(QueueCounters::default());

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let dispatcher = dispatcher.clone();
                let counters = counters.clone();
                tokio::spawn(async move {
                    run_worker(worker_id, rx, dispatcher, counters).await;
                })
            })
            .collect();

        tracing::info!(
            capacity = config.queue_capacity,
            workers = config.workers,
            backpressure = ?config.backpressure,
            "Notification queue started"
        );

        Self {
            tx: RwLock::new(Some(tx)),
            backpressure: config.backpressure,
            workers: Mutex::new(workers),
            counters,
        }
    }

    /// Hand a job to the workers.
    ///
    /// Returns `Ok(false)` when the job was dropped because the queue is full
    /// under [`Backpressure::Drop`]. Errors once the queue has shut down.
    pub async fn enqueue(&self, job: NotificationJob) -> Result<bool> {
        let tx = self
            .tx
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Notification("notification queue is shut down".to_string()))?;

        let record_id = job.record_id.clone();
        match self.backpressure {
            Backpressure::Block => {
                tx.send(job)
                    .await
                    .map_err(|_| Error::Notification("notification workers stopped".to_string()))?;
            }
            Backpressure::Drop => match tx.try_send(job) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(record_id = %record_id, "Notification queue full, dropping job");
                    return Ok(false);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(Error::Notification("notification workers stopped".to_string()));
                }
            },
        }

        self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(record_id = %record_id, "Notification job enqueued");
        Ok(true)
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting jobs, let workers drain what is queued, and wait for them
    pub async fn shutdown(&self) {
        self.tx.write().await.take();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::warn!("Notification worker ended abnormally: {}", e);
            }
        }
        tracing::info!(stats = ?self.stats(), "Notification queue drained");
    }
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<NotificationJob>>>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    counters: Arc<QueueCounters>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        match dispatcher.notify(&job).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    record_id = %job.record_id,
                    dispatcher = dispatcher.name(),
                    worker_id,
                    "Notification delivered"
                );
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    record_id = %job.record_id,
                    dispatcher = dispatcher.name(),
                    worker_id,
                    "Notification delivery failed: {}",
                    e
                );
            }
        }
    }
    tracing::debug!(worker_id, "Notification worker stopped");
}
