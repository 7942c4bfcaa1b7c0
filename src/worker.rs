//! # Bounded worker pool shared by all inbound dispatch and task firings.
//!
//! The pool owns one bounded FIFO of boxed jobs drained by a fixed number of
//! long-lived workers. Enqueueing is non-blocking: a full queue is reported
//! to the caller, never waited on.
//!
//! ```text
//!  producers ──try_send──► [bounded queue] ──► worker 1..n ──► job()
//!                                │
//!                        reporter (interval)
//!                                ▼
//!                    broadcast ring of WorkerReport
//! ```
//!
//! ## Rules
//! - A panicking job is caught, logged with its payload, and never kills the
//!   worker.
//! - Workers exit only on cancellation; an in-flight job runs to completion
//!   and queued jobs are dropped.
//! - Every `supervise_interval` the queue depth is published on a
//!   fixed-depth broadcast ring.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::config::WorkerConfig;
use crate::error::EnqueueError;

/// A unit of work for the pool.
pub type Job = BoxFuture<'static, ()>;

/// Depth of the report broadcast ring.
const REPORT_RING_DEPTH: usize = 32;

/// Periodic queue-depth snapshot published by the pool.
#[derive(Clone, Debug)]
pub struct WorkerReport {
    /// When the snapshot was taken.
    pub reported_at: SystemTime,
    /// Jobs waiting in the queue at that moment.
    pub queue_size: usize,
}

/// Fixed-size pool of cooperative workers over one bounded job queue.
pub struct WorkerPool {
    tx: mpsc::Sender<Job>,
    rx: Mutex<Option<mpsc::Receiver<Job>>>,
    reports: broadcast::Sender<WorkerReport>,
    cfg: WorkerConfig,
}

impl WorkerPool {
    /// Creates a pool; no workers run until [`run`](Self::run) is called.
    pub fn new(cfg: WorkerConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.queue_size.max(1));
        let (reports, _) = broadcast::channel(REPORT_RING_DEPTH);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            reports,
            cfg,
        }
    }

    /// Spawns the workers and the queue-depth reporter. Both run until
    /// `token` is cancelled. A second call is a no-op.
    pub async fn run(&self, token: CancellationToken) {
        let Some(rx) = self.rx.lock().await.take() else {
            warn!("worker pool is already running");
            return;
        };

        debug!(
            worker_num = self.cfg.worker_num,
            queue_size = self.cfg.queue_size,
            "starting workers"
        );
        let rx = Arc::new(Mutex::new(rx));
        for id in 0..self.cfg.worker_num.max(1) {
            tokio::spawn(worker_loop(id, rx.clone(), token.clone()));
        }

        if !self.cfg.supervise_interval.is_zero() {
            tokio::spawn(report_loop(
                self.tx.clone(),
                self.reports.clone(),
                self.cfg.supervise_interval,
                token,
            ));
        }
    }

    /// Places a job on the queue without blocking.
    pub fn enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::QueueOverflow,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Jobs currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Subscribes to the queue-depth report ring.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<WorkerReport> {
        self.reports.subscribe()
    }
}

async fn worker_loop(id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, token: CancellationToken) {
    debug!(worker = id, "worker started");
    loop {
        // Hold the receiver lock only while waiting for the next job so the
        // in-flight job below does not starve the other workers.
        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                _ = token.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            }
        };

        trace!(worker = id, "running job");
        if let Err(panic) = std::panic::AssertUnwindSafe(job).catch_unwind().await {
            error!(
                worker = id,
                panic = panic_message(panic.as_ref()),
                "job panicked; worker continues"
            );
        }
    }
    debug!(worker = id, "worker stopped");
}

async fn report_loop(
    tx: mpsc::Sender<Job>,
    reports: broadcast::Sender<WorkerReport>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                let queue_size = tx.max_capacity() - tx.capacity();
                trace!(queue_size, "worker queue depth");
                let _ = reports.send(WorkerReport {
                    reported_at: SystemTime::now(),
                    queue_size,
                });
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
