//! Pipeline job queue
//!
//! Sessions are processed one at a time by a single worker task fed
//! from a bounded channel. The bound makes backpressure visible at
//! enqueue time instead of piling up hidden background tasks, and the
//! single worker keeps inference concurrency at one per engine.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::services::orchestrator::PipelineOrchestrator;

/// Work items for the pipeline worker
#[derive(Debug, Clone)]
pub enum Job {
    ProcessSession { session_id: Uuid },
}

/// Handle used by API handlers to submit work
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

/// Why an enqueue was refused
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("Job queue is full")]
    Full,
    #[error("Pipeline worker is not running")]
    WorkerGone,
}

impl JobQueue {
    /// Create the queue and its receiving end
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Job>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Submit a job without waiting; a full queue is the caller's
    /// problem to surface
    pub fn try_enqueue(&self, job: Job) -> Result<(), EnqueueError> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::WorkerGone,
        })
    }
}

/// Spawn the worker that drains the queue for the life of the process
pub fn spawn_worker(
    mut rx: mpsc::Receiver<Job>,
    orchestrator: Arc<PipelineOrchestrator>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Pipeline worker started");
        while let Some(job) = rx.recv().await {
            match job {
                Job::ProcessSession { session_id } => {
                    tracing::info!("Worker picked up session {}", session_id);
                    orchestrator.process_session(session_id).await;
                }
            }
        }
        tracing::info!("Pipeline worker stopped (queue closed)");
    })
}
