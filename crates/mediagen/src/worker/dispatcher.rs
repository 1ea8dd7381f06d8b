//! Supervised follow-up processing.
//!
//! Jobs handed to the dispatcher run on a background task, one at a time,
//! independent of the request that submitted them. Each job runs in its own
//! spawned task so a panic is logged instead of killing the loop.

use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::RunOptions;
use super::error::WorkerError;
use super::outcome::JobOutcome;
use super::runner::JobWorker;

type Reply = oneshot::Sender<Result<JobOutcome, WorkerError>>;

struct DispatchRequest {
    job_id: String,
    options: RunOptions,
    reply: Reply,
}

/// Handle to the outcome of a submitted job.
#[derive(Debug)]
pub struct DispatchTicket {
    job_id: String,
    rx: oneshot::Receiver<Result<JobOutcome, WorkerError>>,
}

impl DispatchTicket {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Waits for the job to finish. Dropping the ticket instead is fine;
    /// the job still runs.
    pub async fn wait(self) -> Result<JobOutcome, WorkerError> {
        self.rx.await.map_err(|_| WorkerError::ChannelClosed)?
    }
}

pub struct JobDispatcher {
    sender: Mutex<Option<mpsc::Sender<DispatchRequest>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobDispatcher {
    /// Starts the supervisor task. Must be called inside a tokio runtime.
    pub fn spawn(worker: Arc<JobWorker>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(supervise(worker, receiver));
        info!(capacity, "job dispatcher started");
        Self {
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Queues a job without waiting for it.
    pub fn submit(
        &self,
        job_id: impl Into<String>,
        options: RunOptions,
    ) -> Result<DispatchTicket, WorkerError> {
        let job_id = job_id.into();
        let (reply, rx) = oneshot::channel();
        let request = DispatchRequest {
            job_id: job_id.clone(),
            options,
            reply,
        };

        let guard = self.sender.lock().map_err(|_| WorkerError::ChannelClosed)?;
        let sender = guard.as_ref().ok_or(WorkerError::ChannelClosed)?;
        sender.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => WorkerError::ChannelClosed,
        })?;
        debug!(%job_id, "job queued for follow-up");
        Ok(DispatchTicket { job_id, rx })
    }

    /// Stops accepting jobs, drains the queue and waits for the supervisor.
    pub async fn shutdown(&self) {
        info!("Shutting down job dispatcher...");
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Job dispatcher task failed: {}", e);
            }
        }
        info!("Job dispatcher stopped");
    }
}

async fn supervise(worker: Arc<JobWorker>, mut receiver: mpsc::Receiver<DispatchRequest>) {
    while let Some(request) = receiver.recv().await {
        let DispatchRequest {
            job_id,
            options,
            reply,
        } = request;

        let task_worker = Arc::clone(&worker);
        let task_job_id = job_id.clone();
        let task = tokio::spawn(async move { task_worker.process_job(&task_job_id, options).await });

        match task.await {
            Ok(result) => {
                match &result {
                    Ok(outcome) => info!(
                        %job_id,
                        kind = ?outcome.kind,
                        status = %outcome.status,
                        "follow-up job finished"
                    ),
                    Err(e) => error!(%job_id, error = %e, "follow-up job failed"),
                }
                if reply.send(result).is_err() {
                    debug!(%job_id, "ticket dropped before completion");
                }
            }
            Err(e) => {
                // Dropping the reply makes the ticket report ChannelClosed.
                warn!(%job_id, error = %e, "follow-up job task panicked");
            }
        }
    }
    debug!("dispatch queue closed");
}
