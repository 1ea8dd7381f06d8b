use tracing::{debug, info, warn};

use crate::model::{JobCounters, JobStatus};

/// Events emitted while a job is processed.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Claimed {
        job_id: String,
        counters: JobCounters,
    },
    UnitSucceeded {
        job_id: String,
        variation_index: u32,
        counters: JobCounters,
    },
    UnitFailed {
        job_id: String,
        variation_index: u32,
        error: String,
        counters: Option<JobCounters>,
    },
    Checkpoint {
        job_id: String,
        counters: JobCounters,
    },
    /// Time budget exhausted; the claim was released.
    Yielded {
        job_id: String,
        counters: JobCounters,
    },
    Finalized {
        job_id: String,
        status: JobStatus,
        counters: JobCounters,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes every event to `tracing`.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Claimed { job_id, counters } => {
                info!(%job_id, remaining = counters.remaining(), "job claimed");
            }
            ProgressEvent::UnitSucceeded {
                job_id,
                variation_index,
                counters,
            } => {
                debug!(
                    %job_id,
                    variation_index,
                    completed = counters.completed_count,
                    failed = counters.failed_count,
                    "unit stored"
                );
            }
            ProgressEvent::UnitFailed {
                job_id,
                variation_index,
                error,
                ..
            } => {
                warn!(%job_id, variation_index, %error, "unit failed");
            }
            ProgressEvent::Checkpoint { job_id, counters } => {
                debug!(%job_id, remaining = counters.remaining(), "checkpoint");
            }
            ProgressEvent::Yielded { job_id, counters } => {
                info!(
                    %job_id,
                    completed = counters.completed_count,
                    failed = counters.failed_count,
                    remaining = counters.remaining(),
                    "time budget exhausted, job yielded"
                );
            }
            ProgressEvent::Finalized {
                job_id,
                status,
                counters,
            } => {
                info!(
                    %job_id,
                    %status,
                    completed = counters.completed_count,
                    failed = counters.failed_count,
                    "job finalized"
                );
            }
        }
    }
}
