use serde::Serialize;

use crate::model::{GenerationJob, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Completed,
    Failed,
    /// Time budget ran out. The job stays `running` and is due again.
    Partial,
    /// The job was already terminal.
    Noop,
    /// Another invocation holds a live claim.
    Busy,
}

/// Result of one worker invocation for one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub kind: OutcomeKind,
    pub status: JobStatus,
    pub completed_count: u32,
    pub failed_count: u32,
    pub variation_count: u32,
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub elapsed_ms: u64,
    pub estimated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl JobOutcome {
    /// Outcome that reflects `job` as stored, with nothing attempted.
    pub fn untouched(job: &GenerationJob, kind: OutcomeKind) -> Self {
        Self {
            job_id: job.id.clone(),
            kind,
            status: job.status,
            completed_count: job.completed_count,
            failed_count: job.failed_count,
            variation_count: job.variation_count,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            elapsed_ms: 0,
            estimated_cost: 0.0,
            error_message: job.error_message.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Per-invocation tallies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RunTally {
    pub attempted: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl RunTally {
    pub fn apply(&self, outcome: &mut JobOutcome) {
        outcome.attempted = self.attempted;
        outcome.succeeded = self.succeeded;
        outcome.failed = self.failed;
    }
}
