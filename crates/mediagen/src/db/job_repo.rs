//! Job repository: conditional updates on the `generation_jobs` table.
//!
//! Every mutation made on behalf of a worker is guarded by the claim token
//! so a worker whose lease expired cannot overwrite a newer claim.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::unit_repo::{self, UnitRow};
use super::{parse_optional_timestamp, parse_timestamp, format_timestamp, Database, DatabaseError};
use crate::model::{GenerationJob, JobCounters, JobStatus};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub product_id: String,
    pub job_type: String,
    pub prompt: String,
    pub variation_count: u32,
    pub parameters: String,
    pub reference_paths: String,
    pub status: String,
    pub completed_count: u32,
    pub failed_count: u32,
    pub error_message: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub claim_token: Option<String>,
    pub lease_expires_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            product_id: row.get("product_id")?,
            job_type: row.get("job_type")?,
            prompt: row.get("prompt")?,
            variation_count: row.get("variation_count")?,
            parameters: row.get("parameters")?,
            reference_paths: row.get("reference_paths")?,
            status: row.get("status")?,
            completed_count: row.get("completed_count")?,
            failed_count: row.get("failed_count")?,
            error_message: row.get("error_message")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            claim_token: row.get("claim_token")?,
            lease_expires_at: row.get("lease_expires_at")?,
        })
    }

    pub fn from_job(job: &GenerationJob) -> Result<Self, DatabaseError> {
        let parameters =
            serde_json::to_string(&job.parameters).map_err(|e| DatabaseError::InvalidRow {
                column: "parameters",
                reason: e.to_string(),
            })?;
        let reference_paths =
            serde_json::to_string(&job.reference_paths).map_err(|e| DatabaseError::InvalidRow {
                column: "reference_paths",
                reason: e.to_string(),
            })?;

        Ok(Self {
            id: job.id.clone(),
            product_id: job.product_id.clone(),
            job_type: job.job_type.as_str().to_string(),
            prompt: job.prompt.clone(),
            variation_count: job.variation_count,
            parameters,
            reference_paths,
            status: job.status.as_str().to_string(),
            completed_count: job.completed_count,
            failed_count: job.failed_count,
            error_message: job.error_message.clone(),
            started_at: job.started_at.as_ref().map(format_timestamp),
            completed_at: job.completed_at.as_ref().map(format_timestamp),
            created_at: format_timestamp(&job.created_at),
            updated_at: format_timestamp(&job.updated_at),
            claim_token: job.claim_token.clone(),
            lease_expires_at: job.lease_expires_at.as_ref().map(format_timestamp),
        })
    }

    pub fn into_job(self) -> Result<GenerationJob, DatabaseError> {
        Ok(GenerationJob {
            job_type: self
                .job_type
                .parse()
                .map_err(|reason| DatabaseError::InvalidRow {
                    column: "job_type",
                    reason,
                })?,
            status: self
                .status
                .parse()
                .map_err(|reason| DatabaseError::InvalidRow {
                    column: "status",
                    reason,
                })?,
            parameters: serde_json::from_str(&self.parameters).map_err(|e| {
                DatabaseError::InvalidRow {
                    column: "parameters",
                    reason: e.to_string(),
                }
            })?,
            reference_paths: serde_json::from_str(&self.reference_paths).map_err(|e| {
                DatabaseError::InvalidRow {
                    column: "reference_paths",
                    reason: e.to_string(),
                }
            })?,
            started_at: parse_optional_timestamp("started_at", self.started_at.as_deref())?,
            completed_at: parse_optional_timestamp("completed_at", self.completed_at.as_deref())?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            lease_expires_at: parse_optional_timestamp(
                "lease_expires_at",
                self.lease_expires_at.as_deref(),
            )?,
            id: self.id,
            product_id: self.product_id,
            prompt: self.prompt,
            variation_count: self.variation_count,
            completed_count: self.completed_count,
            failed_count: self.failed_count,
            error_message: self.error_message,
            claim_token: self.claim_token,
        })
    }
}

/// Result of recording one unit outcome against a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitRecord {
    /// Counted. Carries the counters after the increment.
    Recorded(JobCounters),
    /// A unit already exists for this variation index.
    Duplicate,
    /// The job is already fully accounted for.
    Exhausted,
    /// The caller no longer holds the claim.
    ClaimLost,
}

/// Result of an operator-initiated retry reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryReset {
    /// Job is pending again. `removed_paths` are objects of deleted units.
    Reset { removed_paths: Vec<String> },
    NotRetryable(JobStatus),
    NotFound,
}

struct ClaimState {
    status: String,
    claim_token: Option<String>,
    counters: JobCounters,
}

impl ClaimState {
    fn held_by(&self, token: &str) -> bool {
        self.status == JobStatus::Running.as_str() && self.claim_token.as_deref() == Some(token)
    }
}

fn claim_state(conn: &Connection, id: &str) -> Result<Option<ClaimState>, DatabaseError> {
    let state = conn
        .query_row(
            "SELECT status, claim_token, completed_count, failed_count, variation_count
             FROM generation_jobs WHERE id = ?1",
            params![id],
            |r| {
                Ok(ClaimState {
                    status: r.get(0)?,
                    claim_token: r.get(1)?,
                    counters: JobCounters {
                        completed_count: r.get(2)?,
                        failed_count: r.get(3)?,
                        variation_count: r.get(4)?,
                    },
                })
            },
        )
        .optional()?;
    Ok(state)
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO generation_jobs (id, product_id, job_type, prompt, variation_count,
             parameters, reference_paths, status, completed_count, failed_count, error_message,
             started_at, completed_at, created_at, updated_at, claim_token, lease_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                job.id,
                job.product_id,
                job.job_type,
                job.prompt,
                job.variation_count,
                job.parameters,
                job.reference_paths,
                job.status,
                job.completed_count,
                job.failed_count,
                job.error_message,
                job.started_at,
                job.completed_at,
                job.created_at,
                job.updated_at,
                job.claim_token,
                job.lease_expires_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM generation_jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Jobs ready for a worker: pending, or running without a live lease.
/// Oldest first.
pub fn list_due(db: &Database, now: &str, limit: u32) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM generation_jobs
             WHERE status = 'pending'
                OR (status = 'running' AND (lease_expires_at IS NULL OR lease_expires_at <= ?1))
             ORDER BY created_at ASC, id ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![now, limit], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Compare-and-swap claim. Succeeds only for a non-terminal job with no
/// live lease. Sets `started_at` on the first claim.
pub fn claim(
    db: &Database,
    id: &str,
    token: &str,
    now: &str,
    lease_until: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE generation_jobs
             SET status = 'running', started_at = COALESCE(started_at, ?3),
                 claim_token = ?2, lease_expires_at = ?4, updated_at = ?3
             WHERE id = ?1
               AND status IN ('pending', 'running')
               AND (claim_token IS NULL OR lease_expires_at IS NULL OR lease_expires_at <= ?3)",
            params![id, token, now, lease_until],
        )?;
        Ok(changed == 1)
    })
}

/// Inserts a unit and increments `completed_count` in one transaction.
pub fn record_success(
    db: &Database,
    id: &str,
    token: &str,
    unit: &UnitRow,
    now: &str,
) -> Result<UnitRecord, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let state = match claim_state(&tx, id)? {
            Some(state) if state.held_by(token) => state,
            _ => return Ok(UnitRecord::ClaimLost),
        };
        // A replay of an already committed insert, even one that filled
        // the last slot.
        if unit_repo::exists(&tx, &unit.id)? {
            return Ok(UnitRecord::Duplicate);
        }
        if state.counters.remaining() == 0 {
            return Ok(UnitRecord::Exhausted);
        }
        if !unit_repo::insert_if_absent(&tx, unit)? {
            return Ok(UnitRecord::Duplicate);
        }
        tx.execute(
            "UPDATE generation_jobs SET completed_count = completed_count + 1, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        tx.commit()?;

        Ok(UnitRecord::Recorded(JobCounters {
            completed_count: state.counters.completed_count + 1,
            ..state.counters
        }))
    })
}

/// Increments `failed_count` and stores the message as the job's last error.
pub fn record_failure(
    db: &Database,
    id: &str,
    token: &str,
    message: &str,
    now: &str,
) -> Result<UnitRecord, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let state = match claim_state(&tx, id)? {
            Some(state) if state.held_by(token) => state,
            _ => return Ok(UnitRecord::ClaimLost),
        };
        if state.counters.remaining() == 0 {
            return Ok(UnitRecord::Exhausted);
        }
        tx.execute(
            "UPDATE generation_jobs
             SET failed_count = failed_count + 1, error_message = ?2, updated_at = ?3
             WHERE id = ?1",
            params![id, message, now],
        )?;
        tx.commit()?;

        Ok(UnitRecord::Recorded(JobCounters {
            failed_count: state.counters.failed_count + 1,
            ..state.counters
        }))
    })
}

/// Extends the lease and reads back authoritative counters.
/// Returns `None` when the claim is no longer held.
pub fn checkpoint(
    db: &Database,
    id: &str,
    token: &str,
    lease_until: &str,
    now: &str,
) -> Result<Option<JobCounters>, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE generation_jobs SET lease_expires_at = ?3, updated_at = ?4
             WHERE id = ?1 AND claim_token = ?2 AND status = 'running'",
            params![id, token, lease_until, now],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        Ok(claim_state(conn, id)?.map(|s| s.counters))
    })
}

/// Moves a fully accounted job to a terminal status and drops the claim.
/// A completed job has its last error cleared.
pub fn finalize(
    db: &Database,
    id: &str,
    token: &str,
    status: JobStatus,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE generation_jobs
             SET status = ?3, completed_at = ?4, updated_at = ?4,
                 claim_token = NULL, lease_expires_at = NULL,
                 error_message = CASE WHEN ?3 = 'completed' THEN NULL ELSE error_message END
             WHERE id = ?1 AND claim_token = ?2 AND status = 'running'
               AND completed_count + failed_count = variation_count",
            params![id, token, status.as_str(), now],
        )?;
        Ok(changed == 1)
    })
}

/// Fails the whole job with a message, regardless of remaining units.
pub fn fail(
    db: &Database,
    id: &str,
    token: &str,
    message: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE generation_jobs
             SET status = 'failed', error_message = ?3, completed_at = ?4, updated_at = ?4,
                 claim_token = NULL, lease_expires_at = NULL
             WHERE id = ?1 AND claim_token = ?2 AND status = 'running'",
            params![id, token, message, now],
        )?;
        Ok(changed == 1)
    })
}

/// Drops the claim, leaving the job `running` and immediately reclaimable.
pub fn release(db: &Database, id: &str, token: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE generation_jobs SET claim_token = NULL, lease_expires_at = NULL, updated_at = ?3
             WHERE id = ?1 AND claim_token = ?2",
            params![id, token, now],
        )?;
        Ok(changed == 1)
    })
}

/// Resets a failed job (or a completed job with zero successes) to pending
/// with cleared counters, deleting any unit rows it had.
pub fn reset_for_retry(db: &Database, id: &str, now: &str) -> Result<RetryReset, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let state = match claim_state(&tx, id)? {
            Some(state) => state,
            None => return Ok(RetryReset::NotFound),
        };
        let status: JobStatus = state
            .status
            .parse()
            .map_err(|reason| DatabaseError::InvalidRow {
                column: "status",
                reason,
            })?;
        let retryable = status == JobStatus::Failed
            || (status == JobStatus::Completed && state.counters.completed_count == 0);
        if !retryable {
            return Ok(RetryReset::NotRetryable(status));
        }

        let removed_paths = unit_repo::delete_for_job(&tx, id)?;
        tx.execute(
            "UPDATE generation_jobs
             SET status = 'pending', completed_count = 0, failed_count = 0,
                 error_message = NULL, started_at = NULL, completed_at = NULL,
                 claim_token = NULL, lease_expires_at = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        tx.commit()?;

        Ok(RetryReset::Reset { removed_paths })
    })
}
