//! Job repository interface consumed by the worker, plus the SQLite adapter.
//!
//! All job-state mutation goes through these atomic primitives. Nothing
//! holds a lock across a provider call.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{self, format_timestamp, job_repo, unit_repo, Database, DatabaseError};
use crate::model::{GeneratedUnit, GenerationJob, JobCounters, JobStatus};

pub use crate::db::job_repo::{RetryReset, UnitRecord};

/// Proof of ownership of a running job for one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub job_id: String,
    pub token: String,
}

impl Claim {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            token: uuid::Uuid::new_v4().to_string(),
        }
    }
}

pub type RepoResult<T> = Result<T, DatabaseError>;

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn insert_job(&self, job: &GenerationJob) -> RepoResult<()>;

    async fn get_job(&self, job_id: &str) -> RepoResult<Option<GenerationJob>>;

    /// Pending jobs and running jobs whose lease has lapsed, oldest first.
    async fn list_due_jobs(&self, limit: usize, now: DateTime<Utc>)
        -> RepoResult<Vec<GenerationJob>>;

    /// Conditional transition to `running`. `false` means someone else
    /// holds a live claim or the job is terminal.
    async fn claim_job(&self, claim: &Claim, lease_until: DateTime<Utc>) -> RepoResult<bool>;

    async fn existing_variation_indices(&self, job_id: &str) -> RepoResult<Vec<u32>>;

    /// Inserts the unit and increments `completed_count` atomically.
    async fn record_unit_success(
        &self,
        claim: &Claim,
        unit: &GeneratedUnit,
    ) -> RepoResult<UnitRecord>;

    /// Increments `failed_count` and stores `message` as the last error.
    async fn record_unit_failure(&self, claim: &Claim, message: &str) -> RepoResult<UnitRecord>;

    /// Extends the lease. `None` when the claim was lost.
    async fn checkpoint(
        &self,
        claim: &Claim,
        lease_until: DateTime<Utc>,
    ) -> RepoResult<Option<JobCounters>>;

    async fn finalize_job(&self, claim: &Claim, status: JobStatus) -> RepoResult<bool>;

    async fn fail_job(&self, claim: &Claim, message: &str) -> RepoResult<bool>;

    async fn release_claim(&self, claim: &Claim) -> RepoResult<bool>;

    async fn reset_for_retry(&self, job_id: &str) -> RepoResult<RetryReset>;

    async fn list_units(&self, job_id: &str) -> RepoResult<Vec<GeneratedUnit>>;
}

/// `JobRepository` over the embedded SQLite database. Each call runs on
/// tokio's blocking pool.
#[derive(Clone)]
pub struct SqliteJobRepository {
    db: Database,
}

impl SqliteJobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn blocking<F, T>(&self, f: F) -> RepoResult<T>
    where
        F: FnOnce(&Database) -> RepoResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| DatabaseError::Task(e.to_string()))?
    }
}

fn now_ts() -> String {
    format_timestamp(&Utc::now())
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn insert_job(&self, job: &GenerationJob) -> RepoResult<()> {
        let row = job_repo::JobRow::from_job(job)?;
        self.blocking(move |db| job_repo::insert(db, &row)).await
    }

    async fn get_job(&self, job_id: &str) -> RepoResult<Option<GenerationJob>> {
        let id = job_id.to_string();
        self.blocking(move |db| {
            job_repo::find_by_id(db, &id)?
                .map(job_repo::JobRow::into_job)
                .transpose()
        })
        .await
    }

    async fn list_due_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> RepoResult<Vec<GenerationJob>> {
        let now = format_timestamp(&now);
        let limit = u32::try_from(limit).unwrap_or(u32::MAX);
        self.blocking(move |db| {
            job_repo::list_due(db, &now, limit)?
                .into_iter()
                .map(job_repo::JobRow::into_job)
                .collect()
        })
        .await
    }

    async fn claim_job(&self, claim: &Claim, lease_until: DateTime<Utc>) -> RepoResult<bool> {
        let claim = claim.clone();
        let lease_until = format_timestamp(&lease_until);
        self.blocking(move |db| {
            job_repo::claim(db, &claim.job_id, &claim.token, &now_ts(), &lease_until)
        })
        .await
    }

    async fn existing_variation_indices(&self, job_id: &str) -> RepoResult<Vec<u32>> {
        let id = job_id.to_string();
        self.blocking(move |db| unit_repo::variation_indices(db, &id))
            .await
    }

    async fn record_unit_success(
        &self,
        claim: &Claim,
        unit: &GeneratedUnit,
    ) -> RepoResult<UnitRecord> {
        let claim = claim.clone();
        let row = unit_repo::UnitRow::from_unit(unit);
        self.blocking(move |db| {
            job_repo::record_success(db, &claim.job_id, &claim.token, &row, &now_ts())
        })
        .await
    }

    async fn record_unit_failure(&self, claim: &Claim, message: &str) -> RepoResult<UnitRecord> {
        let claim = claim.clone();
        let message = message.to_string();
        self.blocking(move |db| {
            job_repo::record_failure(db, &claim.job_id, &claim.token, &message, &now_ts())
        })
        .await
    }

    async fn checkpoint(
        &self,
        claim: &Claim,
        lease_until: DateTime<Utc>,
    ) -> RepoResult<Option<JobCounters>> {
        let claim = claim.clone();
        let lease_until = format_timestamp(&lease_until);
        self.blocking(move |db| {
            job_repo::checkpoint(db, &claim.job_id, &claim.token, &lease_until, &now_ts())
        })
        .await
    }

    async fn finalize_job(&self, claim: &Claim, status: JobStatus) -> RepoResult<bool> {
        let claim = claim.clone();
        self.blocking(move |db| {
            job_repo::finalize(db, &claim.job_id, &claim.token, status, &now_ts())
        })
        .await
    }

    async fn fail_job(&self, claim: &Claim, message: &str) -> RepoResult<bool> {
        let claim = claim.clone();
        let message = message.to_string();
        self.blocking(move |db| {
            job_repo::fail(db, &claim.job_id, &claim.token, &message, &now_ts())
        })
        .await
    }

    async fn release_claim(&self, claim: &Claim) -> RepoResult<bool> {
        let claim = claim.clone();
        self.blocking(move |db| job_repo::release(db, &claim.job_id, &claim.token, &now_ts()))
            .await
    }

    async fn reset_for_retry(&self, job_id: &str) -> RepoResult<RetryReset> {
        let id = job_id.to_string();
        self.blocking(move |db| job_repo::reset_for_retry(db, &id, &now_ts()))
            .await
    }

    async fn list_units(&self, job_id: &str) -> RepoResult<Vec<GeneratedUnit>> {
        let id = job_id.to_string();
        self.blocking(move |db| {
            unit_repo::list_by_job(db, &id)?
                .into_iter()
                .map(unit_repo::UnitRow::into_unit)
                .collect()
        })
        .await
    }
}

/// Lease end for a claim that must survive `budget` plus `grace`.
pub fn lease_deadline(budget: Duration, grace: Duration) -> DateTime<Utc> {
    let span = chrono::Duration::from_std(budget + grace).unwrap_or(chrono::Duration::hours(1));
    Utc::now() + span
}

/// Opens the SQLite repository at `path`, or the default location.
pub fn open_sqlite(path: Option<&std::path::Path>) -> RepoResult<SqliteJobRepository> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => db::default_database_path().ok_or_else(|| {
            DatabaseError::Unavailable("cannot determine home directory".to_string())
        })?,
    };
    Ok(SqliteJobRepository::new(Database::open(&path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApprovalStatus, MediaType};

    fn repo() -> SqliteJobRepository {
        SqliteJobRepository::new(Database::open_in_memory().unwrap())
    }

    fn unit(job_id: &str, index: u32) -> GeneratedUnit {
        GeneratedUnit {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            variation_index: index,
            media_type: MediaType::Image,
            mime_type: "image/png".into(),
            original_path: format!("generated/{}/{}.png", job_id, index),
            thumbnail_path: None,
            preview_path: None,
            width: Some(10),
            height: Some(10),
            duration_seconds: None,
            file_size: 3,
            approval_status: ApprovalStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_claim_record_finalize_flow() {
        let repo = repo();
        let job = GenerationJob::new("p", MediaType::Image, "mug", 2);
        repo.insert_job(&job).await.unwrap();

        let claim = Claim::new(&job.id);
        let lease = lease_deadline(Duration::from_secs(60), Duration::from_secs(30));
        assert!(repo.claim_job(&claim, lease).await.unwrap());
        assert!(!repo.claim_job(&Claim::new(&job.id), lease).await.unwrap());

        let recorded = repo
            .record_unit_success(&claim, &unit(&job.id, 0))
            .await
            .unwrap();
        assert!(matches!(recorded, UnitRecord::Recorded(c) if c.completed_count == 1));
        repo.record_unit_failure(&claim, "content blocked")
            .await
            .unwrap();

        let counters = repo.checkpoint(&claim, lease).await.unwrap().unwrap();
        assert_eq!(counters.remaining(), 0);
        assert!(repo
            .finalize_job(&claim, JobStatus::Completed)
            .await
            .unwrap());

        let stored = repo.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(repo.existing_variation_indices(&job.id).await.unwrap(), vec![0]);
        assert_eq!(repo.list_units(&job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_due_jobs_respects_limit() {
        let repo = repo();
        for _ in 0..3 {
            repo.insert_job(&GenerationJob::new("p", MediaType::Video, "spin", 1))
                .await
                .unwrap();
        }
        let due = repo.list_due_jobs(2, Utc::now()).await.unwrap();
        assert_eq!(due.len(), 2);
    }

    #[test]
    fn test_open_sqlite_at_path() {
        let dir = tempfile::tempdir().unwrap();
        let repo = open_sqlite(Some(&dir.path().join("jobs.db"))).unwrap();
        repo.database()
            .with_conn(|conn| {
                let n: u32 = conn.query_row("SELECT COUNT(*) FROM generation_jobs", [], |r| {
                    r.get(0)
                })?;
                assert_eq!(n, 0);
                Ok(())
            })
            .unwrap();
    }
}
