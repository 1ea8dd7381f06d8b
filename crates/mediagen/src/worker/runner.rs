use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use crate::derivative::AssetBuilder;
use crate::model::{GenerationJob, JobCounters, JobStatus};
use crate::provider::ProviderClient;
use crate::repository::{lease_deadline, Claim, JobRepository};
use crate::sanitize::redact_prompt;
use crate::storage::StorageGateway;

use super::config::{RunOptions, WorkerSettings};
use super::error::WorkerError;
use super::outcome::{JobOutcome, OutcomeKind, RunTally};
use super::progress::{LogProgress, ProgressEvent, ProgressReporter};
use super::request::RequestTemplate;
use super::unit::{run_unit, UnitContext, UnitResult};

/// Drives generation jobs from claim to terminal status.
pub struct JobWorker {
    repo: Arc<dyn JobRepository>,
    storage: Arc<dyn StorageGateway>,
    provider: ProviderClient,
    assets: AssetBuilder,
    settings: WorkerSettings,
    progress: Arc<dyn ProgressReporter>,
}

/// How the unit loop ended.
enum LoopEnd {
    Accounted(JobCounters),
    OutOfTime(JobCounters),
}

impl JobWorker {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        storage: Arc<dyn StorageGateway>,
        provider: ProviderClient,
        assets: AssetBuilder,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            repo,
            storage,
            provider,
            assets,
            settings,
            progress: Arc::new(LogProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.repo
    }

    pub fn storage(&self) -> &Arc<dyn StorageGateway> {
        &self.storage
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    /// Processes one job until it is fully accounted for or the time
    /// budget runs out.
    pub async fn process_job(
        &self,
        job_id: &str,
        options: RunOptions,
    ) -> Result<JobOutcome, WorkerError> {
        let deadline = Instant::now() + options.time_budget;
        self.run_job(job_id, options, deadline).await
    }

    /// Processes up to `jobs` due jobs, oldest first, under one shared
    /// time budget. A job that errors is logged and skipped.
    pub async fn process_due(
        &self,
        options: RunOptions,
        jobs: usize,
    ) -> Result<Vec<JobOutcome>, WorkerError> {
        let deadline = Instant::now() + options.time_budget;
        let due = self.repo.list_due_jobs(jobs.max(1), Utc::now()).await?;
        info!(due = due.len(), "processing due jobs");

        let mut outcomes = Vec::with_capacity(due.len());
        for job in due {
            if Instant::now() >= deadline {
                info!("time budget exhausted before all due jobs were visited");
                break;
            }
            match self.run_job(&job.id, options, deadline).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(job_id = %job.id, error = %e, "job processing failed"),
            }
        }
        Ok(outcomes)
    }

    async fn run_job(
        &self,
        job_id: &str,
        options: RunOptions,
        deadline: Instant,
    ) -> Result<JobOutcome, WorkerError> {
        let span = info_span!(
            "process_job",
            job_id = %job_id,
            batch_size = options.batch_size,
            parallelism = options.parallelism,
        );
        self.run_job_inner(job_id, options, deadline)
            .instrument(span)
            .await
    }

    async fn run_job_inner(
        &self,
        job_id: &str,
        options: RunOptions,
        deadline: Instant,
    ) -> Result<JobOutcome, WorkerError> {
        let started = Instant::now();
        let job = self.load_job(job_id).await?;
        if job.status.is_terminal() {
            info!(status = %job.status, "job already terminal");
            return Ok(JobOutcome::untouched(&job, OutcomeKind::Noop));
        }

        let claim = Claim::new(job_id);
        let lease = lease_deadline(options.time_budget, self.settings.lease_grace);
        if !self.repo.claim_job(&claim, lease).await? {
            let current = self.load_job(job_id).await?;
            let kind = if current.status.is_terminal() {
                OutcomeKind::Noop
            } else {
                OutcomeKind::Busy
            };
            info!(?kind, "job not claimed");
            return Ok(JobOutcome::untouched(&current, kind));
        }

        let mut tally = RunTally::default();
        let result = self
            .drive(&claim, options, deadline, &mut tally)
            .await;

        match result {
            Ok(kind) => self.outcome(job_id, kind, tally, started).await,
            Err(e) => {
                if !matches!(e, WorkerError::ClaimLost(_)) {
                    if let Err(release_err) = self.repo.release_claim(&claim).await {
                        warn!(error = %release_err, "failed to release claim after error");
                    }
                }
                Err(e)
            }
        }
    }

    /// Runs a claimed job. Returns the outcome kind once the claim has
    /// been finalized, failed or released.
    async fn drive(
        &self,
        claim: &Claim,
        options: RunOptions,
        deadline: Instant,
        tally: &mut RunTally,
    ) -> Result<OutcomeKind, WorkerError> {
        let job = self.load_job(&claim.job_id).await?;
        let counters = job.counters();
        self.progress.report(ProgressEvent::Claimed {
            job_id: job.id.clone(),
            counters,
        });
        info!(
            job_type = %job.job_type,
            prompt = %redact_prompt(&job.prompt),
            variation_count = job.variation_count,
            remaining = counters.remaining(),
            "job claimed"
        );

        if counters.remaining() == 0 {
            return self.finalize(claim, counters).await;
        }

        let template =
            match RequestTemplate::prepare(&job, &self.settings, self.storage.as_ref(), &self.assets)
                .await
            {
                Ok(template) => template,
                Err(e) if e.is_fatal_to_job() => {
                    let message = e.to_string();
                    warn!(error = %message, "request rejected, failing job");
                    if !self.repo.fail_job(claim, &message).await? {
                        return Err(WorkerError::ClaimLost(claim.job_id.clone()));
                    }
                    self.progress.report(ProgressEvent::Finalized {
                        job_id: claim.job_id.clone(),
                        status: JobStatus::Failed,
                        counters,
                    });
                    return Ok(OutcomeKind::Failed);
                }
                Err(e) => return Err(e),
            };

        match self
            .run_units(&job, claim, &template, options, deadline, tally, counters)
            .await?
        {
            LoopEnd::Accounted(counters) => self.finalize(claim, counters).await,
            LoopEnd::OutOfTime(counters) => {
                if !self.repo.release_claim(claim).await? {
                    return Err(WorkerError::ClaimLost(claim.job_id.clone()));
                }
                self.progress.report(ProgressEvent::Yielded {
                    job_id: claim.job_id.clone(),
                    counters,
                });
                Ok(OutcomeKind::Partial)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_units(
        &self,
        job: &GenerationJob,
        claim: &Claim,
        template: &RequestTemplate,
        options: RunOptions,
        deadline: Instant,
        tally: &mut RunTally,
        mut counters: JobCounters,
    ) -> Result<LoopEnd, WorkerError> {
        let ctx = UnitContext {
            repo: self.repo.as_ref(),
            storage: self.storage.as_ref(),
            provider: &self.provider,
            assets: &self.assets,
            settings: &self.settings,
            progress: self.progress.as_ref(),
            claim,
            template,
        };

        let mut attempted: HashSet<u32> = self
            .repo
            .existing_variation_indices(&job.id)
            .await?
            .into_iter()
            .collect();

        while counters.remaining() > 0 {
            if Instant::now() >= deadline {
                return Ok(LoopEnd::OutOfTime(counters));
            }

            let take = options.batch_size.min(counters.remaining() as usize);
            let indices: Vec<u32> = (0..job.variation_count)
                .filter(|i| !attempted.contains(i))
                .take(take)
                .collect();
            if indices.is_empty() {
                warn!(
                    remaining = counters.remaining(),
                    "no unattempted variation indices left, yielding"
                );
                return Ok(LoopEnd::OutOfTime(counters));
            }
            attempted.extend(indices.iter().copied());

            let results: Vec<UnitResult> = stream::iter(indices)
                .map(|index| run_unit(&ctx, index))
                .buffer_unordered(options.parallelism)
                .collect()
                .await;

            for result in &results {
                tally.attempted += 1;
                match result {
                    UnitResult::Succeeded(_) => tally.succeeded += 1,
                    UnitResult::Failed(_) => tally.failed += 1,
                    UnitResult::Skipped => {}
                    UnitResult::ClaimLost => {
                        return Err(WorkerError::ClaimLost(claim.job_id.clone()));
                    }
                }
            }

            let lease = lease_deadline(options.time_budget, self.settings.lease_grace);
            counters = self
                .repo
                .checkpoint(claim, lease)
                .await?
                .ok_or_else(|| WorkerError::ClaimLost(claim.job_id.clone()))?;
            self.progress.report(ProgressEvent::Checkpoint {
                job_id: claim.job_id.clone(),
                counters,
            });
        }

        Ok(LoopEnd::Accounted(counters))
    }

    async fn finalize(
        &self,
        claim: &Claim,
        counters: JobCounters,
    ) -> Result<OutcomeKind, WorkerError> {
        let status = self.settings.policy.decide(&counters);
        if !self.repo.finalize_job(claim, status).await? {
            return Err(WorkerError::ClaimLost(claim.job_id.clone()));
        }
        self.progress.report(ProgressEvent::Finalized {
            job_id: claim.job_id.clone(),
            status,
            counters,
        });
        Ok(match status {
            JobStatus::Completed => OutcomeKind::Completed,
            _ => OutcomeKind::Failed,
        })
    }

    async fn load_job(&self, job_id: &str) -> Result<GenerationJob, WorkerError> {
        self.repo
            .get_job(job_id)
            .await?
            .ok_or_else(|| WorkerError::JobNotFound(job_id.to_string()))
    }

    async fn outcome(
        &self,
        job_id: &str,
        kind: OutcomeKind,
        tally: RunTally,
        started: Instant,
    ) -> Result<JobOutcome, WorkerError> {
        let job = self.load_job(job_id).await?;
        let mut outcome = JobOutcome::untouched(&job, kind);
        tally.apply(&mut outcome);
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;
        outcome.estimated_cost = tally.succeeded as f64 * self.settings.unit_cost(job.job_type);
        info!(
            ?kind,
            status = %outcome.status,
            completed = outcome.completed_count,
            failed = outcome.failed_count,
            elapsed_ms = outcome.elapsed_ms,
            "job invocation finished"
        );
        Ok(outcome)
    }
}
