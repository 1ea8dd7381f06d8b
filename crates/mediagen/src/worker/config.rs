use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::model::{JobCounters, JobStatus, MediaType};

pub const MAX_BATCH_SIZE: usize = 32;
pub const MAX_PARALLELISM: usize = 16;
pub const MAX_JOBS_PER_RUN: usize = 20;
pub const MIN_TIME_BUDGET: Duration = Duration::from_secs(1);
pub const MAX_TIME_BUDGET: Duration = Duration::from_secs(15 * 60);

/// Decides the terminal status of a fully accounted job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TerminalPolicy {
    /// Completed when at least one unit succeeded.
    #[default]
    AnySuccess,
    /// Completed only when no unit failed.
    AllSucceeded,
    /// Completed when `completed / variation_count >= ratio`.
    MinSuccessRatio { ratio: f64 },
}

impl TerminalPolicy {
    pub fn decide(&self, counters: &JobCounters) -> JobStatus {
        let completed = match self {
            TerminalPolicy::AnySuccess => counters.completed_count >= 1,
            TerminalPolicy::AllSucceeded => {
                counters.failed_count == 0 && counters.completed_count >= 1
            }
            TerminalPolicy::MinSuccessRatio { ratio } => {
                counters.variation_count > 0
                    && counters.completed_count >= 1
                    && counters.completed_count as f64 / counters.variation_count as f64 >= *ratio
            }
        };
        if completed {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        }
    }
}

/// Tuning for one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub batch_size: usize,
    pub parallelism: usize,
    pub time_budget: Duration,
}

impl RunOptions {
    /// Builds options clamped to sane bounds.
    pub fn new(batch_size: usize, parallelism: usize, time_budget: Duration) -> Self {
        Self {
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            parallelism: parallelism.clamp(1, MAX_PARALLELISM),
            time_budget: time_budget.clamp(MIN_TIME_BUDGET, MAX_TIME_BUDGET),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.worker.batch_size,
            config.worker.parallelism,
            Duration::from_millis(config.worker.time_budget_ms),
        )
    }

    /// Replaces any field given in the overrides, then re-clamps.
    pub fn with_overrides(
        self,
        batch_size: Option<usize>,
        parallelism: Option<usize>,
        time_budget_ms: Option<u64>,
    ) -> Self {
        Self::new(
            batch_size.unwrap_or(self.batch_size),
            parallelism.unwrap_or(self.parallelism),
            time_budget_ms
                .map(Duration::from_millis)
                .unwrap_or(self.time_budget),
        )
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(4, 4, Duration::from_secs(240))
    }
}

/// Invocation-independent worker behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerSettings {
    pub policy: TerminalPolicy,
    pub persist_attempts: u32,
    pub persist_retry_delay: Duration,
    pub lease_grace: Duration,
    pub max_variations: u32,
    pub cost_per_image: f64,
    pub cost_per_video: f64,
    pub default_image_model: String,
    pub default_video_model: String,
    pub key_prefix: String,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        let worker = &config.worker;
        Self {
            policy: worker.terminal_policy,
            persist_attempts: worker.persist_attempts.max(1),
            persist_retry_delay: Duration::from_millis(worker.persist_retry_delay_ms),
            lease_grace: Duration::from_millis(worker.lease_grace_ms),
            max_variations: worker.max_variations,
            cost_per_image: worker.cost_per_image,
            cost_per_video: worker.cost_per_video,
            default_image_model: config.providers.image.model.clone(),
            default_video_model: config.providers.video.model.clone(),
            key_prefix: config.storage.key_prefix.trim_matches('/').to_string(),
        }
    }

    pub fn unit_cost(&self, media_type: MediaType) -> f64 {
        match media_type {
            MediaType::Image => self.cost_per_image,
            MediaType::Video => self.cost_per_video,
        }
    }

    pub fn default_model(&self, media_type: MediaType) -> &str {
        match media_type {
            MediaType::Image => &self.default_image_model,
            MediaType::Video => &self.default_video_model,
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
