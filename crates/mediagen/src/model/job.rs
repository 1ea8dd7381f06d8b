use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a generation job.
///
/// `Pending -> Running -> Completed | Failed`. The only way back from a
/// terminal state is an explicit retry reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Kind of media a job produces. Also selects the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Image => "image",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(MediaType::Image),
            "video" => Ok(MediaType::Video),
            other => Err(format!("unknown media type '{}'", other)),
        }
    }
}

/// Per-unit generation parameters, stored with the job as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Video only.
    #[serde(default)]
    pub generate_audio: bool,
}

/// Snapshot of a job's progress counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JobCounters {
    pub completed_count: u32,
    pub failed_count: u32,
    pub variation_count: u32,
}

impl JobCounters {
    pub fn accounted(&self) -> u32 {
        self.completed_count + self.failed_count
    }

    pub fn remaining(&self) -> u32 {
        self.variation_count.saturating_sub(self.accounted())
    }

    /// Whether `completed + failed <= variation_count` holds.
    pub fn is_consistent(&self) -> bool {
        self.accounted() <= self.variation_count
    }
}

/// A request to produce `variation_count` media artifacts for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: String,
    pub product_id: String,
    pub job_type: MediaType,
    pub prompt: String,
    pub variation_count: u32,
    pub parameters: UnitParameters,
    /// Object-store paths of reference images, in request order.
    pub reference_paths: Vec<String>,
    pub status: JobStatus,
    pub completed_count: u32,
    pub failed_count: u32,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub claim_token: Option<String>,
    #[serde(skip_serializing)]
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl GenerationJob {
    /// Creates a pending job with a fresh identifier.
    pub fn new(
        product_id: impl Into<String>,
        job_type: MediaType,
        prompt: impl Into<String>,
        variation_count: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            job_type,
            prompt: prompt.into(),
            variation_count,
            parameters: UnitParameters::default(),
            reference_paths: Vec::new(),
            status: JobStatus::Pending,
            completed_count: 0,
            failed_count: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            claim_token: None,
            lease_expires_at: None,
        }
    }

    pub fn with_parameters(mut self, parameters: UnitParameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_references(mut self, paths: Vec<String>) -> Self {
        self.reference_paths = paths;
        self
    }

    pub fn counters(&self) -> JobCounters {
        JobCounters {
            completed_count: self.completed_count,
            failed_count: self.failed_count,
            variation_count: self.variation_count,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.counters().remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_remaining_saturates() {
        let counters = JobCounters {
            completed_count: 3,
            failed_count: 2,
            variation_count: 4,
        };
        assert_eq!(counters.remaining(), 0);
        assert!(!counters.is_consistent());
    }

    #[test]
    fn test_new_job_is_pending_with_zero_counts() {
        let job = GenerationJob::new("product-1", MediaType::Image, "a red mug", 3);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.remaining(), 3);
        assert!(job.started_at.is_none());
        assert!(job.claim_token.is_none());
    }

    #[test]
    fn test_parameters_serialize_compactly() {
        let params = UnitParameters {
            aspect_ratio: Some("1:1".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"aspect_ratio":"1:1","generate_audio":false}"#);
    }
}
