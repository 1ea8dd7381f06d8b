use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::MediaType;

/// Review state of a unit. Owned by the downstream approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            other => Err(format!("unknown approval status '{}'", other)),
        }
    }
}

/// One stored artifact of a job. Written once, never updated by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedUnit {
    pub id: String,
    pub job_id: String,
    pub variation_index: u32,
    pub media_type: MediaType,
    pub mime_type: String,
    pub original_path: String,
    pub thumbnail_path: Option<String>,
    pub preview_path: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<u32>,
    pub file_size: u64,
    pub approval_status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
}

impl GeneratedUnit {
    /// All object paths owned by this unit.
    pub fn object_paths(&self) -> Vec<String> {
        let mut paths = vec![self.original_path.clone()];
        paths.extend(self.thumbnail_path.iter().cloned());
        paths.extend(self.preview_path.iter().cloned());
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_paths_skip_missing_derivatives() {
        let unit = GeneratedUnit {
            id: "u1".into(),
            job_id: "j1".into(),
            variation_index: 0,
            media_type: MediaType::Video,
            mime_type: "video/mp4".into(),
            original_path: "generated/j1/0/original.mp4".into(),
            thumbnail_path: None,
            preview_path: None,
            width: None,
            height: None,
            duration_seconds: Some(8),
            file_size: 10,
            approval_status: ApprovalStatus::Pending,
            created_at: Utc::now(),
        };
        assert_eq!(unit.object_paths(), vec!["generated/j1/0/original.mp4"]);
    }
}
