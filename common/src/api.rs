//! Request and response bodies of the provisioning backend's HTTP API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::job::RawJob;

/// Version stamped on every outgoing body and the highest one accepted back.
pub const API_VERSION: u32 = 1;

/// What the backend should execute for a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRef {
    TaskFile(String),
    Playbook(String),
}

impl TaskRef {
    pub fn path(&self) -> &str {
        match self {
            TaskRef::TaskFile(p) | TaskRef::Playbook(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitRequest {
    pub version: u32,
    #[serde(flatten)]
    pub task: TaskRef,
    pub description: String,
    pub cluster_type: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_vars: BTreeMap<String, String>,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubmitResponse {
    pub version: Option<u32>,
    /// Absent on older deletion responses.
    pub success: Option<bool>,
    pub job_id: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobListResponse {
    pub version: Option<u32>,
    #[serde(default = "default_true")]
    pub success: bool,
    #[serde(default)]
    pub jobs: Vec<RawJob>,
    pub error: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeleteJobsResponse {
    #[serde(default)]
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeleteClusterResponse {
    pub version: Option<u32>,
    pub success: Option<bool>,
    pub job_id: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl SubmitResponse {
    /// Explicit `success` wins; without it, the absence of an error counts as success.
    pub fn succeeded(&self) -> bool {
        self.success.unwrap_or(self.error.is_none())
    }
}

impl From<DeleteClusterResponse> for SubmitResponse {
    fn from(resp: DeleteClusterResponse) -> Self {
        SubmitResponse {
            version: resp.version,
            success: resp.success,
            job_id: resp.job_id,
            output: resp.message.clone(),
            error: resp.error,
            error_code: resp.error_code,
            message: resp.message,
        }
    }
}

/// Backend failure categories, each with a remediation hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    LoginFailed,
    NeedsConfiguration,
    Timeout,
    NotFound,
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Matches free-text errors from backends that do not send `error_code`.
    pub fn classify_text(text: &str) -> ErrorCode {
        let lower = text.to_ascii_lowercase();
        if lower.contains("unauthorized") {
            ErrorCode::Unauthorized
        } else if lower.contains("login failed") {
            ErrorCode::LoginFailed
        } else if lower.contains("needs to be configured") {
            ErrorCode::NeedsConfiguration
        } else if lower.contains("timed out") {
            ErrorCode::Timeout
        } else if lower.contains("not found") {
            ErrorCode::NotFound
        } else {
            ErrorCode::Unknown
        }
    }

    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            ErrorCode::Unauthorized => Some("Authentication rejected: log in to the hub cluster (oc login) and retry"),
            ErrorCode::LoginFailed => Some("Login failed: check the OCP hub credentials in user_vars.yml"),
            ErrorCode::NeedsConfiguration => Some("CAPI/CAPA is not configured yet: run configure first"),
            ErrorCode::Timeout => Some("Backend timed out"),
            ErrorCode::NotFound => Some("Task or playbook not found on the backend"),
            ErrorCode::Unknown => None,
        }
    }
}
