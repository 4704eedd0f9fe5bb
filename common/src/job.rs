use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::time::Timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// Lifecycle state shared by ledger operations and backend jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum Status {
    Starting,
    Running,
    Completed,
    Failed(String),
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed(_))
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Status::Starting | Status::Running => "⏳",
            Status::Completed => "✅",
            Status::Failed(_) => "❌",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Status::Starting => "starting",
            Status::Running => "running",
            Status::Completed => "completed",
            Status::Failed(_) => "failed",
        }
    }

    /// Maps a backend status string. `pending` is treated as running.
    pub fn from_wire(status: &str, reason: Option<&str>) -> Result<Self, ValidationError> {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" | "running" => Ok(Status::Running),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed(
                reason.filter(|r| !r.trim().is_empty()).unwrap_or("failed").to_string(),
            )),
            other => Err(ValidationError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Failed(reason) => write!(f, "{} failed: {}", self.glyph(), reason),
            _ => write!(f, "{} {}", self.glyph(), self.label()),
        }
    }
}

/// Target hub. The set is open: unknown tags are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Environment {
    Mce,
    Minikube,
    Other(String),
}

impl Environment {
    pub fn as_str(&self) -> &str {
        match self {
            Environment::Mce => "mce",
            Environment::Minikube => "minikube",
            Environment::Other(tag) => tag,
        }
    }

    /// Cluster type sent with submissions.
    pub fn cluster_type(&self) -> &str {
        match self {
            Environment::Mce => "mce",
            Environment::Minikube => "kind",
            Environment::Other(tag) => tag,
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        match tag.as_str() {
            "" => Err(ValidationError::Missing("environment")),
            "mce" => Ok(Environment::Mce),
            "minikube" => Ok(Environment::Minikube),
            _ => Ok(Environment::Other(tag)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Environment {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Environment {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field `{0}`")]
    Missing(&'static str),
    #[error("unknown job status `{0}`")]
    UnknownStatus(String),
    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),
}

/// A backend-confirmed job after boundary validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub status: Status,
    pub description: String,
    pub created_at: Timestamp,
    pub environment: Option<Environment>,
    #[serde(default)]
    pub logs: Vec<String>,
    pub task_file: Option<String>,
    pub cluster: Option<String>,
    pub correlation_id: Option<String>,
}

/// Job record as the backend sends it. Field presence is not trusted;
/// convert with `Job::try_from`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJob {
    pub id: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub description: Option<String>,
    pub suite_title: Option<String>,
    pub created_at: Option<serde_json::Value>,
    pub started_at: Option<serde_json::Value>,
    pub environment: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    pub task_file: Option<String>,
    pub yaml_file: Option<String>,
    pub playbook: Option<String>,
    pub cluster_name: Option<String>,
    pub correlation_id: Option<String>,
}

fn timestamp_from_value(value: &serde_json::Value) -> Result<Timestamp, ValidationError> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64().and_then(Timestamp::from_number),
        serde_json::Value::String(s) => Timestamp::parse(s),
        _ => None,
    };
    parsed.ok_or_else(|| ValidationError::InvalidTimestamp(value.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<RawJob> for Job {
    type Error = ValidationError;

    fn try_from(raw: RawJob) -> Result<Self, Self::Error> {
        let id = non_empty(raw.id).ok_or(ValidationError::Missing("id"))?;
        let status_str = raw.status.ok_or(ValidationError::Missing("status"))?;
        let reason = raw.error.as_deref().filter(|e| !e.trim().is_empty()).or(raw.message.as_deref());
        let status = Status::from_wire(&status_str, reason)?;

        let created_at = match raw.created_at.as_ref().or(raw.started_at.as_ref()) {
            Some(value) => timestamp_from_value(value)?,
            None => return Err(ValidationError::Missing("created_at")),
        };

        let environment = match non_empty(raw.environment) {
            Some(tag) => Some(tag.parse()?),
            None => None,
        };

        let description = non_empty(raw.description)
            .or(non_empty(raw.suite_title))
            .unwrap_or_else(|| format!("Job {}", id));

        Ok(Job {
            id: JobId(id),
            status,
            description,
            created_at,
            environment,
            logs: raw.logs,
            task_file: non_empty(raw.task_file).or(non_empty(raw.yaml_file)).or(non_empty(raw.playbook)),
            cluster: non_empty(raw.cluster_name),
            correlation_id: non_empty(raw.correlation_id),
        })
    }
}
