use serde::{Deserialize, Serialize};

use crate::job::{Environment, Job, Status};
use crate::operation::Operation;
use crate::time::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    Ledger,
    JobStore,
}

/// One row of the merged recent-operations view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEntry {
    pub id: String,
    pub source: EntrySource,
    pub title: String,
    pub status: Status,
    pub environment: Option<Environment>,
    pub timestamp: Timestamp,
    pub output: Option<String>,
    pub playbook: Option<String>,
}

impl ViewEntry {
    pub fn from_job(job: &Job, environment: Option<Environment>) -> Self {
        let output = if job.logs.is_empty() {
            None
        } else {
            Some(job.logs.join("\n"))
        };
        Self {
            id: job.id.0.clone(),
            source: EntrySource::JobStore,
            title: job.description.clone(),
            status: job.status.clone(),
            environment,
            timestamp: job.created_at,
            output,
            playbook: job.task_file.clone(),
        }
    }

    pub fn from_operation(op: &Operation) -> Self {
        Self {
            id: op.id.0.clone(),
            source: EntrySource::Ledger,
            title: op.title.clone(),
            status: op.status.clone(),
            environment: Some(op.environment.clone()),
            timestamp: op.timestamp,
            output: op.output.clone(),
            playbook: op.playbook.clone(),
        }
    }

    pub fn display_status(&self) -> String {
        self.status.to_string()
    }
}
