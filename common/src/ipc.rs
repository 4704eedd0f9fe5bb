use serde::{Deserialize, Serialize};

use crate::job::{Environment, Job, JobId};
use crate::operation::{Action, Operation, OperationId};
use crate::view::ViewEntry;

/// Requests from a view to the daemon, one JSON document per line.
#[derive(Debug, Serialize, Deserialize)]
pub enum Request {
    Dispatch(Action),
    Recent { environment: Option<Environment> },
    GetJob(JobId),
    GetLogs(JobId),
    ClearHistory,
    Metrics,
    /// Answered once the view may have changed since `since`, or after `timeout_ms`.
    WaitForChange { since: u64, timeout_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(String),
    Dispatched(DispatchOutcome),
    Entries(Vec<ViewEntry>),
    JobDetail(Job),
    Logs(Vec<String>),
    Metrics(String),
    Revision(u64),
}

/// How a dispatched action left the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DispatchOutcome {
    /// Refused by the duplicate-submission guard.
    Rejected { reason: String, existing: Option<OperationId> },
    /// Accepted by the backend as a job; the poller now follows it.
    Submitted { operation: Operation, job_id: JobId },
    /// Reached a terminal state without a backend job.
    Finished(Operation),
}

impl DispatchOutcome {
    pub fn operation(&self) -> Option<&Operation> {
        match self {
            DispatchOutcome::Rejected { .. } => None,
            DispatchOutcome::Submitted { operation, .. } => Some(operation),
            DispatchOutcome::Finished(operation) => Some(operation),
        }
    }
}
