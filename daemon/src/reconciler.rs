//! Merges backend jobs and optimistic ledger operations into one ordered view.
//!
//! An operation is superseded by a job when the job echoes the operation id as
//! its correlation id, or when the operation recorded the job id from the
//! submission response. Superseded operations are not shown; the job is.

use common::{Environment, Job, JobId, Operation, ViewEntry};
use std::collections::{BTreeMap, HashMap, HashSet};

pub fn reconcile(jobs: &[Job], operations: &[Operation], scope: Option<&Environment>) -> Vec<ViewEntry> {
    // Later copies of a job id win (poller cache is passed after the listing).
    let mut unique: BTreeMap<&JobId, &Job> = BTreeMap::new();
    for job in jobs {
        unique.insert(&job.id, job);
    }

    let by_correlation: HashMap<&str, &Operation> = operations.iter().map(|op| (op.id.0.as_str(), op)).collect();
    let by_job_id: HashMap<&JobId, &Operation> = operations
        .iter()
        .filter_map(|op| op.job_id.as_ref().map(|jid| (jid, op)))
        .collect();

    let mut superseded: HashSet<&str> = HashSet::new();
    let mut entries = Vec::with_capacity(unique.len() + operations.len());

    for job in unique.values() {
        let correlated = job
            .correlation_id
            .as_deref()
            .and_then(|cid| by_correlation.get(cid))
            .or_else(|| by_job_id.get(&job.id))
            .copied();
        if let Some(op) = correlated {
            superseded.insert(op.id.0.as_str());
        }
        let environment = job
            .environment
            .clone()
            .or_else(|| correlated.map(|op| op.environment.clone()));
        entries.push(ViewEntry::from_job(job, environment));
    }

    entries.extend(
        operations
            .iter()
            .filter(|op| !superseded.contains(op.id.0.as_str()))
            .map(ViewEntry::from_operation),
    );

    if let Some(scope) = scope {
        entries.retain(|e| e.environment.as_ref() == Some(scope));
    }

    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    entries
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
