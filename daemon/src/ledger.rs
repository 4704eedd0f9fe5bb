//! Optimistic ledger of operations the daemon believes are in flight or
//! recently finished. Entries appear before the backend has answered and are
//! dropped once the backend's job supersedes them.

use common::{ActionKind, JobId, Operation, OperationId, Status};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

pub type SharedLedger = Arc<Mutex<Ledger>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("operation {0} already exists")]
    DuplicateId(OperationId),
    #[error("{kind} already in progress for {resource} ({existing})")]
    AlreadyInProgress {
        kind: ActionKind,
        resource: String,
        existing: OperationId,
    },
}

/// Newest first.
#[derive(Debug)]
pub struct Ledger {
    entries: VecDeque<Operation>,
    max_entries: usize,
}

impl Ledger {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn shared(max_entries: usize) -> SharedLedger {
        Arc::new(Mutex::new(Self::new(max_entries)))
    }

    pub fn add_to_recent(&mut self, op: Operation) -> Result<(), LedgerError> {
        if self.entries.iter().any(|e| e.id == op.id) {
            return Err(LedgerError::DuplicateId(op.id));
        }
        self.entries.push_front(op);
        self.enforce_cap();
        Ok(())
    }

    /// Inserts `op` unless a non-terminal operation of the same mutating kind
    /// already targets the same resource. Check and insert share one lock.
    pub fn begin(&mut self, op: Operation) -> Result<(), LedgerError> {
        if op.kind.is_mutating() {
            if let Some(existing) = self.find_active(op.kind, &op.resource) {
                return Err(LedgerError::AlreadyInProgress {
                    kind: op.kind,
                    resource: op.resource.clone(),
                    existing: existing.id.clone(),
                });
            }
        }
        self.add_to_recent(op)
    }

    pub fn find_active(&self, kind: ActionKind, resource: &str) -> Option<&Operation> {
        self.entries
            .iter()
            .find(|e| e.kind == kind && e.resource == resource && !e.status.is_terminal())
    }

    /// Returns false when the entry is gone (already pruned or superseded).
    pub fn update_operation_status(
        &mut self,
        id: &OperationId,
        status: Status,
        output: Option<String>,
    ) -> bool {
        match self.entries.iter_mut().find(|e| &e.id == id) {
            Some(entry) => {
                entry.status = status;
                if output.is_some() {
                    entry.output = output;
                }
                true
            }
            None => false,
        }
    }

    pub fn attach_job(&mut self, id: &OperationId, job_id: JobId) -> bool {
        match self.entries.iter_mut().find(|e| &e.id == id) {
            Some(entry) => {
                entry.job_id = Some(job_id);
                true
            }
            None => false,
        }
    }

    pub fn remove_operation(&mut self, id: &OperationId) -> Option<Operation> {
        let idx = self.entries.iter().position(|e| &e.id == id)?;
        self.entries.remove(idx)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, id: &OperationId) -> Option<&Operation> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn snapshot(&self) -> Vec<Operation> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Evict the oldest terminal entries first; in-flight entries only go when
    // nothing terminal is left.
    fn enforce_cap(&mut self) {
        while self.entries.len() > self.max_entries {
            let victim = self
                .entries
                .iter()
                .rposition(|e| e.status.is_terminal())
                .unwrap_or(self.entries.len() - 1);
            if let Some(evicted) = self.entries.remove(victim) {
                log::debug!("Ledger full, evicting {}", evicted.id);
            }
        }
    }
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
