use common::{Environment, Job, JobId, ViewEntry};
use std::sync::Arc;
use std::time::Duration;

use crate::job_store::{JobStore, StoreError};
use crate::ledger::SharedLedger;
use crate::poller::Poller;
use crate::reconciler::reconcile;

/// Read side of the daemon: the merged recent-operations view and job lookups.
pub struct Dashboard {
    store: Arc<dyn JobStore>,
    ledger: SharedLedger,
    poller: Arc<Poller>,
}

impl Dashboard {
    pub fn new(store: Arc<dyn JobStore>, ledger: SharedLedger, poller: Arc<Poller>) -> Self {
        Self { store, ledger, poller }
    }

    /// Recent operations, newest first, optionally scoped to one environment.
    pub async fn recent(&self, scope: Option<&Environment>) -> Vec<ViewEntry> {
        let mut jobs = match self.store.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                log::warn!("Listing jobs failed, showing tracked jobs only: {}", e);
                Vec::new()
            }
        };

        // Ledger before cache: the poller removes an operation and caches its job under one lock,
        // so whichever side a snapshot misses, the other still has it.
        let operations = self.ledger.lock().snapshot();
        jobs.extend(self.poller.cached_jobs());

        reconcile(&jobs, &operations, scope)
    }

    /// Waits until the poller revision differs from `since`, or `timeout` passes.
    /// Returns the revision current at that point.
    pub async fn wait_for_change(&self, since: u64, timeout: Duration) -> u64 {
        let mut revisions = self.poller.subscribe();
        let current = *revisions.borrow_and_update();
        if current != since {
            return current;
        }
        if tokio::time::timeout(timeout, revisions.changed()).await.is_err() {
            log::trace!("No change after revision {} within {:?}", since, timeout);
        }
        let current = *revisions.borrow();
        current
    }

    pub async fn job(&self, id: &JobId) -> Result<Job, StoreError> {
        if let Some(job) = self.poller.cached_jobs().into_iter().find(|j| &j.id == id) {
            if job.status.is_terminal() {
                return Ok(job);
            }
        }
        self.store.get_job(id).await
    }

    pub async fn logs(&self, id: &JobId) -> Result<Vec<String>, StoreError> {
        self.store.get_logs(id).await
    }

    /// Deletes backend history, then local state. Local state is kept when the backend refuses.
    pub async fn clear_history(&self) -> Result<(), StoreError> {
        self.store.delete_all_jobs().await?;
        self.ledger.lock().clear();
        self.poller.forget_all();
        log::info!("History cleared");
        Ok(())
    }
}

#[cfg(test)]
#[path = "dashboard_tests.rs"]
mod tests;
