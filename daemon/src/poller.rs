//! Shared poller for backend jobs that outlive their submission request.
//!
//! Every tracked job holds one reference on the background task: the task is
//! spawned when the first job is tracked and exits when the last one reaches a
//! terminal state or times out. Polls run one at a time.

use common::{Job, JobId, Operation, OperationId, Status, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::PollPolicy;
use crate::job_store::JobStore;
use crate::ledger::{Ledger, SharedLedger};
use crate::metrics::MetricsCollector;

/// Cached jobs kept before terminal ones start being evicted.
const MAX_CACHED_JOBS: usize = 1000;

struct Tracked {
    operation: Option<OperationId>,
    /// The superseded ledger entry, used to fill fields the backend omits.
    origin: Option<Operation>,
    policy: PollPolicy,
    attempts: u32,
    next_due: Instant,
    logged_lines: usize,
}

#[derive(Default)]
struct PollerState {
    tracked: HashMap<JobId, Tracked>,
    cache: BTreeMap<JobId, Job>,
    task: Option<JoinHandle<()>>,
    shutdown: bool,
}

struct Shared {
    store: Arc<dyn JobStore>,
    ledger: SharedLedger,
    metrics: Arc<MetricsCollector>,
    state: Mutex<PollerState>,
    wake: Notify,
    revision: watch::Sender<u64>,
}

pub struct Poller {
    shared: Arc<Shared>,
}

impl Poller {
    pub fn new(store: Arc<dyn JobStore>, ledger: SharedLedger, metrics: Arc<MetricsCollector>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                store,
                ledger,
                metrics,
                state: Mutex::new(PollerState::default()),
                wake: Notify::new(),
                revision,
            }),
        }
    }

    /// Follow `job_id` until it is terminal or `policy.max_attempts` polls have passed.
    /// `operation` is the ledger entry the job supersedes.
    pub fn track(&self, job_id: JobId, operation: Option<OperationId>, policy: PollPolicy) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            log::warn!("Poller is shut down, not tracking job {}", job_id);
            return;
        }

        log::info!("Tracking job {} every {:?} (max {} polls)", job_id, policy.interval, policy.max_attempts);
        state.tracked.entry(job_id).or_insert(Tracked {
            operation,
            origin: None,
            policy,
            attempts: 0,
            next_due: Instant::now() + policy.interval,
            logged_lines: 0,
        });
        self.shared.metrics.set_tracked_jobs(state.tracked.len() as u64);
        self.shared.revision.send_modify(|rev| *rev += 1);

        if state.task.is_none() {
            log::debug!("Poller starting");
            state.task = Some(tokio::spawn(run(self.shared.clone())));
        } else {
            self.shared.wake.notify_one();
        }
    }

    /// Revision counter bumped when tracking starts, when a poll tick changed job state and on `forget_all`.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Latest known state of every job this poller has seen.
    pub fn cached_jobs(&self) -> Vec<Job> {
        self.shared.state.lock().cache.values().cloned().collect()
    }

    pub fn is_tracking(&self, job_id: &JobId) -> bool {
        self.shared.state.lock().tracked.contains_key(job_id)
    }

    pub fn tracked_len(&self) -> usize {
        self.shared.state.lock().tracked.len()
    }

    /// True when no background task is running.
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().task.is_none()
    }

    /// Drops all tracking and cached jobs. The task exits on its next wake.
    pub fn forget_all(&self) {
        let mut state = self.shared.state.lock();
        state.tracked.clear();
        state.cache.clear();
        self.shared.metrics.set_tracked_jobs(0);
        self.shared.revision.send_modify(|rev| *rev += 1);
        self.shared.wake.notify_one();
    }

    pub fn shutdown(&self) {
        let handle = {
            let mut state = self.shared.state.lock();
            if !state.shutdown {
                log::info!("Poller shutting down ({} jobs still tracked)", state.tracked.len());
            }
            state.shutdown = true;
            state.tracked.clear();
            state.task.take()
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run(shared: Arc<Shared>) {
    loop {
        let next_due = {
            let mut state = shared.state.lock();
            let next = state.tracked.values().map(|t| t.next_due).min();
            match next {
                Some(due) if !state.shutdown => due,
                _ => {
                    log::debug!("Poller idle");
                    state.task = None;
                    return;
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep_until(next_due) => {}
            _ = shared.wake.notified() => continue,
        }

        let due: Vec<JobId> = {
            let state = shared.state.lock();
            let now = Instant::now();
            let mut due: Vec<(&JobId, Instant)> = state
                .tracked
                .iter()
                .filter(|(_, t)| t.next_due <= now)
                .map(|(id, t)| (id, t.next_due))
                .collect();
            due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
            let ids: Vec<JobId> = due.into_iter().map(|(id, _)| id.clone()).collect();
            ids
        };

        let mut changed = false;
        for id in due {
            let stopped = shared.state.lock().shutdown;
            if stopped {
                break;
            }
            changed |= poll_once(&shared, &id).await;
        }
        if changed {
            shared.revision.send_modify(|rev| *rev += 1);
        }
    }
}

/// Returns true when the visible state changed.
async fn poll_once(shared: &Shared, id: &JobId) -> bool {
    shared.metrics.record_poll();
    let result = shared.store.get_job(id).await;

    // Ledger before state, the same order the dispatcher's duplicate guard takes them in.
    let mut ledger = shared.ledger.lock();
    let mut state = shared.state.lock();
    let Some(tracked) = state.tracked.get_mut(id) else {
        // Forgotten while the request was in flight.
        return false;
    };
    tracked.attempts += 1;
    tracked.next_due = Instant::now() + tracked.policy.interval;
    let attempts = tracked.attempts;
    let max_attempts = tracked.policy.max_attempts;

    let mut changed = false;
    match result {
        Ok(mut job) => {
            let start = if job.logs.len() < tracked.logged_lines { 0 } else { tracked.logged_lines };
            for line in &job.logs[start..] {
                log::info!(target: "job_output", "[{}] {}", id, line);
            }
            tracked.logged_lines = job.logs.len();

            if let Some(op) = tracked.operation.take() {
                tracked.origin = ledger.remove_operation(&op);
            }
            if let Some(origin) = &tracked.origin {
                fill_from_origin(&mut job, origin);
            }

            let terminal = job.status.is_terminal();
            if terminal {
                log::info!("Job {} finished: {}", id, job.status);
            }
            state.cache.insert(id.clone(), job);
            prune_cache(&mut state.cache);
            if terminal {
                state.tracked.remove(id);
                shared.metrics.set_tracked_jobs(state.tracked.len() as u64);
                return true;
            }
            changed = true;
        }
        Err(e) if e.is_transient() => {
            log::debug!("Job {} not available yet (attempt {}): {}", id, attempts, e);
        }
        Err(e) => {
            log::warn!("Polling job {} failed (attempt {}): {}", id, attempts, e);
        }
    }

    if attempts >= max_attempts {
        time_out(shared, &mut ledger, &mut state, id, attempts);
        return true;
    }
    changed
}

fn fill_from_origin(job: &mut Job, origin: &Operation) {
    if job.environment.is_none() {
        job.environment = Some(origin.environment.clone());
    }
    if job.task_file.is_none() {
        job.task_file = origin.playbook.clone();
    }
    if job.cluster.is_none() {
        job.cluster = Some(origin.resource.clone());
    }
    if job.correlation_id.is_none() {
        job.correlation_id = Some(origin.id.0.clone());
    }
}

/// Stand-in record for a job the backend never returned, so the failure outranks a stale listing.
fn placeholder_job(id: &JobId, origin: Option<&Operation>) -> Job {
    let mut job = Job {
        id: id.clone(),
        status: Status::Running,
        description: format!("Job {}", id),
        created_at: origin.map(|op| op.timestamp).unwrap_or_else(Timestamp::now),
        environment: None,
        logs: Vec::new(),
        task_file: None,
        cluster: None,
        correlation_id: None,
    };
    if let Some(op) = origin {
        job.description = op.title.clone();
        fill_from_origin(&mut job, op);
    }
    job
}

fn prune_cache(cache: &mut BTreeMap<JobId, Job>) {
    while cache.len() > MAX_CACHED_JOBS {
        let oldest = cache
            .values()
            .filter(|j| j.status.is_terminal())
            .min_by_key(|j| j.created_at)
            .map(|j| j.id.clone());
        match oldest {
            Some(id) => {
                cache.remove(&id);
            }
            None => break,
        }
    }
}

fn time_out(shared: &Shared, ledger: &mut Ledger, state: &mut PollerState, id: &JobId, attempts: u32) {
    let reason = format!("timed out after {} polls", attempts);
    log::warn!("Job {} {}", id, reason);

    let Some(tracked) = state.tracked.remove(id) else { return };
    let origin = match (&tracked.origin, &tracked.operation) {
        (Some(origin), _) => Some(origin.clone()),
        (None, Some(op)) => ledger.get(op).cloned(),
        (None, None) => None,
    };
    if let Some(op) = &tracked.operation {
        ledger.update_operation_status(op, Status::Failed(reason.clone()), None);
    }

    let job = state
        .cache
        .entry(id.clone())
        .or_insert_with(|| placeholder_job(id, origin.as_ref()));
    job.status = Status::Failed(reason);
    prune_cache(&mut state.cache);

    shared.metrics.record_poll_timeout();
    shared.metrics.set_tracked_jobs(state.tracked.len() as u64);
}

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;
