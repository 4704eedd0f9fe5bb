use common::api::API_VERSION;
use common::{
    Action, ActionKind, DispatchOutcome, ErrorCode, Job, JobId, Operation, OperationId, Status,
    SubmitRequest, SubmitResponse, TaskRef,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{ActionsConfig, Config, ErrorsConfig, PollingConfig};
use crate::job_store::JobStore;
use crate::ledger::{LedgerError, SharedLedger};
use crate::metrics::MetricsCollector;
use crate::poller::Poller;

/// Generates operation ids unique within and across daemon sessions:
/// `<verb>-<resource>-<epoch-ms>-<session><seq>`.
pub struct IdGenerator {
    session: String,
    seq: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        let session = uuid::Uuid::new_v4().simple().to_string();
        Self::with_session(&session[..8])
    }

    pub fn with_session(session: &str) -> Self {
        Self {
            session: session.to_string(),
            seq: AtomicU64::new(0),
        }
    }

    pub fn next(&self, kind: ActionKind, resource: &str) -> OperationId {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        OperationId(format!(
            "{}-{}-{}-{}{}",
            kind.verb(),
            slug(resource),
            chrono::Utc::now().timestamp_millis(),
            self.session,
            seq
        ))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn slug(resource: &str) -> String {
    let slug: String = resource
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '-' })
        .collect();
    if slug.is_empty() { "none".to_string() } else { slug }
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    ledger: SharedLedger,
    poller: Arc<Poller>,
    metrics: Arc<MetricsCollector>,
    ids: IdGenerator,
    actions: ActionsConfig,
    polling: PollingConfig,
    errors: ErrorsConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: SharedLedger,
        poller: Arc<Poller>,
        metrics: Arc<MetricsCollector>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            ledger,
            poller,
            metrics,
            ids: IdGenerator::new(),
            actions: config.actions.clone(),
            polling: config.polling.clone(),
            errors: config.errors.clone(),
        }
    }

    pub fn with_ids(mut self, ids: IdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// Runs one user action to a visible state. Never returns an error: every
    /// failure is recorded on the operation.
    pub async fn dispatch(&self, action: Action) -> DispatchOutcome {
        let kind = action.kind();
        let resource = action.resource().to_string();
        let task = self.actions.task_for(kind).clone();

        let listed = if kind.is_mutating() { self.listed_jobs().await } else { Vec::new() };

        let id = self.ids.next(kind, &resource);
        let op = Operation::starting(id.clone(), &action, Some(task.path().to_string()));

        let rejection = {
            // The poller moves an operation from the ledger into its cache while holding this lock.
            let mut ledger = self.ledger.lock();
            let running = if kind.is_mutating() {
                running_job_for(listed, self.poller.cached_jobs(), &task, &resource)
            } else {
                None
            };
            match running {
                Some(job) => Some((format!("{} already in progress for {} (job {})", kind, resource, job), None)),
                None => match ledger.begin(op.clone()) {
                    Ok(()) => None,
                    Err(LedgerError::AlreadyInProgress { existing, .. }) => {
                        Some((format!("{} already in progress for {}", kind, resource), Some(existing)))
                    }
                    Err(LedgerError::DuplicateId(dup)) => {
                        Some((format!("operation id {} already used", dup), Some(dup)))
                    }
                },
            }
        };
        if let Some((reason, existing)) = rejection {
            log::info!("Rejecting {}: {}", id, reason);
            self.metrics.record_rejection(kind);
            return DispatchOutcome::Rejected { reason, existing };
        }
        self.metrics.record_dispatch(kind);
        log::info!("Dispatching {} ({})", id, action.title());

        let response = match &action {
            Action::Delete { cluster, namespace, .. } => self
                .store
                .delete_cluster(cluster, namespace)
                .await
                .map(SubmitResponse::from),
            _ => self.store.submit(self.submission(&action, task, &id)).await,
        };

        match response {
            Ok(resp) => self.settle(op, resp),
            Err(e) => {
                log::error!("Submission of {} failed: {}", id, e);
                self.finish(op, Status::Failed(e.to_string()), None)
            }
        }
    }

    fn submission(&self, action: &Action, task: TaskRef, id: &OperationId) -> SubmitRequest {
        let mut extra_vars = BTreeMap::new();
        match action {
            Action::Verify { cluster, .. } => {
                extra_vars.insert("cluster_name".to_string(), cluster.clone());
            }
            Action::Configure { cluster, install_method, .. } => {
                extra_vars.insert("cluster_name".to_string(), cluster.clone());
                if let Some(method) = install_method {
                    extra_vars.insert("install_method".to_string(), method.clone());
                }
            }
            Action::Provision { cluster, custom_image, extra_vars: vars, .. } => {
                extra_vars.extend(vars.clone());
                extra_vars.insert("cluster_name".to_string(), cluster.clone());
                if let Some(image) = custom_image {
                    extra_vars.insert("custom_image".to_string(), image.clone());
                }
            }
            Action::RunTest { suite, extra_vars: vars, .. } => {
                extra_vars.extend(vars.clone());
                extra_vars.insert("test_suite".to_string(), suite.clone());
            }
            Action::Delete { .. } => {}
        }

        SubmitRequest {
            version: API_VERSION,
            task,
            description: action.title(),
            cluster_type: action.environment().cluster_type().to_string(),
            extra_vars,
            correlation_id: id.0.clone(),
        }
    }

    fn settle(&self, mut op: Operation, resp: SubmitResponse) -> DispatchOutcome {
        if let Some(job_id) = resp.job_id.clone().filter(|j| !j.is_empty()).map(JobId) {
            if resp.success != Some(false) {
                op.job_id = Some(job_id.clone());
                op.status = Status::Running;
                if resp.output.is_some() {
                    op.output = resp.output.clone();
                }
                let operation = {
                    let mut ledger = self.ledger.lock();
                    ledger.attach_job(&op.id, job_id.clone());
                    ledger.update_operation_status(&op.id, Status::Running, resp.output.clone());
                    ledger.get(&op.id).cloned().unwrap_or(op)
                };
                log::info!("{} accepted as job {}", operation.id, job_id);
                self.poller.track(
                    job_id.clone(),
                    Some(operation.id.clone()),
                    self.polling.policy_for(operation.kind),
                );
                return DispatchOutcome::Submitted { operation, job_id };
            }
        }

        if resp.succeeded() {
            let output = resp.output.or(resp.message);
            self.finish(op, Status::Completed, output)
        } else {
            let reason = self.failure_reason(&resp);
            log::warn!("{} failed: {}", op.id, reason);
            self.finish(op, Status::Failed(reason), resp.output)
        }
    }

    fn failure_reason(&self, resp: &SubmitResponse) -> String {
        let raw = resp
            .error
            .clone()
            .filter(|e| !e.trim().is_empty())
            .or_else(|| resp.message.clone())
            .unwrap_or_else(|| "backend reported failure".to_string());

        let code = match resp.error_code {
            Some(code) => code,
            None if self.errors.legacy_text_matching => {
                let haystack = format!("{}\n{}", raw, resp.output.as_deref().unwrap_or(""));
                ErrorCode::classify_text(&haystack)
            }
            None => ErrorCode::Unknown,
        };

        match code.remediation() {
            Some(hint) => format!("{}: {}", hint, raw),
            None => raw,
        }
    }

    fn finish(&self, mut op: Operation, status: Status, output: Option<String>) -> DispatchOutcome {
        if matches!(status, Status::Failed(_)) {
            self.metrics.record_failure(op.kind);
        }
        log::info!("{} finished: {}", op.id, status);
        op.status = status.clone();
        if output.is_some() {
            op.output = output.clone();
        }
        let mut ledger = self.ledger.lock();
        ledger.update_operation_status(&op.id, status, output);
        // The ledger copy wins; the local one only stands in if the entry was evicted.
        DispatchOutcome::Finished(ledger.get(&op.id).cloned().unwrap_or(op))
    }

    async fn listed_jobs(&self) -> Vec<Job> {
        match self.store.list_jobs().await {
            Ok(jobs) => jobs,
            Err(e) => {
                log::warn!("Could not list jobs for duplicate check, relying on ledger: {}", e);
                Vec::new()
            }
        }
    }
}

/// A non-terminal backend job running the same task for this resource.
/// Cached copies come after the listing and win, being fresher for the jobs the poller follows.
fn running_job_for(listed: Vec<Job>, cached: Vec<Job>, task: &TaskRef, resource: &str) -> Option<JobId> {
    let mut latest: BTreeMap<JobId, Job> = BTreeMap::new();
    for job in listed.into_iter().chain(cached) {
        latest.insert(job.id.clone(), job);
    }
    latest
        .into_values()
        .find(|job| {
            !job.status.is_terminal()
                && job.task_file.as_deref() == Some(task.path())
                && job.cluster.as_deref().map_or(true, |c| c == resource)
        })
        .map(|job| job.id)
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
