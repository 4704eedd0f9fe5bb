//! Builders and an in-memory `JobStore` for unit tests.

use async_trait::async_trait;
use common::api::DeleteClusterResponse;
use common::{ActionKind, Environment, Job, JobId, Operation, OperationId, Status, SubmitRequest, SubmitResponse, Timestamp};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::job_store::{JobStore, StoreError};

pub fn operation(id: &str, kind: ActionKind, resource: &str, ts: i64) -> Operation {
    Operation {
        id: OperationId::from(id),
        kind,
        resource: resource.to_string(),
        title: format!("{} {}", kind, resource),
        status: Status::Starting,
        environment: Environment::Mce,
        timestamp: Timestamp(ts),
        output: None,
        playbook: None,
        job_id: None,
    }
}

pub fn job(id: &str, status: Status, ts: i64) -> Job {
    Job {
        id: JobId::from(id),
        status,
        description: format!("job {}", id),
        created_at: Timestamp(ts),
        environment: Some(Environment::Mce),
        logs: Vec::new(),
        task_file: None,
        cluster: None,
        correlation_id: None,
    }
}

/// One scripted answer to `get_job`.
#[derive(Debug, Clone)]
pub enum Step {
    NotFound,
    Unreachable,
    Status(Status),
    Log(Status, &'static str),
}

#[derive(Default)]
struct FakeState {
    jobs: BTreeMap<JobId, Job>,
    scripts: HashMap<JobId, VecDeque<Step>>,
    submit_responses: VecDeque<Result<SubmitResponse, StoreError>>,
    delete_responses: VecDeque<Result<DeleteClusterResponse, StoreError>>,
    submissions: Vec<SubmitRequest>,
    list_error: Option<StoreError>,
    delete_all_error: Option<StoreError>,
    get_calls: usize,
    list_calls: usize,
}

#[derive(Default)]
pub struct FakeJobStore {
    state: Mutex<FakeState>,
}

impl FakeJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_job(&self, job: Job) {
        self.state.lock().jobs.insert(job.id.clone(), job);
    }

    /// Answers for successive `get_job(id)` calls; the last step repeats.
    pub fn script(&self, id: &str, steps: Vec<Step>) {
        self.state.lock().scripts.insert(JobId::from(id), steps.into());
    }

    pub fn push_submit(&self, response: Result<SubmitResponse, StoreError>) {
        self.state.lock().submit_responses.push_back(response);
    }

    pub fn push_delete(&self, response: Result<DeleteClusterResponse, StoreError>) {
        self.state.lock().delete_responses.push_back(response);
    }

    pub fn fail_listing(&self, error: StoreError) {
        self.state.lock().list_error = Some(error);
    }

    pub fn fail_delete_all(&self, error: Option<StoreError>) {
        self.state.lock().delete_all_error = error;
    }

    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.state.lock().submissions.clone()
    }

    pub fn get_calls(&self) -> usize {
        self.state.lock().get_calls
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_calls
    }

    pub fn job_count(&self) -> usize {
        self.state.lock().jobs.len()
    }
}

#[async_trait]
impl JobStore for FakeJobStore {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, StoreError> {
        let mut state = self.state.lock();
        state.submissions.push(request);
        state
            .submit_responses
            .pop_front()
            .unwrap_or_else(|| Err(StoreError::Transport("no submit response scripted".into())))
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let mut state = self.state.lock();
        state.list_calls += 1;
        if let Some(err) = state.list_error.clone() {
            return Err(err);
        }
        Ok(state.jobs.values().cloned().collect())
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, StoreError> {
        let mut state = self.state.lock();
        state.get_calls += 1;

        let step = state.scripts.get_mut(id).and_then(|steps| {
            if steps.len() > 1 {
                steps.pop_front()
            } else {
                steps.front().cloned()
            }
        });

        let (status, line) = match step {
            None => return state.jobs.get(id).cloned().ok_or_else(|| StoreError::NotFound(id.clone())),
            Some(Step::NotFound) => return Err(StoreError::NotFound(id.clone())),
            Some(Step::Unreachable) => return Err(StoreError::Transport("connection refused".into())),
            Some(Step::Status(status)) => (status, None),
            Some(Step::Log(status, line)) => (status, Some(line)),
        };

        let entry = state
            .jobs
            .entry(id.clone())
            .or_insert_with(|| job(&id.0, Status::Running, Timestamp::now().as_millis()));
        entry.status = status;
        if let Some(line) = line {
            entry.logs.push(line.to_string());
        }
        Ok(entry.clone())
    }

    async fn get_logs(&self, id: &JobId) -> Result<Vec<String>, StoreError> {
        let state = self.state.lock();
        state
            .jobs
            .get(id)
            .map(|j| j.logs.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn delete_all_jobs(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(err) = state.delete_all_error.clone() {
            return Err(err);
        }
        state.jobs.clear();
        state.scripts.clear();
        Ok(())
    }

    async fn delete_cluster(&self, _name: &str, _namespace: &str) -> Result<DeleteClusterResponse, StoreError> {
        self.state
            .lock()
            .delete_responses
            .pop_front()
            .unwrap_or_else(|| Err(StoreError::Transport("no delete response scripted".into())))
    }
}
