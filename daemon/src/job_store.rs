use async_trait::async_trait;
use common::api::{DeleteClusterResponse, DeleteJobsResponse, JobListResponse, LogsResponse};
use common::{Job, JobId, RawJob, SubmitRequest, SubmitResponse, TaskRef, API_VERSION};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("backend unreachable: {0}")]
    Transport(String),
    #[error("backend returned HTTP {code}: {body}")]
    Status { code: u16, body: String },
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
    #[error("backend API version {0} is newer than supported version {API_VERSION}")]
    UnsupportedVersion(u32),
}

impl StoreError {
    /// Errors worth another try on the next poll tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::Transport(_))
    }
}

/// The backend's record of submitted jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, StoreError>;
    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;
    async fn get_job(&self, id: &JobId) -> Result<Job, StoreError>;
    async fn get_logs(&self, id: &JobId) -> Result<Vec<String>, StoreError>;
    async fn delete_all_jobs(&self) -> Result<(), StoreError>;
    async fn delete_cluster(&self, name: &str, namespace: &str) -> Result<DeleteClusterResponse, StoreError>;
}

fn check_version(version: Option<u32>) -> Result<(), StoreError> {
    match version {
        Some(v) if v > API_VERSION => Err(StoreError::UnsupportedVersion(v)),
        _ => Ok(()),
    }
}

/// Validates a job list, dropping malformed records and keeping the newest `max_jobs`.
pub fn decode_job_list(resp: JobListResponse, max_jobs: usize) -> Result<Vec<Job>, StoreError> {
    check_version(resp.version)?;
    if !resp.success {
        return Err(StoreError::InvalidResponse(
            resp.error.unwrap_or_else(|| "job listing reported failure".to_string()),
        ));
    }
    let mut jobs: Vec<Job> = resp
        .jobs
        .into_iter()
        .filter_map(|raw| {
            let hint = raw.id.clone().unwrap_or_default();
            match Job::try_from(raw) {
                Ok(job) => Some(job),
                Err(e) => {
                    log::warn!("Skipping malformed job {:?}: {}", hint, e);
                    None
                }
            }
        })
        .collect();
    if jobs.len() > max_jobs {
        log::warn!("Backend returned {} jobs, keeping newest {}", jobs.len(), max_jobs);
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(max_jobs);
    }
    Ok(jobs)
}

pub fn decode_job(raw: RawJob) -> Result<Job, StoreError> {
    Job::try_from(raw).map_err(|e| StoreError::InvalidResponse(e.to_string()))
}

pub struct HttpJobStore {
    client: reqwest::Client,
    base_url: String,
    max_jobs: usize,
}

impl HttpJobStore {
    pub fn new(base_url: &str, timeout: Duration, max_jobs: usize) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_jobs,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, StoreError> {
        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status { code: status.as_u16(), body })
    }

    async fn json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, StoreError> {
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }
}

fn not_found_as(id: &JobId, err: StoreError) -> StoreError {
    match err {
        StoreError::Status { code: 404, .. } => StoreError::NotFound(id.clone()),
        other => other,
    }
}

#[async_trait]
impl JobStore for HttpJobStore {
    async fn submit(&self, request: SubmitRequest) -> Result<SubmitResponse, StoreError> {
        let path = match request.task {
            TaskRef::TaskFile(_) => "/api/ansible/run-task",
            TaskRef::Playbook(_) => "/api/ansible/run-playbook",
        };
        log::debug!("POST {} ({})", path, request.correlation_id);
        let response = self.send(self.client.post(self.url(path)).json(&request)).await?;
        let body: SubmitResponse = Self::json(response).await?;
        check_version(body.version)?;
        Ok(body)
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        let response = self.send(self.client.get(self.url("/api/jobs"))).await?;
        decode_job_list(Self::json(response).await?, self.max_jobs)
    }

    async fn get_job(&self, id: &JobId) -> Result<Job, StoreError> {
        let url = self.url(&format!("/api/jobs/{}", id));
        let response = self.send(self.client.get(url)).await.map_err(|e| not_found_as(id, e))?;
        decode_job(Self::json(response).await?)
    }

    async fn get_logs(&self, id: &JobId) -> Result<Vec<String>, StoreError> {
        let url = self.url(&format!("/api/jobs/{}/logs", id));
        let response = self.send(self.client.get(url)).await.map_err(|e| not_found_as(id, e))?;
        let body: LogsResponse = Self::json(response).await?;
        Ok(body.logs)
    }

    async fn delete_all_jobs(&self) -> Result<(), StoreError> {
        let response = self.send(self.client.delete(self.url("/api/jobs"))).await?;
        let body: DeleteJobsResponse = Self::json(response).await?;
        if body.success {
            Ok(())
        } else {
            Err(StoreError::InvalidResponse(
                body.error.unwrap_or_else(|| "job deletion reported failure".to_string()),
            ))
        }
    }

    async fn delete_cluster(&self, name: &str, namespace: &str) -> Result<DeleteClusterResponse, StoreError> {
        let version = API_VERSION.to_string();
        let request = self
            .client
            .delete(self.url(&format!("/api/clusters/{}", name)))
            .query(&[("namespace", namespace), ("version", version.as_str())]);
        let response = self.send(request).await?;
        let body: DeleteClusterResponse = Self::json(response).await?;
        check_version(body.version)?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};

    fn list(json: serde_json::Value) -> JobListResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn malformed_jobs_are_skipped() {
        let resp = list(serde_json::json!({
            "success": true,
            "jobs": [
                {"id": "ok", "status": "running", "created_at": "2024-05-01T10:00:00"},
                {"id": "bad", "status": "weird", "created_at": "2024-05-01T10:00:00"},
                {"status": "running", "created_at": 1}
            ]
        }));
        let jobs = decode_job_list(resp, 10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, JobId::from("ok"));
    }

    #[test]
    fn list_is_capped_to_newest() {
        let resp = list(serde_json::json!({
            "jobs": [
                {"id": "old", "status": "completed", "created_at": 1000},
                {"id": "new", "status": "completed", "created_at": 3000},
                {"id": "mid", "status": "completed", "created_at": 2000}
            ]
        }));
        let jobs = decode_job_list(resp, 2).unwrap();
        let ids: Vec<_> = jobs.iter().map(|j| j.id.0.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }

    #[test]
    fn newer_api_version_is_rejected() {
        let resp = list(serde_json::json!({"version": 2, "success": true, "jobs": []}));
        assert_eq!(decode_job_list(resp, 10).unwrap_err(), StoreError::UnsupportedVersion(2));
    }

    #[test]
    fn unsuccessful_listing_is_an_error() {
        let resp = list(serde_json::json!({"success": false, "error": "db locked"}));
        assert_eq!(
            decode_job_list(resp, 10).unwrap_err(),
            StoreError::InvalidResponse("db locked".into())
        );
    }

    #[test]
    fn http_404_maps_to_not_found() {
        let id = JobId::from("j9");
        let err = not_found_as(&id, StoreError::Status { code: 404, body: String::new() });
        assert_eq!(err, StoreError::NotFound(id.clone()));
        assert!(err.is_transient());
        let err = not_found_as(&id, StoreError::Status { code: 500, body: "x".into() });
        assert!(!err.is_transient());
    }

    /// Minimal HTTP/1.1 backend answering scripted `(status, body)` pairs in order.
    struct StubBackend {
        url: String,
        seen: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl StubBackend {
        async fn start(replies: Vec<(u16, serde_json::Value)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let seen = Arc::new(Mutex::new(Vec::new()));
            let log = seen.clone();
            tokio::spawn(async move {
                for (code, body) in replies {
                    let (socket, _) = listener.accept().await.unwrap();
                    answer(socket, code, body, &log).await;
                }
            });
            Self { url, seen }
        }

        fn store(&self) -> HttpJobStore {
            HttpJobStore::new(&self.url, Duration::from_secs(5), 10).unwrap()
        }

        fn seen(&self) -> Vec<(String, String)> {
            self.seen.lock().clone()
        }
    }

    /// Records one request as `("METHOD target", body)`, then answers it.
    async fn answer(socket: TcpStream, code: u16, reply: serde_json::Value, log: &Mutex<Vec<(String, String)>>) {
        let (reader, mut writer) = socket.into_split();
        let mut reader = BufReader::new(reader);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await.unwrap();
        let mut length = 0;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).await.unwrap();
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    length = value.trim().parse().unwrap();
                }
            }
        }
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.unwrap();
        let mut parts = request_line.split_whitespace();
        let target = format!("{} {}", parts.next().unwrap_or(""), parts.next().unwrap_or(""));
        log.lock().push((target, String::from_utf8(body).unwrap()));

        let payload = reply.to_string();
        let response = format!(
            "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            code,
            payload.len(),
            payload
        );
        writer.write_all(response.as_bytes()).await.unwrap();
        writer.shutdown().await.unwrap();
    }

    fn request(task: TaskRef) -> SubmitRequest {
        SubmitRequest {
            version: API_VERSION,
            task,
            description: "Configure hub".into(),
            cluster_type: "mce".into(),
            extra_vars: Default::default(),
            correlation_id: "configure-hub-1".into(),
        }
    }

    #[tokio::test]
    async fn submissions_pick_endpoint_by_task_kind() {
        let accepted = serde_json::json!({"success": true, "job_id": "j1"});
        let backend = StubBackend::start(vec![(200, accepted.clone()), (200, accepted)]).await;
        let store = backend.store();

        let resp = store.submit(request(TaskRef::TaskFile("tasks/enable_capi_capa.yml".into()))).await.unwrap();
        assert_eq!(resp.job_id.as_deref(), Some("j1"));
        store.submit(request(TaskRef::Playbook("create_rosa_hcp_cluster.yaml".into()))).await.unwrap();

        let seen = backend.seen();
        assert_eq!(seen[0].0, "POST /api/ansible/run-task");
        assert_eq!(seen[1].0, "POST /api/ansible/run-playbook");
        let body: serde_json::Value = serde_json::from_str(&seen[0].1).unwrap();
        assert_eq!(body["task_file"], "tasks/enable_capi_capa.yml");
        assert_eq!(body["correlation_id"], "configure-hub-1");
        let body: serde_json::Value = serde_json::from_str(&seen[1].1).unwrap();
        assert_eq!(body["playbook"], "create_rosa_hcp_cluster.yaml");
    }

    #[tokio::test]
    async fn submit_rejects_newer_api_version() {
        let backend = StubBackend::start(vec![(200, serde_json::json!({"version": 2, "success": true}))]).await;
        let err = backend
            .store()
            .submit(request(TaskRef::TaskFile("tasks/enable_capi_capa.yml".into())))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::UnsupportedVersion(2));
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let backend = StubBackend::start(vec![(404, serde_json::json!({"detail": "Job not found"}))]).await;
        let err = backend.store().get_job(&JobId::from("j9")).await.unwrap_err();
        assert_eq!(err, StoreError::NotFound(JobId::from("j9")));
        assert_eq!(backend.seen()[0].0, "GET /api/jobs/j9");
    }

    #[tokio::test]
    async fn server_error_keeps_status_and_body() {
        let backend = StubBackend::start(vec![(500, serde_json::json!({"detail": "boom"}))]).await;
        let err = backend.store().list_jobs().await.unwrap_err();
        assert!(matches!(err, StoreError::Status { code: 500, ref body } if body.contains("boom")));
    }

    #[tokio::test]
    async fn listing_decodes_jobs() {
        let backend = StubBackend::start(vec![(
            200,
            serde_json::json!({
                "success": true,
                "jobs": [
                    {"id": "j1", "status": "running", "created_at": 1000},
                    {"id": "j2", "status": "completed", "created_at": "2024-05-01T10:00:00"}
                ]
            }),
        )])
        .await;
        let jobs = backend.store().list_jobs().await.unwrap();
        let ids: Vec<_> = jobs.iter().map(|j| j.id.0.as_str()).collect();
        assert_eq!(ids, vec!["j1", "j2"]);
        assert_eq!(backend.seen()[0].0, "GET /api/jobs");
    }

    #[tokio::test]
    async fn cluster_deletion_sends_namespace_and_version() {
        let backend = StubBackend::start(vec![(
            200,
            serde_json::json!({"job_id": "d1", "message": "Deletion started"}),
        )])
        .await;
        let resp = backend.store().delete_cluster("rosa-a", "ns-rosa-hcp").await.unwrap();
        assert_eq!(resp.success, None);
        assert_eq!(resp.job_id.as_deref(), Some("d1"));
        assert_eq!(
            backend.seen()[0].0,
            format!("DELETE /api/clusters/rosa-a?namespace=ns-rosa-hcp&version={}", API_VERSION)
        );
    }

    #[tokio::test]
    async fn refused_history_deletion_is_an_error() {
        let backend = StubBackend::start(vec![
            (200, serde_json::json!({"success": false, "error": "jobs still running"})),
            (200, serde_json::json!({"success": true})),
        ])
        .await;
        let store = backend.store();
        assert_eq!(
            store.delete_all_jobs().await.unwrap_err(),
            StoreError::InvalidResponse("jobs still running".into())
        );
        store.delete_all_jobs().await.unwrap();
        assert_eq!(backend.seen()[1].0, "DELETE /api/jobs");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let store = HttpJobStore::new("http://backend:8000/", Duration::from_secs(1), 10).unwrap();
        assert_eq!(store.url("/api/jobs"), "http://backend:8000/api/jobs");
    }
}
