use anyhow::Context;
use common::{Request, Response};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::dashboard::Dashboard;
use crate::dispatcher::Dispatcher;
use crate::metrics::MetricsCollector;

/// Upper bound on a single `WaitForChange`.
const MAX_WAIT_MS: u64 = 60_000;

/// Answers IPC requests from the CLI: one JSON request per line, one JSON response per line.
pub struct Server {
    dispatcher: Arc<Dispatcher>,
    dashboard: Arc<Dashboard>,
    metrics: Arc<MetricsCollector>,
}

impl Server {
    pub fn new(dispatcher: Arc<Dispatcher>, dashboard: Arc<Dashboard>, metrics: Arc<MetricsCollector>) -> Self {
        Self { dispatcher, dashboard, metrics }
    }

    pub async fn handle(&self, req: Request) -> Response {
        match req {
            Request::Dispatch(action) => Response::Dispatched(self.dispatcher.dispatch(action).await),
            Request::Recent { environment } => Response::Entries(self.dashboard.recent(environment.as_ref()).await),
            Request::GetJob(id) => match self.dashboard.job(&id).await {
                Ok(job) => Response::JobDetail(job),
                Err(e) => Response::Error(e.to_string()),
            },
            Request::GetLogs(id) => match self.dashboard.logs(&id).await {
                Ok(lines) => Response::Logs(lines),
                Err(e) => Response::Error(e.to_string()),
            },
            Request::ClearHistory => match self.dashboard.clear_history().await {
                Ok(()) => Response::Ok,
                Err(e) => Response::Error(format!("History not cleared: {}", e)),
            },
            Request::Metrics => Response::Metrics(self.metrics.export()),
            Request::WaitForChange { since, timeout_ms } => Response::Revision(
                self.dashboard
                    .wait_for_change(since, Duration::from_millis(timeout_ms.min(MAX_WAIT_MS)))
                    .await,
            ),
        }
    }

    /// Accepts connections until the listener fails.
    pub async fn serve(self: Arc<Self>, listener: UnixListener) -> anyhow::Result<()> {
        loop {
            let (socket, _) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve_connection(socket).await {
                    log::error!("Connection error: {:#}", e);
                }
            });
        }
    }

    async fn serve_connection(&self, socket: UnixStream) -> anyhow::Result<()> {
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let resp = match serde_json::from_str::<Request>(&line) {
                Ok(req) => {
                    log::debug!("Received request: {:?}", req);
                    self.handle(req).await
                }
                Err(e) => {
                    log::warn!("Malformed request: {}", e);
                    Response::Error(format!("malformed request: {}", e))
                }
            };

            let mut bytes = serde_json::to_vec(&resp)?;
            bytes.push(b'\n');
            writer.write_all(&bytes).await?;
        }
        Ok(())
    }
}

/// Binds the daemon socket, replacing a stale one, and opens it to all local users.
pub fn bind(socket_path: &Path) -> anyhow::Result<UnixListener> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("removing stale socket {}", socket_path.display()))?;
    }
    if let Some(dir) = socket_path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;

    // Set socket permissions to allow all users to connect
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(socket_path)?.permissions();
    perms.set_mode(0o666);
    std::fs::set_permissions(socket_path, perms)?;

    Ok(listener)
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
