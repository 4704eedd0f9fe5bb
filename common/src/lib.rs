pub mod api;
pub mod ipc;
pub mod job;
pub mod operation;
pub mod time;
pub mod view;

pub use api::{ErrorCode, SubmitRequest, SubmitResponse, TaskRef, API_VERSION};
pub use ipc::{DispatchOutcome, Request, Response};
pub use job::{Environment, Job, JobId, RawJob, Status, ValidationError};
pub use operation::{Action, ActionKind, Operation, OperationId};
pub use time::Timestamp;
pub use view::{EntrySource, ViewEntry};

// Production paths (follow FHS - Filesystem Hierarchy Standard)
pub const DEFAULT_SOCKET_PATH: &str = "/var/run/capiops/capiops.sock";
pub const DEFAULT_CONFIG_PATH: &str = "/etc/capiops/config.yaml";
pub const DEFAULT_LOG_FILE: &str = "/var/log/capiops/daemon.log";
pub const DEFAULT_JOBS_LOG_FILE: &str = "/var/log/capiops/jobs.log";

// Fallback paths for non-root users
pub const USER_SOCKET_PATH: &str = "/tmp/capiops.sock";
pub const USER_CONFIG_PATH: &str = "~/.config/capiops/config.yaml";

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Socket path for the current user: the system socket when it exists, else the per-user one.
pub fn socket_path() -> String {
    if let Ok(path) = std::env::var("CAPIOPS_SOCKET") {
        return path;
    }
    if std::path::Path::new(DEFAULT_SOCKET_PATH).exists() {
        DEFAULT_SOCKET_PATH.to_string()
    } else {
        USER_SOCKET_PATH.to_string()
    }
}
