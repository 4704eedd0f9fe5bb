use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use std::fs;

use common::{ActionKind, TaskRef};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_socket_path() -> PathBuf { PathBuf::from(common::socket_path()) }
fn default_backend_url() -> String { common::DEFAULT_BACKEND_URL.to_string() }
fn default_request_timeout() -> u64 { 30_000 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            backend_url: default_backend_url(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_deletion_interval")]
    pub deletion_interval_ms: u64,
    #[serde(default = "default_deletion_max_attempts")]
    pub deletion_max_attempts: u32,
}

fn default_interval() -> u64 { 5_000 }
fn default_max_attempts() -> u32 { 360 }
fn default_deletion_interval() -> u64 { 1_000 }
fn default_deletion_max_attempts() -> u32 { 1_800 }

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval(),
            max_attempts: default_max_attempts(),
            deletion_interval_ms: default_deletion_interval(),
            deletion_max_attempts: default_deletion_max_attempts(),
        }
    }
}

/// How often and how long a single tracked job is polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollingConfig {
    pub fn policy_for(&self, kind: ActionKind) -> PollPolicy {
        match kind {
            ActionKind::Delete => PollPolicy {
                interval: Duration::from_millis(self.deletion_interval_ms.max(1)),
                max_attempts: self.deletion_max_attempts.max(1),
            },
            _ => PollPolicy {
                interval: Duration::from_millis(self.interval_ms.max(1)),
                max_attempts: self.max_attempts.max(1),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize { 100 }

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { max_entries: default_max_entries() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStoreConfig {
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,
}

fn default_max_jobs() -> usize { 500 }

impl Default for JobStoreConfig {
    fn default() -> Self {
        Self { max_jobs: default_max_jobs() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorsConfig {
    /// Classify backend errors by their text when no `error_code` is sent.
    #[serde(default = "default_legacy_text_matching")]
    pub legacy_text_matching: bool,
}

fn default_legacy_text_matching() -> bool { true }

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self { legacy_text_matching: default_legacy_text_matching() }
    }
}

/// Task or playbook run for each action kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionsConfig {
    #[serde(default = "default_verify")]
    pub verify: TaskRef,
    #[serde(default = "default_configure")]
    pub configure: TaskRef,
    #[serde(default = "default_provision")]
    pub provision: TaskRef,
    #[serde(default = "default_delete")]
    pub delete: TaskRef,
    #[serde(default = "default_run_test")]
    pub run_test: TaskRef,
}

fn default_verify() -> TaskRef { TaskRef::TaskFile("tasks/validate-capa-environment.yml".to_string()) }
fn default_configure() -> TaskRef { TaskRef::TaskFile("tasks/enable_capi_capa.yml".to_string()) }
fn default_provision() -> TaskRef { TaskRef::Playbook("create_rosa_hcp_cluster.yaml".to_string()) }
fn default_delete() -> TaskRef { TaskRef::Playbook("delete_rosa_hcp_cluster.yaml".to_string()) }
fn default_run_test() -> TaskRef { TaskRef::Playbook("tests/run_test_suite.yml".to_string()) }

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            verify: default_verify(),
            configure: default_configure(),
            provision: default_provision(),
            delete: default_delete(),
            run_test: default_run_test(),
        }
    }
}

impl ActionsConfig {
    pub fn task_for(&self, kind: ActionKind) -> &TaskRef {
        match kind {
            ActionKind::Verify => &self.verify,
            ActionKind::Configure => &self.configure,
            ActionKind::Provision => &self.provision,
            ActionKind::Delete => &self.delete,
            ActionKind::RunTest => &self.run_test,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    pub output: Option<PathBuf>,
    pub jobs_output: Option<PathBuf>,
    /// Per-target level overrides, e.g. `reqwest: warn`.
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            output: None,
            jobs_output: None,
            targets: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub job_store: JobStoreConfig,
    #[serde(default)]
    pub errors: ErrorsConfig,
    #[serde(default)]
    pub actions: ActionsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    /// Detect file type by extension and load
    pub fn from_file(path: &Path) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "toml" => Self::from_toml_file(path),
            _ => Err(anyhow::anyhow!("Unsupported config file format. Use .yaml, .yml, or .toml")),
        }
    }

    /// Explicit path if given, else the first existing default location, else defaults.
    /// Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let candidates = [Some(PathBuf::from(common::DEFAULT_CONFIG_PATH)), user_config_path()];
                match candidates.into_iter().flatten().find(|p| p.exists()) {
                    Some(path) => Self::from_file(&path)?,
                    None => Config::default(),
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("CAPIOPS_BACKEND_URL") {
            self.server.backend_url = url;
        }
        if let Ok(socket) = std::env::var("CAPIOPS_SOCKET") {
            self.server.socket_path = PathBuf::from(socket);
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    let home = std::env::var_os("HOME")?;
    let relative = common::USER_CONFIG_PATH.trim_start_matches("~/");
    Some(PathBuf::from(home).join(relative))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
