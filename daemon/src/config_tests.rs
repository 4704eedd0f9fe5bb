use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn defaults_match_backend_timeouts() {
    let config = Config::default();
    assert_eq!(config.polling.deletion_interval_ms, 1_000);
    assert_eq!(config.polling.deletion_max_attempts, 1_800);
    assert_eq!(config.polling.interval_ms, 5_000);
    assert_eq!(config.ledger.max_entries, 100);
    assert!(config.errors.legacy_text_matching);
}

#[test]
fn yaml_partial_sections_keep_defaults() {
    let file = write_config(
        ".yaml",
        "server:\n  backend_url: http://backend:9000\npolling:\n  interval_ms: 2000\nactions:\n  configure:\n    playbook: playbooks/configure.yml\n",
    );
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.server.backend_url, "http://backend:9000");
    assert_eq!(config.polling.interval_ms, 2000);
    assert_eq!(config.polling.max_attempts, 360);
    assert_eq!(
        config.actions.configure,
        TaskRef::Playbook("playbooks/configure.yml".into())
    );
    assert_eq!(
        config.actions.verify,
        TaskRef::TaskFile("tasks/validate-capa-environment.yml".into())
    );
}

#[test]
fn toml_is_supported() {
    let file = write_config(
        ".toml",
        "[ledger]\nmax_entries = 10\n\n[logging]\nlevel = \"debug\"\nformat = \"json\"\n",
    );
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.ledger.max_entries, 10);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, "json");
}

#[test]
fn unknown_extension_is_rejected() {
    let file = write_config(".ini", "[server]\n");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("Unsupported config file format"));
}

#[test]
fn deletion_policy_differs_from_default() {
    let polling = PollingConfig::default();
    let delete = polling.policy_for(ActionKind::Delete);
    let configure = polling.policy_for(ActionKind::Configure);
    assert_eq!(delete.interval, Duration::from_secs(1));
    assert_eq!(delete.max_attempts, 1_800);
    assert_eq!(configure.interval, Duration::from_secs(5));
}

