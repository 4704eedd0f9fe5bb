use super::*;
use crate::test_support::operation;
use common::{ActionKind, Environment, Status};

#[test]
fn add_inserts_newest_first() {
    let mut ledger = Ledger::new(10);
    ledger.add_to_recent(operation("a", ActionKind::Verify, "c1", 1)).unwrap();
    ledger.add_to_recent(operation("b", ActionKind::Verify, "c1", 2)).unwrap();

    let ids: Vec<_> = ledger.snapshot().into_iter().map(|o| o.id.0).collect();
    assert_eq!(ids, vec!["b", "a"]);
}

#[test]
fn duplicate_ids_are_rejected() {
    let mut ledger = Ledger::new(10);
    ledger.add_to_recent(operation("a", ActionKind::Verify, "c1", 1)).unwrap();
    let err = ledger.add_to_recent(operation("a", ActionKind::Verify, "c2", 2)).unwrap_err();
    assert_eq!(err, LedgerError::DuplicateId(OperationId::from("a")));
    assert_eq!(ledger.len(), 1);
}

#[test]
fn update_of_missing_entry_is_a_noop() {
    let mut ledger = Ledger::new(10);
    assert!(!ledger.update_operation_status(&OperationId::from("gone"), Status::Completed, None));
    assert!(ledger.is_empty());
}

#[test]
fn update_preserves_timestamp_and_keeps_output_when_none() {
    let mut ledger = Ledger::new(10);
    ledger.add_to_recent(operation("a", ActionKind::Verify, "c1", 77)).unwrap();
    let id = OperationId::from("a");

    assert!(ledger.update_operation_status(&id, Status::Running, Some("step 1".into())));
    assert!(ledger.update_operation_status(&id, Status::Completed, None));

    let entry = ledger.get(&id).unwrap();
    assert_eq!(entry.status, Status::Completed);
    assert_eq!(entry.output.as_deref(), Some("step 1"));
    assert_eq!(entry.timestamp.as_millis(), 77);
}

#[test]
fn begin_guards_mutating_actions_per_resource() {
    let mut ledger = Ledger::new(10);
    ledger.begin(operation("cfg-1", ActionKind::Configure, "hub", 1)).unwrap();

    let err = ledger.begin(operation("cfg-2", ActionKind::Configure, "hub", 2)).unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyInProgress { ref existing, .. } if existing.0 == "cfg-1"));

    // Other resources and read-only actions are not blocked.
    ledger.begin(operation("cfg-3", ActionKind::Configure, "other", 3)).unwrap();
    ledger.begin(operation("v-1", ActionKind::Verify, "hub", 4)).unwrap();
    ledger.begin(operation("v-2", ActionKind::Verify, "hub", 5)).unwrap();
}

#[test]
fn begin_allows_retry_after_terminal() {
    let mut ledger = Ledger::new(10);
    ledger.begin(operation("cfg-1", ActionKind::Configure, "hub", 1)).unwrap();
    ledger.update_operation_status(&OperationId::from("cfg-1"), Status::Failed("boom".into()), None);
    ledger.begin(operation("cfg-2", ActionKind::Configure, "hub", 2)).unwrap();
    assert_eq!(ledger.len(), 2);
}

#[test]
fn cap_evicts_oldest_terminal_before_in_flight() {
    let mut ledger = Ledger::new(2);
    ledger.add_to_recent(operation("running-old", ActionKind::Verify, "c", 1)).unwrap();
    let mut done = operation("done", ActionKind::Verify, "c", 2);
    done.status = Status::Completed;
    ledger.add_to_recent(done).unwrap();
    ledger.add_to_recent(operation("new", ActionKind::Verify, "c", 3)).unwrap();

    let ids: Vec<_> = ledger.snapshot().into_iter().map(|o| o.id.0).collect();
    assert_eq!(ids, vec!["new", "running-old"]);
}

#[test]
fn clear_is_idempotent() {
    let mut ledger = Ledger::new(10);
    ledger.add_to_recent(operation("a", ActionKind::Verify, "c1", 1)).unwrap();
    ledger.clear();
    ledger.clear();
    assert!(ledger.is_empty());
}

#[test]
fn remove_and_attach_job() {
    let mut ledger = Ledger::new(10);
    let mut op = operation("a", ActionKind::Provision, "c1", 1);
    op.environment = Environment::Minikube;
    ledger.add_to_recent(op).unwrap();

    let id = OperationId::from("a");
    assert!(ledger.attach_job(&id, JobId::from("j1")));
    let removed = ledger.remove_operation(&id).unwrap();
    assert_eq!(removed.job_id, Some(JobId::from("j1")));
    assert!(ledger.remove_operation(&id).is_none());
}
