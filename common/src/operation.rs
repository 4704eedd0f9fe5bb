use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::job::{Environment, JobId, Status};
use crate::time::Timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub String);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OperationId {
    fn from(s: &str) -> Self {
        OperationId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Verify,
    Configure,
    Provision,
    Delete,
    RunTest,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::Verify,
        ActionKind::Configure,
        ActionKind::Provision,
        ActionKind::Delete,
        ActionKind::RunTest,
    ];

    pub fn verb(&self) -> &'static str {
        match self {
            ActionKind::Verify => "verify",
            ActionKind::Configure => "configure",
            ActionKind::Provision => "provision",
            ActionKind::Delete => "delete",
            ActionKind::RunTest => "run-test",
        }
    }

    /// Mutating actions may not run twice concurrently against one resource.
    pub fn is_mutating(&self) -> bool {
        matches!(self, ActionKind::Configure | ActionKind::Provision | ActionKind::Delete)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// A user action as requested from a view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    Verify {
        cluster: String,
        environment: Environment,
    },
    Configure {
        cluster: String,
        environment: Environment,
        install_method: Option<String>,
    },
    Provision {
        cluster: String,
        environment: Environment,
        custom_image: Option<String>,
        #[serde(default)]
        extra_vars: BTreeMap<String, String>,
    },
    Delete {
        cluster: String,
        namespace: String,
        environment: Environment,
    },
    RunTest {
        suite: String,
        environment: Environment,
        #[serde(default)]
        extra_vars: BTreeMap<String, String>,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Verify { .. } => ActionKind::Verify,
            Action::Configure { .. } => ActionKind::Configure,
            Action::Provision { .. } => ActionKind::Provision,
            Action::Delete { .. } => ActionKind::Delete,
            Action::RunTest { .. } => ActionKind::RunTest,
        }
    }

    /// Cluster or suite the action targets.
    pub fn resource(&self) -> &str {
        match self {
            Action::Verify { cluster, .. }
            | Action::Configure { cluster, .. }
            | Action::Provision { cluster, .. }
            | Action::Delete { cluster, .. } => cluster,
            Action::RunTest { suite, .. } => suite,
        }
    }

    pub fn environment(&self) -> &Environment {
        match self {
            Action::Verify { environment, .. }
            | Action::Configure { environment, .. }
            | Action::Provision { environment, .. }
            | Action::Delete { environment, .. }
            | Action::RunTest { environment, .. } => environment,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Action::Verify { cluster, environment } => {
                format!("Verify {} environment for {}", environment, cluster)
            }
            Action::Configure { cluster, install_method, .. } => match install_method {
                Some(method) => format!("Configure CAPI/CAPA on {} ({})", cluster, method),
                None => format!("Configure CAPI/CAPA on {}", cluster),
            },
            Action::Provision { cluster, .. } => format!("Provision ROSA HCP cluster {}", cluster),
            Action::Delete { cluster, namespace, .. } => {
                format!("Delete cluster {} in {}", cluster, namespace)
            }
            Action::RunTest { suite, .. } => format!("Run test suite {}", suite),
        }
    }
}

/// Optimistic, client-side record of a dispatched action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: ActionKind,
    pub resource: String,
    pub title: String,
    pub status: Status,
    pub environment: Environment,
    pub timestamp: Timestamp,
    pub output: Option<String>,
    pub playbook: Option<String>,
    pub job_id: Option<JobId>,
}

impl Operation {
    pub fn starting(id: OperationId, action: &Action, playbook: Option<String>) -> Self {
        Self {
            id,
            kind: action.kind(),
            resource: action.resource().to_string(),
            title: action.title(),
            status: Status::Starting,
            environment: action.environment().clone(),
            timestamp: Timestamp::now(),
            output: None,
            playbook,
            job_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_wire_format_is_tagged() {
        let action = Action::Delete {
            cluster: "rosa-1".into(),
            namespace: "ns-rosa-hcp".into(),
            environment: Environment::Mce,
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["action"], "delete");
        assert_eq!(json["environment"], "mce");

        let back: Action = serde_json::from_value(json).unwrap();
        assert_eq!(back.kind(), ActionKind::Delete);
        assert_eq!(back.resource(), "rosa-1");
    }

    #[test]
    fn only_mutating_actions_are_guarded() {
        let guarded: Vec<_> = ActionKind::ALL.iter().filter(|k| k.is_mutating()).collect();
        assert_eq!(
            guarded,
            vec![&ActionKind::Configure, &ActionKind::Provision, &ActionKind::Delete]
        );
    }

    #[test]
    fn starting_operation_copies_action_fields() {
        let action = Action::Configure {
            cluster: "hub".into(),
            environment: Environment::Minikube,
            install_method: Some("helm".into()),
        };
        let op = Operation::starting(OperationId("configure-hub-1".into()), &action, None);
        assert_eq!(op.status, Status::Starting);
        assert_eq!(op.resource, "hub");
        assert_eq!(op.environment, Environment::Minikube);
        assert_eq!(op.title, "Configure CAPI/CAPA on hub (helm)");
    }
}
