//! Workflow definition types.
//!
//! A workflow is a DAG of actions connected by branches, plus the triggers
//! that can start it. Definitions are immutable once validated; executions
//! carry a frozen snapshot of the definition they run against.

use serde::{Deserialize, Serialize};

/// Organization owning workflows, environments and credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Org {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Workflow-level execution configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowConfiguration {
    /// Stop the whole execution on the first ABORTED/FAILURE result.
    #[serde(default)]
    pub exit_on_error: bool,

    /// When false, actions outside the start node's subtree are marked
    /// SKIPPED at execution creation.
    #[serde(default)]
    pub start_from_top: bool,
}

/// A single parameter on an action.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionParameter {
    pub name: String,
    #[serde(default)]
    pub value: String,
    /// STATIC_VALUE unless the frontend picked another source.
    #[serde(default = "default_variant")]
    pub variant: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub configuration: bool,
}

fn default_variant() -> String {
    "STATIC_VALUE".to_string()
}

/// A named value slot. Workflow variables are constant inputs; execution
/// variables are mutable per-execution slots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Variable {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// A node running one app action in a named environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub app_id: String,
    /// The action name on the app (e.g. "hello_world").
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
    /// Credential reference, resolved and inlined at execution start.
    #[serde(default)]
    pub authentication_id: String,
    /// When set, the action's result is copied into this execution variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_variable: Option<Variable>,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub is_start_node: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Directed edge between two nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub id: String,
    pub source_id: String,
    pub destination_id: String,
    /// Conditions are evaluated by workers, not the control plane; kept
    /// opaque here.
    #[serde(default)]
    pub conditions: Vec<serde_json::Value>,
}

/// Trigger kinds understood by the control plane.
pub const TRIGGER_SCHEDULE: &str = "SCHEDULE";
pub const TRIGGER_WEBHOOK: &str = "WEBHOOK";
pub const TRIGGER_USER_INPUT: &str = "USERINPUT";
pub const TRIGGER_EMAIL: &str = "EMAIL";

/// Something that can start (or pause) a workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trigger {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub trigger_type: String,
    /// uninitialized | running | stopped
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub parameters: Vec<ActionParameter>,
}

/// Declarative schedule attached to a workflow (the durable runtime record
/// lives in storage as a `ScheduleRecord`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub execution_argument: String,
    #[serde(default)]
    pub environment: String,
}

/// A validated DAG of actions, branches and triggers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub executing_org: Org,
    /// Node id execution begins at unless overridden per execution.
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub is_valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub configuration: WorkflowConfiguration,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub schedules: Vec<ScheduleSpec>,
    #[serde(default)]
    pub workflow_variables: Vec<Variable>,
    #[serde(default)]
    pub execution_variables: Vec<Variable>,
}

impl Workflow {
    /// Get an action by node id.
    pub fn get_action(&self, id: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.id == id)
    }

    /// Whether `id` names a USERINPUT trigger.
    pub fn is_user_input_trigger(&self, id: &str) -> bool {
        self.triggers
            .iter()
            .any(|t| t.id == id && (t.trigger_type == TRIGGER_USER_INPUT || t.app_name == "User Input"))
    }

    /// Ids of branch parents of `node_id`.
    pub fn parents_of<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.branches
            .iter()
            .filter(move |b| b.destination_id == node_id)
            .map(|b| b.source_id.as_str())
    }
}
