//! Execution state types.

use serde::{Deserialize, Serialize};

use crate::workflow::{Action, Variable, Workflow};

/// Lifecycle status of a whole execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Executing,
    Waiting,
    Finished,
    Aborted,
    Failure,
}

impl ExecutionStatus {
    /// Terminal statuses are absorbing: no submit may change them while
    /// `exit_on_error` is set, and FINISHED rejects unconditionally.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Aborted | Self::Failure)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executing => write!(f, "EXECUTING"),
            Self::Waiting => write!(f, "WAITING"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Aborted => write!(f, "ABORTED"),
            Self::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Status of a single action's result within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Executing,
    Success,
    Finished,
    Skipped,
    Aborted,
    Failure,
    Waiting,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executing => write!(f, "EXECUTING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Aborted => write!(f, "ABORTED"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Waiting => write!(f, "WAITING"),
        }
    }
}

/// Outcome of one node in one execution, as submitted by a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub execution_id: String,
    #[serde(default)]
    pub authorization: String,
    pub action: Action,
    #[serde(default)]
    pub result: String,
    pub status: ActionStatus,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub completed_at: i64,
}

/// One live run of a workflow.
///
/// The embedded `workflow` is a snapshot taken at start time; later edits to
/// the definition never affect an in-flight execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub execution_id: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub workflow: Workflow,
    #[serde(default)]
    pub status: ExecutionStatus,
    /// Per-execution capability; workers echo it on every callback.
    #[serde(default)]
    pub authorization: String,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub last_node: String,
    /// Workflow-level final payload.
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub results: Vec<ActionResult>,
    #[serde(default)]
    pub execution_variables: Vec<Variable>,
    #[serde(default)]
    pub started_at: i64,
    #[serde(default)]
    pub completed_at: i64,
    #[serde(default)]
    pub execution_org: String,
    #[serde(default)]
    pub execution_source: String,
    #[serde(default)]
    pub execution_argument: String,
}

impl WorkflowExecution {
    /// Find the stored result slot for an action id.
    pub fn result_for(&self, action_id: &str) -> Option<&ActionResult> {
        self.results.iter().find(|r| r.action.id == action_id)
    }
}

/// A pending work item in an environment's inbox. Also doubles as the
/// POST body of the execute endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequest {
    #[serde(default)]
    pub execution_id: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub authorization: String,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub execution_source: String,
    #[serde(default)]
    pub execution_argument: String,
}

/// Ordered sequence of pending requests for one environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionRequestWrapper {
    #[serde(default)]
    pub data: Vec<ExecutionRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ExecutionStatus::Executing).unwrap(),
            "\"EXECUTING\""
        );
        let parsed: ActionStatus = serde_json::from_str("\"SKIPPED\"").unwrap();
        assert_eq!(parsed, ActionStatus::Skipped);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Finished.is_terminal());
        assert!(ExecutionStatus::Aborted.is_terminal());
        assert!(ExecutionStatus::Failure.is_terminal());
        assert!(!ExecutionStatus::Executing.is_terminal());
        assert!(!ExecutionStatus::Waiting.is_terminal());
    }

    #[test]
    fn test_execution_request_parses_partial_body() {
        let raw = r#"{"start": "node-1", "execution_argument": "data"}"#;
        let request: ExecutionRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.start, "node-1");
        assert!(request.execution_id.is_empty());
    }
}
