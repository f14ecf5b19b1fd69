//! Stored records that are not part of the workflow/execution model itself.

use serde::{Deserialize, Serialize};

use crate::workflow::Org;

/// A user on the owner-facing API surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: String,
    /// admin | user | scheduler
    #[serde(default)]
    pub role: String,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub active_org: Org,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// A named pool of workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub org_id: String,
    /// onprem | cloud
    #[serde(default, rename = "type")]
    pub env_type: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub default: bool,
}

/// Registry row for an installable app (external collaborator; only the
/// fields the validator needs).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowApp {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub actions: Vec<WorkflowAppAction>,
}

/// One action offered by an app.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowAppAction {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<crate::workflow::ActionParameter>,
}

/// Durable declaration of a recurring schedule. The in-process timer map is
/// the runtime registry; this record survives restarts and is re-registered
/// on startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: String,
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub start_node: String,
    #[serde(default)]
    pub argument: String,
    #[serde(default)]
    pub wrapped_argument: String,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub creation_time: i64,
    #[serde(default)]
    pub last_modification_time: i64,
    #[serde(default)]
    pub last_runtime: i64,
}

/// Per-app collected result examples, written when an execution finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppExecutionExample {
    pub example_id: String,
    #[serde(default)]
    pub app_name: String,
    #[serde(default)]
    pub app_version: String,
    #[serde(default)]
    pub app_action: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub success_examples: Vec<String>,
    #[serde(default)]
    pub failure_examples: Vec<String>,
}

/// One increment applied to a statistics counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsData {
    pub timestamp: i64,
    pub amount: i64,
    /// The entity the increment refers to (usually a workflow id).
    pub id: String,
}

/// Append-only counter keyed by metric name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticsItem {
    pub fieldname: String,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub data: Vec<StatisticsData>,
}
