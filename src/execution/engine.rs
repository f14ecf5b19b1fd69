//! Workflow execution engine.
//!
//! The control-plane state machine: creates executions, merges results
//! submitted by workers, propagates skips across failed branches, and
//! drives executions to a terminal status. Workers do the actual running;
//! everything here is load-merge-store against the document store.

use chrono::Utc;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};

use super::types::{
    ActionResult, ActionStatus, ExecutionRequest, ExecutionStatus, WorkflowExecution,
};
use crate::cloudsync::{dispatch_user_input, CloudSyncClient};
use crate::credentials::inject_credentials;
use crate::error::{Error, Result};
use crate::queue;
use crate::stats;
use crate::storage::SqliteStorage;
use crate::workflow::{child_nodes, Trigger};

/// Serialized executions at or above this size get their large results
/// truncated before persisting.
const MAX_EXECUTION_BYTES: usize = 1_048_487;
/// Per-result payload cap applied when an execution is oversized.
const MAX_RESULT_BYTES: usize = 500_000;
/// Replacement payload for truncated results.
const OVERSIZED_RESULT_ERROR: &str = "[ERROR] Result too large to handle";

const SKIPPED_NOT_UNDER_STARTNODE: &str = "Skipped because it's not under the startnode";
const SKIPPED_PREVIOUS_NODE: &str = "Skipped because of previous node";
const ABORTED_OTHER_NODE: &str = "Aborted because of error in another node";
const WAITING_FOR_FEEDBACK: &str = "Waiting for user feedback based on configuration";

/// Constant-time token comparison.
pub fn tokens_match(left: &str, right: &str) -> bool {
    left.as_bytes().ct_eq(right.as_bytes()).into()
}

/// Inputs to `start`, decoded from the HTTP request by the API layer.
#[derive(Debug, Default)]
pub struct StartRequest {
    /// Raw POST body, if any. `None` marks a query-driven (GET) start.
    pub body: Option<Vec<u8>>,
    pub start: Option<String>,
    pub reference_execution: Option<String>,
    pub answer: Option<String>,
    pub note: Option<String>,
}

/// The execution engine.
#[derive(Clone)]
pub struct ExecutionEngine {
    storage: SqliteStorage,
    cloudsync: CloudSyncClient,
}

impl ExecutionEngine {
    pub fn new(storage: SqliteStorage, cloudsync: CloudSyncClient) -> Self {
        Self { storage, cloudsync }
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Start (or resume, or answer) an execution of `workflow_id`.
    ///
    /// Returns `None` when a user-input answer terminated the referenced
    /// execution instead of creating a new one.
    pub async fn start(
        &self,
        workflow_id: &str,
        request: StartRequest,
    ) -> Result<Option<WorkflowExecution>> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Workflow {} doesn't exist", workflow_id)))?;

        if workflow.executing_org.id.is_empty() {
            return Err(Error::Execution(
                "Workflow has no executing org defined".to_string(),
            ));
        }
        if !workflow.is_valid {
            return Err(Error::Workflow(format!(
                "Workflow {} is invalid",
                workflow.id
            )));
        }

        let mut execution = WorkflowExecution {
            workflow: workflow.clone(),
            ..WorkflowExecution::default()
        };
        let mut make_new = true;

        match &request.body {
            Some(raw) => {
                // Body parse failures are tolerated; an unstructured body
                // becomes the execution argument.
                let parsed: ExecutionRequest =
                    serde_json::from_slice(raw).unwrap_or_else(|e| {
                        warn!("Failed execution POST unmarshaling - continuing anyway: {}", e);
                        ExecutionRequest::default()
                    });

                if parsed.start.is_empty() && !raw.is_empty() {
                    execution.execution_argument = String::from_utf8_lossy(raw).to_string();
                }
                if !parsed.execution_argument.is_empty() {
                    execution.execution_argument = parsed.execution_argument.clone();
                }
                if !parsed.execution_source.is_empty() {
                    execution.execution_source = parsed.execution_source.clone();
                }

                if parsed.start.len() == 36 {
                    info!("Should start execution on node {}", parsed.start);
                    execution.start = parsed.start.clone();
                } else if !parsed.start.is_empty() {
                    return Err(Error::Execution(format!(
                        "Startnode {} was not found in actions",
                        parsed.start
                    )));
                }

                execution.execution_id = if parsed.execution_id.len() == 36 {
                    parsed.execution_id.clone()
                } else {
                    uuid::Uuid::new_v4().to_string()
                };
            }
            None => {
                // Query-driven start, used by user-input continuations.
                if let (Some(answer), Some(reference)) =
                    (&request.answer, &request.reference_execution)
                {
                    if answer == "false" {
                        self.answer_user_input(
                            workflow_id,
                            reference,
                            request.start.as_deref().unwrap_or_default(),
                            answer,
                            request.note.as_deref(),
                        )
                        .await?;
                        return Ok(None);
                    }
                }

                if let Some(reference) = &request.reference_execution {
                    info!("Continuing execution from reference {}", reference);
                    let old = self.storage.get_execution(reference).await?.ok_or_else(|| {
                        Error::NotFound(format!(
                            "Failed getting execution ID {} because it doesn't exist",
                            reference
                        ))
                    })?;
                    execution = old;
                }

                if execution.execution_id.is_empty() {
                    execution.execution_id = uuid::Uuid::new_v4().to_string();
                } else {
                    make_new = false;
                }

                if let Some(start) = &request.start {
                    execution.start = start.clone();
                }
            }
        }

        if execution.execution_id.len() != 36 {
            return Err(Error::Execution(format!(
                "Invalid execution id: {}",
                execution.execution_id
            )));
        }

        if make_new {
            execution.workflow_id = workflow.id.clone();
            execution.started_at = Utc::now().timestamp();
            execution.completed_at = 0;
            execution.authorization = uuid::Uuid::new_v4().to_string();
            execution.status = ExecutionStatus::Executing;
        }

        if execution.execution_source.is_empty() {
            execution.execution_source = "default".to_string();
        }
        execution.execution_variables = workflow.execution_variables.clone();
        if execution.start.is_empty() {
            execution.start = execution.workflow.start.clone();
        }

        self.prepare_actions(&mut execution).await?;

        if execution.execution_org.is_empty() {
            execution.execution_org = workflow.executing_org.id.clone();
        }

        let environments = self.classify_environments(&execution).await?;

        self.storage.set_execution(&execution).await?;

        if let Err(e) = self.dispatch(&execution, &environments).await {
            // Dispatch failed: the caller gets the error and no execution.
            let _ = self.storage.delete_execution(&execution.execution_id).await;
            return Err(e);
        }

        stats::increment_quietly(&self.storage, "workflow_executions", &workflow.id, 1).await;
        crate::metrics::record_execution_started(&execution.execution_source);

        Ok(Some(execution))
    }

    /// The answer=false path: terminate the referenced execution at its
    /// user-input node and record why.
    async fn answer_user_input(
        &self,
        workflow_id: &str,
        reference: &str,
        start: &str,
        answer: &str,
        note: Option<&str>,
    ) -> Result<()> {
        let mut old = self.storage.get_execution(reference).await?.ok_or_else(|| {
            Error::NotFound(format!(
                "Failed getting execution ID {} because it doesn't exist",
                reference
            ))
        })?;

        if old.workflow.id != workflow_id {
            return Err(Error::Unauthorized(format!("Bad ID {}", reference)));
        }

        for result in &mut old.results {
            if result.action.id == start {
                result.result = match note {
                    Some(note) => format!("User note: {}", note),
                    None => format!("User clicked {}", answer),
                };
                result.completed_at = Utc::now().timestamp();
                result.status = ActionStatus::Aborted;

                old.status = ExecutionStatus::Aborted;
                old.result = result.result.clone();
                old.last_node = result.action.id.clone();
            }
        }

        self.storage.set_execution(&old).await
    }

    /// Credential injection, resume continuation, and start-from-middle
    /// skip synthesis over the snapshot's actions.
    async fn prepare_actions(&self, execution: &mut WorkflowExecution) -> Result<()> {
        let children = child_nodes(&execution.workflow, &execution.start);
        let resuming = !execution.results.is_empty();
        if resuming {
            // Resuming: waiting results continue, nothing new is skipped.
            continue_waiting_results(execution);
        }

        let mut start_found = false;
        let mut all_auths = None;
        let mut new_actions = Vec::with_capacity(execution.workflow.actions.len());
        let mut default_results: Vec<ActionResult> = Vec::new();

        for action in execution.workflow.actions.clone() {
            let mut action = action;
            if action.id == execution.start {
                start_found = true;
            }

            if action.environment.is_empty() {
                return Err(Error::Execution(format!(
                    "Environment is not defined for {}",
                    action.name
                )));
            }

            if !action.authentication_id.is_empty() {
                if all_auths.is_none() {
                    all_auths = Some(
                        self.storage
                            .get_all_app_auth(&execution.workflow.executing_org.id)
                            .await?,
                    );
                }
                let auths = all_auths.as_ref().unwrap();
                let auth = auths
                    .iter()
                    .find(|a| a.id == action.authentication_id)
                    .ok_or_else(|| {
                        Error::Execution(format!(
                            "Auth ID {} doesn't exist",
                            action.authentication_id
                        ))
                    })?;
                action = inject_credentials(&action, auth);
            }

            if !resuming && !execution.workflow.configuration.start_from_top {
                let is_child = children.iter().any(|id| id == &action.id);
                if !is_child && action.id != execution.start {
                    default_results.push(ActionResult {
                        execution_id: execution.execution_id.clone(),
                        authorization: execution.authorization.clone(),
                        action: action.clone(),
                        result: SKIPPED_NOT_UNDER_STARTNODE.to_string(),
                        status: ActionStatus::Skipped,
                        started_at: 0,
                        completed_at: 0,
                    });
                }
            }

            new_actions.push(action);
        }

        if !start_found && execution.workflow.is_user_input_trigger(&execution.start) {
            start_found = true;
        }
        if !start_found {
            return Err(Error::Execution(format!(
                "Workflow start node \"{}\" doesn't exist in the workflow",
                execution.start
            )));
        }

        execution.workflow.actions = new_actions;
        if !resuming {
            execution.results = default_results;
        }
        Ok(())
    }

    /// Resolve every referenced environment and split by type. Returns the
    /// distinct on-prem environment names plus whether cloud dispatch is
    /// needed.
    async fn classify_environments(
        &self,
        execution: &WorkflowExecution,
    ) -> Result<DispatchPlan> {
        let all_envs: Vec<_> = self
            .storage
            .get_environments(&execution.execution_org)
            .await?
            .into_iter()
            .filter(|e| !e.archived)
            .collect();

        if all_envs.is_empty() {
            return Err(Error::Execution(format!(
                "No active environments found for org {}",
                execution.execution_org
            )));
        }

        let mut plan = DispatchPlan::default();
        for action in &execution.workflow.actions {
            let env = all_envs
                .iter()
                .find(|e| e.name == action.environment)
                .ok_or_else(|| {
                    Error::Execution(format!(
                        "Couldn't find environment {} in org {}",
                        action.environment, execution.execution_org
                    ))
                })?;

            match env.env_type.as_str() {
                "onprem" => {
                    if !plan.onprem.iter().any(|name| name == &env.name) {
                        plan.onprem.push(env.name.clone());
                    }
                }
                "cloud" => plan.cloud = true,
                other => {
                    return Err(Error::Execution(format!(
                        "No handler for environment type {}",
                        other
                    )));
                }
            }
        }

        Ok(plan)
    }

    async fn dispatch(&self, execution: &WorkflowExecution, plan: &DispatchPlan) -> Result<()> {
        for environment in &plan.onprem {
            info!(
                execution_id = %execution.execution_id,
                environment = %environment,
                "Queueing execution for on-prem workers"
            );
            let request = ExecutionRequest {
                execution_id: execution.execution_id.clone(),
                workflow_id: execution.workflow.id.clone(),
                authorization: execution.authorization.clone(),
                environments: plan.onprem.clone(),
                ..ExecutionRequest::default()
            };
            queue::enqueue(&self.storage, environment, request).await?;
        }

        if plan.cloud {
            if execution.workflow.actions.len() != 1 {
                return Err(Error::CloudSync(
                    "Cloud workflows with more than one action are not supported".to_string(),
                ));
            }
            let payload = serde_json::json!({
                "execution_id": execution.execution_id,
                "workflow_id": execution.workflow.id,
                "action": execution.workflow.actions[0],
                "authorization": execution.authorization,
                "execution_argument": execution.execution_argument,
                "execution_source": execution.execution_source,
            });
            self.cloudsync.execute_node(&payload).await?;
        }

        Ok(())
    }

    // ========================================================================
    // Result ingestion
    // ========================================================================

    /// Merge a worker-submitted result into its execution.
    pub async fn submit_result(&self, mut action_result: ActionResult) -> Result<()> {
        let mut execution = self
            .storage
            .get_execution(&action_result.execution_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Failed getting execution ID {} because it doesn't exist",
                    action_result.execution_id
                ))
            })?;

        if !tokens_match(&execution.authorization, &action_result.authorization) {
            warn!(
                "Bad authorization key when updating node {}",
                action_result.execution_id
            );
            return Err(Error::Unauthorized("Bad authorization key".to_string()));
        }

        if execution.status == ExecutionStatus::Finished {
            return Err(Error::Execution(format!(
                "Workflowexecution is already finished because of {} with status {}",
                execution.last_node, execution.status
            )));
        }
        if matches!(
            execution.status,
            ExecutionStatus::Aborted | ExecutionStatus::Failure
        ) {
            if execution.workflow.configuration.exit_on_error {
                return Err(Error::Execution(format!(
                    "Workflowexecution is aborted because of {} with status {}",
                    execution.last_node, execution.status
                )));
            }
            info!("Continuing post-mortem result capture on {} execution", execution.status);
        }

        if action_result.status == ActionStatus::Waiting
            && action_result.action.app_name == "User Input"
        {
            return self.handle_user_input_wait(execution, action_result).await;
        }

        if matches!(
            action_result.status,
            ActionStatus::Aborted | ActionStatus::Failure
        ) {
            self.handle_failed_result(&mut execution, &action_result)
                .await;
        }

        merge_result(&mut execution, action_result.clone());
        reconcile_skipped(&mut execution);

        if self.check_termination(&mut execution, &action_result).await {
            crate::metrics::record_execution_finished("FINISHED");
        }

        enforce_size_limit(&mut execution);
        self.storage.set_execution(&execution).await?;
        Ok(())
    }

    /// A user-input node went WAITING: emit the notification intents and
    /// pause the execution.
    async fn handle_user_input_wait(
        &self,
        mut execution: WorkflowExecution,
        mut action_result: ActionResult,
    ) -> Result<()> {
        let trigger: Trigger = serde_json::from_str(&action_result.result).map_err(|e| {
            Error::Execution(format!(
                "Failed unmarshaling actionresult for user input: {}",
                e
            ))
        })?;

        let org_id = if !execution.execution_org.is_empty() {
            execution.execution_org.clone()
        } else {
            execution.workflow.org_id.clone()
        };

        match dispatch_user_input(
            &self.cloudsync,
            &trigger,
            &org_id,
            &execution.workflow.id,
            &execution.execution_id,
        )
        .await
        {
            Ok(()) => {
                action_result.result = WAITING_FOR_FEEDBACK.to_string();
                merge_result(&mut execution, action_result);
                execution.status = ExecutionStatus::Waiting;
                self.storage.set_execution(&execution).await?;
                Ok(())
            }
            Err(e) => {
                error!("Failed userinput handler: {}", e);
                action_result.result = format!("Cloud error: {}", e);
                merge_result(&mut execution, action_result);
                execution.status = ExecutionStatus::Aborted;
                self.storage.set_execution(&execution).await?;
                Err(e)
            }
        }
    }

    /// Skip propagation and EXECUTING-rewrite after an ABORTED/FAILURE
    /// result.
    async fn handle_failed_result(
        &self,
        execution: &mut WorkflowExecution,
        action_result: &ActionResult,
    ) {
        info!(
            "Actionresult is {}, setting execution state",
            action_result.status
        );

        let mut new_results: Vec<ActionResult> = Vec::new();

        if execution.workflow.configuration.exit_on_error {
            execution.status = match action_result.status {
                ActionStatus::Aborted => ExecutionStatus::Aborted,
                _ => ExecutionStatus::Failure,
            };
            execution.last_node = action_result.action.id.clone();
        } else {
            // Mark descendants SKIPPED, but never a node that still has a
            // parent outside the failed subtree: that parent may succeed
            // and the node must stay eligible.
            let children = child_nodes(&execution.workflow, &action_result.action.id);
            for node_id in &children {
                if node_id == &action_result.action.id {
                    continue;
                }
                let action = match execution.workflow.get_action(node_id) {
                    Some(action) => action.clone(),
                    None => continue,
                };
                if execution.result_for(node_id).is_some() {
                    continue;
                }

                let has_live_parent = execution
                    .workflow
                    .parents_of(node_id)
                    .any(|parent| !children.iter().any(|c| c == parent));
                if has_live_parent {
                    continue;
                }

                new_results.push(ActionResult {
                    execution_id: action_result.execution_id.clone(),
                    authorization: action_result.authorization.clone(),
                    action,
                    result: SKIPPED_PREVIOUS_NODE.to_string(),
                    status: ActionStatus::Skipped,
                    started_at: 0,
                    completed_at: 0,
                });
                stats::increment_quietly(
                    &self.storage,
                    "workflow_execution_actions_skipped",
                    &execution.workflow.id,
                    1,
                )
                .await;
            }
        }

        let mut last_result = String::new();
        for mut result in execution.results.drain(..) {
            if result.status == ActionStatus::Executing {
                result.status = action_result.status;
                result.result = ABORTED_OTHER_NODE.to_string();
            }
            if !result.result.is_empty() {
                last_result = result.result.clone();
            }
            new_results.push(result);
        }

        execution.result = last_result;
        execution.results = new_results;

        match execution.status {
            ExecutionStatus::Aborted => {
                stats::increment_quietly(
                    &self.storage,
                    "workflow_executions_aborted",
                    &execution.workflow.id,
                    1,
                )
                .await;
            }
            ExecutionStatus::Failure => {
                stats::increment_quietly(
                    &self.storage,
                    "workflow_executions_failure",
                    &execution.workflow.id,
                    1,
                )
                .await;
            }
            _ => {}
        }
    }

    /// Check the termination predicate and finish the execution when every
    /// action is accounted for.
    async fn check_termination(
        &self,
        execution: &mut WorkflowExecution,
        action_result: &ActionResult,
    ) -> bool {
        let extra_inputs = execution
            .results
            .iter()
            .filter(|r| r.action.app_name == "User Input")
            .count();

        if execution.results.len() != execution.workflow.actions.len() + extra_inputs {
            return false;
        }

        let mut finished = true;
        let mut last_result = String::new();
        for result in &execution.results {
            if result.status == ActionStatus::Executing {
                finished = false;
                break;
            }

            if result.status == ActionStatus::Skipped && has_live_parent(execution, result) {
                finished = false;
                break;
            }

            last_result = result.result.clone();
        }

        if !finished {
            return false;
        }

        info!("Execution of {} finished.", execution.execution_id);
        execution.result = last_result;
        execution.status = ExecutionStatus::Finished;
        execution.completed_at = Utc::now().timestamp();
        if execution.last_node.is_empty() {
            execution.last_node = action_result.action.id.clone();
        }

        stats::increment_quietly(
            &self.storage,
            "workflow_executions_success",
            &execution.workflow.id,
            1,
        )
        .await;
        stats::collect_examples(&self.storage, execution).await;
        true
    }

    // ========================================================================
    // Abort
    // ========================================================================

    /// Abort a non-terminal execution. Authorization is the caller's
    /// concern; this enforces only the state machine.
    pub async fn abort(&self, execution_id: &str) -> Result<()> {
        let mut execution = self
            .storage
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "Failed getting execution ID {} because it doesn't exist",
                    execution_id
                ))
            })?;

        if execution.status.is_terminal() {
            return Err(Error::Execution(format!(
                "Status for {} is {}, which can't be aborted",
                execution_id, execution.status
            )));
        }

        execution.completed_at = Utc::now().timestamp();
        execution.status = ExecutionStatus::Aborted;

        let mut last_result = String::new();
        for result in &mut execution.results {
            if result.status == ActionStatus::Executing {
                result.status = ActionStatus::Aborted;
                result.result = ABORTED_OTHER_NODE.to_string();
            }
            if !result.result.is_empty() {
                last_result = result.result.clone();
            }
        }
        if execution.result.is_empty() {
            execution.result = last_result;
        }

        self.storage.set_execution(&execution).await?;
        stats::increment_quietly(
            &self.storage,
            "workflow_executions_aborted",
            &execution.workflow.id,
            1,
        )
        .await;
        crate::metrics::record_execution_finished("ABORTED");
        Ok(())
    }

    /// Read a live execution with its own authorization token.
    pub async fn read_live(
        &self,
        execution_id: &str,
        authorization: &str,
    ) -> Result<WorkflowExecution> {
        let execution = self
            .storage
            .get_execution(execution_id)
            .await?
            .ok_or_else(|| {
                Error::Unauthorized(
                    "Bad authorization key or execution_id might not exist".to_string(),
                )
            })?;

        if !tokens_match(&execution.authorization, authorization) {
            return Err(Error::Unauthorized(
                "Bad authorization key or execution_id might not exist".to_string(),
            ));
        }

        Ok(execution)
    }
}

#[derive(Debug, Default)]
struct DispatchPlan {
    onprem: Vec<String>,
    cloud: bool,
}

/// WAITING results continue when an execution is resumed.
fn continue_waiting_results(execution: &mut WorkflowExecution) {
    for result in &mut execution.results {
        if result.status == ActionStatus::Waiting {
            result.status = ActionStatus::Finished;
            result.result = "Continuing".to_string();
        }
    }
}

/// Replace-in-place by action id, appending when no slot exists. When a slot
/// is replaced and its action declares an execution-variable binding, the
/// new payload is copied into that variable first.
fn merge_result(execution: &mut WorkflowExecution, action_result: ActionResult) {
    match execution
        .results
        .iter()
        .position(|r| r.action.id == action_result.action.id)
    {
        Some(index) => {
            let bound_variable = execution.results[index]
                .action
                .execution_variable
                .as_ref()
                .map(|v| v.name.clone())
                .filter(|name| !name.is_empty());
            if let Some(name) = bound_variable {
                if let Some(variable) = execution
                    .execution_variables
                    .iter_mut()
                    .find(|v| v.name == name)
                {
                    variable.value = action_result.result.clone();
                }
            }

            info!(
                "Updating {} in {} from {} to {}",
                action_result.action.id,
                execution.execution_id,
                execution.results[index].status,
                action_result.status
            );
            execution.results[index] = action_result;
        }
        None => {
            info!(
                "Setting value of {} in {} to {}",
                action_result.action.id, execution.execution_id, action_result.status
            );
            execution.results.push(action_result);
        }
    }
}

/// Whether a SKIPPED result has a parent whose own result is neither
/// SKIPPED nor FAILURE. Such a node was skipped prematurely.
fn has_live_parent(execution: &WorkflowExecution, result: &ActionResult) -> bool {
    execution
        .workflow
        .parents_of(&result.action.id)
        .filter_map(|parent| execution.result_for(parent))
        .any(|parent_result| {
            !matches!(
                parent_result.status,
                ActionStatus::Skipped | ActionStatus::Failure
            )
        })
}

/// Drop SKIPPED results whose parents turned out alive so workers
/// re-consider those nodes.
fn reconcile_skipped(execution: &mut WorkflowExecution) {
    let removable: Vec<String> = execution
        .results
        .iter()
        .filter(|r| r.status == ActionStatus::Skipped && has_live_parent(execution, r))
        .map(|r| r.action.id.clone())
        .collect();

    if !removable.is_empty() {
        execution
            .results
            .retain(|r| !removable.iter().any(|id| id == &r.action.id));
    }
}

/// Truncate oversized result payloads so the execution document stays
/// storable.
fn enforce_size_limit(execution: &mut WorkflowExecution) {
    let serialized_len = match serde_json::to_vec(execution) {
        Ok(bytes) => bytes.len(),
        Err(_) => return,
    };
    if serialized_len < MAX_EXECUTION_BYTES {
        return;
    }

    error!("Result length is too long! Need to reduce result size");
    for result in &mut execution.results {
        if result.result.len() > MAX_RESULT_BYTES {
            result.result = OVERSIZED_RESULT_ERROR.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Environment;
    use crate::workflow::{Action, Branch, Org, Variable, Workflow, WorkflowConfiguration};

    fn test_engine() -> ExecutionEngine {
        let storage = SqliteStorage::open_in_memory().unwrap();
        // Port 9 is discard; nothing listens there in tests.
        let cloudsync = CloudSyncClient::new("http://127.0.0.1:9", "test-key");
        ExecutionEngine::new(storage, cloudsync)
    }

    fn uuid_like(seed: u8) -> String {
        format!("00000000-0000-4000-8000-{:012}", seed)
    }

    fn action(id: &str) -> Action {
        Action {
            id: id.to_string(),
            name: format!("action_{}", id),
            label: id.to_string(),
            app_name: "TestApp".to_string(),
            app_id: "app-1".to_string(),
            environment: "internal".to_string(),
            is_valid: true,
            ..Action::default()
        }
    }

    fn branch(source: &str, destination: &str) -> Branch {
        Branch {
            source_id: source.to_string(),
            destination_id: destination.to_string(),
            ..Branch::default()
        }
    }

    fn workflow(
        id_seed: u8,
        actions: Vec<Action>,
        branches: Vec<Branch>,
        exit_on_error: bool,
    ) -> Workflow {
        Workflow {
            id: uuid_like(id_seed),
            name: "test".to_string(),
            owner: "user-1".to_string(),
            org_id: "org-1".to_string(),
            executing_org: Org {
                id: "org-1".to_string(),
                name: "org".to_string(),
            },
            start: actions[0].id.clone(),
            is_valid: true,
            configuration: WorkflowConfiguration {
                exit_on_error,
                start_from_top: true,
            },
            actions,
            branches,
            ..Workflow::default()
        }
    }

    async fn seed(engine: &ExecutionEngine, workflow: &Workflow) {
        engine
            .storage()
            .set_environment(&Environment {
                name: "internal".to_string(),
                org_id: "org-1".to_string(),
                env_type: "onprem".to_string(),
                ..Environment::default()
            })
            .await
            .unwrap();
        engine.storage().set_workflow(workflow).await.unwrap();
    }

    async fn start_execution(engine: &ExecutionEngine, workflow: &Workflow) -> WorkflowExecution {
        engine
            .start(&workflow.id, StartRequest::default())
            .await
            .unwrap()
            .unwrap()
    }

    fn result_for(
        execution: &WorkflowExecution,
        node: &str,
        status: ActionStatus,
        payload: &str,
    ) -> ActionResult {
        ActionResult {
            execution_id: execution.execution_id.clone(),
            authorization: execution.authorization.clone(),
            action: execution.workflow.get_action(node).unwrap().clone(),
            result: payload.to_string(),
            status,
            started_at: 1,
            completed_at: 2,
        }
    }

    // ------------------------------------------------------------------
    // Start
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_start_creates_execution_and_enqueues() {
        let engine = test_engine();
        let wf = workflow(
            1,
            vec![action("a"), action("b")],
            vec![branch("a", "b")],
            false,
        );
        seed(&engine, &wf).await;

        let execution = start_execution(&engine, &wf).await;
        assert_eq!(execution.status, ExecutionStatus::Executing);
        assert_eq!(execution.authorization.len(), 36);
        assert_eq!(execution.start, "a");
        assert!(execution.started_at > 0);

        let pending = queue::peek(engine.storage(), "internal").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].execution_id, execution.execution_id);
        assert_eq!(pending[0].authorization, execution.authorization);

        let stat = engine
            .storage()
            .get_statistic("workflow_executions")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.total, 1);
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_workflow() {
        let engine = test_engine();
        let mut wf = workflow(1, vec![action("a")], vec![], false);
        wf.is_valid = false;
        seed(&engine, &wf).await;

        let err = engine.start(&wf.id, StartRequest::default()).await.unwrap_err();
        assert!(err.to_string().contains("invalid"));
    }

    #[tokio::test]
    async fn test_start_rejects_missing_org() {
        let engine = test_engine();
        let mut wf = workflow(1, vec![action("a")], vec![], false);
        wf.executing_org = Org::default();
        seed(&engine, &wf).await;

        let err = engine.start(&wf.id, StartRequest::default()).await.unwrap_err();
        assert!(err.to_string().contains("executing org"));
    }

    #[tokio::test]
    async fn test_start_from_middle_skips_non_descendants() {
        // Scenario: start=C in A->B->C->D with start_from_top=false.
        let engine = test_engine();
        let mut wf = workflow(
            1,
            vec![action("a"), action("b"), action("c"), action("d")],
            vec![branch("a", "b"), branch("b", "c"), branch("c", "d")],
            false,
        );
        wf.configuration.start_from_top = false;
        seed(&engine, &wf).await;

        // Start ids are uuid-length in production; the engine only
        // length-checks the POST path, so use the query path here.
        let request = StartRequest {
            start: Some("c".to_string()),
            ..StartRequest::default()
        };

        let execution = engine.start(&wf.id, request).await.unwrap().unwrap();
        assert_eq!(execution.start, "c");

        let skipped: Vec<&str> = execution
            .results
            .iter()
            .filter(|r| r.status == ActionStatus::Skipped)
            .map(|r| r.action.id.as_str())
            .collect();
        assert_eq!(skipped.len(), 2);
        assert!(skipped.contains(&"a"));
        assert!(skipped.contains(&"b"));
        for result in &execution.results {
            assert_eq!(result.result, SKIPPED_NOT_UNDER_STARTNODE);
        }
        assert!(execution.result_for("d").is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_unknown_start_node() {
        let engine = test_engine();
        let wf = workflow(1, vec![action("a")], vec![], false);
        seed(&engine, &wf).await;

        let request = StartRequest {
            start: Some("ghost".to_string()),
            ..StartRequest::default()
        };
        let err = engine.start(&wf.id, request).await.unwrap_err();
        assert!(err.to_string().contains("doesn't exist"));
    }

    #[tokio::test]
    async fn test_start_injects_credentials_without_persisting_them() {
        let engine = test_engine();
        let mut wf = workflow(1, vec![action("a")], vec![], false);
        wf.actions[0].authentication_id = "auth-1".to_string();
        wf.actions[0].parameters = vec![crate::workflow::ActionParameter {
            name: "apikey".to_string(),
            ..crate::workflow::ActionParameter::default()
        }];
        seed(&engine, &wf).await;

        engine
            .storage()
            .set_app_auth(&crate::credentials::AppAuthenticationStorage {
                id: "auth-1".to_string(),
                org_id: "org-1".to_string(),
                fields: vec![crate::credentials::AuthField {
                    key: "apikey".to_string(),
                    value: "s3cret".to_string(),
                }],
                active: true,
                ..crate::credentials::AppAuthenticationStorage::default()
            })
            .await
            .unwrap();

        let execution = start_execution(&engine, &wf).await;
        assert_eq!(
            execution.workflow.actions[0].parameters[0].value,
            "s3cret"
        );

        // The workflow record itself is untouched.
        let stored = engine.storage().get_workflow(&wf.id).await.unwrap().unwrap();
        assert!(stored.actions[0].parameters[0].value.is_empty());
    }

    // ------------------------------------------------------------------
    // Submit: linear success (scenario 1)
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_linear_success_finishes() {
        let engine = test_engine();
        let wf = workflow(
            1,
            vec![action("a"), action("b"), action("c")],
            vec![branch("a", "b"), branch("b", "c")],
            false,
        );
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        for node in ["a", "b"] {
            engine
                .submit_result(result_for(&execution, node, ActionStatus::Success, "ok"))
                .await
                .unwrap();
        }
        engine
            .submit_result(result_for(
                &execution,
                "c",
                ActionStatus::Success,
                "final payload",
            ))
            .await
            .unwrap();

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Finished);
        assert_eq!(stored.result, "final payload");
        assert!(stored.completed_at > 0);
        assert_eq!(stored.results.len(), 3);

        let stat = engine
            .storage()
            .get_statistic("workflow_executions_success")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.total, 1);
    }

    // ------------------------------------------------------------------
    // Submit: exit on error (scenario 2)
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_exit_on_error_terminates_and_rejects_further_submits() {
        let engine = test_engine();
        let wf = workflow(
            1,
            vec![action("a"), action("b"), action("c")],
            vec![branch("a", "b"), branch("b", "c")],
            true,
        );
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        engine
            .submit_result(result_for(&execution, "a", ActionStatus::Success, "ok"))
            .await
            .unwrap();
        engine
            .submit_result(result_for(&execution, "b", ActionStatus::Failure, "boom"))
            .await
            .unwrap();

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Failure);
        assert_eq!(stored.last_node, "b");
        assert!(stored.result_for("c").is_none());

        let err = engine
            .submit_result(result_for(&execution, "c", ActionStatus::Success, "late"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("aborted"));

        let stat = engine
            .storage()
            .get_statistic("workflow_executions_failure")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.total, 1);
    }

    // ------------------------------------------------------------------
    // Submit: branch skip with multi-parent guard (scenario 3)
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_failure_does_not_skip_node_with_live_parent() {
        // A->B->D and A->C->D; B fails but C may still succeed, so D is
        // not auto-skipped.
        let engine = test_engine();
        let wf = workflow(
            1,
            vec![action("a"), action("b"), action("c"), action("d")],
            vec![
                branch("a", "b"),
                branch("a", "c"),
                branch("b", "d"),
                branch("c", "d"),
            ],
            false,
        );
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        engine
            .submit_result(result_for(&execution, "a", ActionStatus::Success, "ok"))
            .await
            .unwrap();
        engine
            .submit_result(result_for(&execution, "b", ActionStatus::Failure, "boom"))
            .await
            .unwrap();

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Executing);
        assert_eq!(
            stored.result_for("b").unwrap().status,
            ActionStatus::Failure
        );
        assert!(stored.result_for("d").is_none());

        engine
            .submit_result(result_for(&execution, "c", ActionStatus::Success, "ok"))
            .await
            .unwrap();
        engine
            .submit_result(result_for(&execution, "d", ActionStatus::Success, "done"))
            .await
            .unwrap();

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Finished);
        assert_eq!(stored.result, "done");
    }

    #[tokio::test]
    async fn test_failure_skips_exclusive_descendants() {
        // Linear A->B->C without exit_on_error: B's failure skips C.
        let engine = test_engine();
        let wf = workflow(
            1,
            vec![action("a"), action("b"), action("c")],
            vec![branch("a", "b"), branch("b", "c")],
            false,
        );
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        engine
            .submit_result(result_for(&execution, "a", ActionStatus::Success, "ok"))
            .await
            .unwrap();
        engine
            .submit_result(result_for(&execution, "b", ActionStatus::Failure, "boom"))
            .await
            .unwrap();

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        let skipped = stored.result_for("c").unwrap();
        assert_eq!(skipped.status, ActionStatus::Skipped);
        assert_eq!(skipped.result, SKIPPED_PREVIOUS_NODE);

        // All actions accounted for and none EXECUTING: the termination
        // predicate treats this as complete.
        assert_eq!(stored.status, ExecutionStatus::Finished);
    }

    // ------------------------------------------------------------------
    // Submit: idempotence and authorization (invariants)
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_submit_rejects_bad_authorization() {
        let engine = test_engine();
        let wf = workflow(1, vec![action("a")], vec![], false);
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        let mut result = result_for(&execution, "a", ActionStatus::Success, "ok");
        result.authorization = "wrong-token".to_string();
        let err = engine.submit_result(result).await.unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_resubmit_replaces_in_place() {
        let engine = test_engine();
        let wf = workflow(
            1,
            vec![action("a"), action("b")],
            vec![branch("a", "b")],
            false,
        );
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        engine
            .submit_result(result_for(&execution, "a", ActionStatus::Executing, ""))
            .await
            .unwrap();
        engine
            .submit_result(result_for(&execution, "a", ActionStatus::Success, "ok"))
            .await
            .unwrap();

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.results.len(), 1);
        assert_eq!(stored.result_for("a").unwrap().status, ActionStatus::Success);
    }

    #[tokio::test]
    async fn test_submit_after_finished_rejects_and_does_not_mutate() {
        let engine = test_engine();
        let wf = workflow(1, vec![action("a")], vec![], false);
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        engine
            .submit_result(result_for(&execution, "a", ActionStatus::Success, "ok"))
            .await
            .unwrap();

        let before = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(before.status, ExecutionStatus::Finished);

        let err = engine
            .submit_result(result_for(&execution, "a", ActionStatus::Success, "again"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already finished"));

        let after = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::to_string(&before).unwrap(),
            serde_json::to_string(&after).unwrap()
        );
    }

    #[tokio::test]
    async fn test_execution_variable_binding() {
        let engine = test_engine();
        let mut wf = workflow(
            1,
            vec![action("a"), action("b")],
            vec![branch("a", "b")],
            false,
        );
        wf.actions[0].execution_variable = Some(Variable {
            name: "found_iocs".to_string(),
            ..Variable::default()
        });
        wf.execution_variables = vec![Variable {
            name: "found_iocs".to_string(),
            ..Variable::default()
        }];
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        engine
            .submit_result(result_for(&execution, "a", ActionStatus::Executing, ""))
            .await
            .unwrap();
        engine
            .submit_result(result_for(
                &execution,
                "a",
                ActionStatus::Success,
                "10.0.0.8",
            ))
            .await
            .unwrap();

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.execution_variables[0].value, "10.0.0.8");
    }

    // ------------------------------------------------------------------
    // Submit: user input (scenario 5, dispatcher failure path)
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_user_input_dispatch_failure_aborts() {
        let engine = test_engine();
        let mut wf = workflow(1, vec![action("a")], vec![], false);
        wf.actions[0].app_name = "User Input".to_string();
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        // The embedded payload is the trigger configuration; the sync
        // endpoint is unreachable in tests, so dispatch fails and the
        // execution aborts with the error captured.
        let trigger = serde_json::json!({
            "id": "a",
            "app_name": "User Input",
            "parameters": [
                {"name": "type", "value": "email"},
                {"name": "email", "value": "analyst@example.com"}
            ]
        });
        let mut result = result_for(&execution, "a", ActionStatus::Waiting, "");
        result.result = trigger.to_string();

        assert!(engine.submit_result(result).await.is_err());

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Aborted);
        assert!(stored.result_for("a").unwrap().result.contains("Cloud error"));
    }

    #[tokio::test]
    async fn test_user_input_answer_false_aborts_referenced_execution() {
        let engine = test_engine();
        let mut wf = workflow(1, vec![action("a")], vec![], false);
        wf.actions[0].app_name = "User Input".to_string();
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        // Simulate the pause: the node reported WAITING earlier.
        let mut paused = execution.clone();
        paused.results = vec![result_for(&execution, "a", ActionStatus::Waiting, "")];
        paused.status = ExecutionStatus::Waiting;
        engine.storage().set_execution(&paused).await.unwrap();

        let request = StartRequest {
            start: Some("a".to_string()),
            reference_execution: Some(execution.execution_id.clone()),
            answer: Some("false".to_string()),
            note: Some("not a real incident".to_string()),
            ..StartRequest::default()
        };
        let outcome = engine.start(&wf.id, request).await.unwrap();
        assert!(outcome.is_none());

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Aborted);
        assert_eq!(stored.last_node, "a");
        assert_eq!(
            stored.result_for("a").unwrap().result,
            "User note: not a real incident"
        );
    }

    // ------------------------------------------------------------------
    // Submit: oversized payloads (scenario 6)
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_oversized_payloads_are_truncated() {
        let engine = test_engine();
        let wf = workflow(
            1,
            vec![action("a"), action("b")],
            vec![branch("a", "b")],
            false,
        );
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        let big = "x".repeat(900_000);
        engine
            .submit_result(result_for(&execution, "a", ActionStatus::Success, &big))
            .await
            .unwrap();
        engine
            .submit_result(result_for(&execution, "b", ActionStatus::Success, &big))
            .await
            .unwrap();

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        for result in &stored.results {
            assert_eq!(result.result, OVERSIZED_RESULT_ERROR);
        }
    }

    // ------------------------------------------------------------------
    // Abort
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_abort_rewrites_executing_results() {
        let engine = test_engine();
        let wf = workflow(
            1,
            vec![action("a"), action("b")],
            vec![branch("a", "b")],
            false,
        );
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        engine
            .submit_result(result_for(&execution, "a", ActionStatus::Executing, ""))
            .await
            .unwrap();
        engine.abort(&execution.execution_id).await.unwrap();

        let stored = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Aborted);
        assert!(stored.completed_at > 0);
        assert_eq!(
            stored.result_for("a").unwrap().result,
            ABORTED_OTHER_NODE
        );
    }

    #[tokio::test]
    async fn test_abort_is_rejected_when_terminal() {
        let engine = test_engine();
        let wf = workflow(1, vec![action("a")], vec![], false);
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        engine.abort(&execution.execution_id).await.unwrap();
        let before = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();

        let err = engine.abort(&execution.execution_id).await.unwrap_err();
        assert!(err.to_string().contains("can't be aborted"));

        let after = engine
            .storage()
            .get_execution(&execution.execution_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::to_string(&before).unwrap(),
            serde_json::to_string(&after).unwrap()
        );
    }

    // ------------------------------------------------------------------
    // Live reads
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_read_live_requires_matching_token() {
        let engine = test_engine();
        let wf = workflow(1, vec![action("a")], vec![], false);
        seed(&engine, &wf).await;
        let execution = start_execution(&engine, &wf).await;

        let read = engine
            .read_live(&execution.execution_id, &execution.authorization)
            .await
            .unwrap();
        assert_eq!(read.execution_id, execution.execution_id);

        assert!(engine
            .read_live(&execution.execution_id, "bad-token")
            .await
            .is_err());
    }
}
