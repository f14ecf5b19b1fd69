//! Workflow validation.
//!
//! A workflow is admitted for execution only when `is_valid` is set, and
//! `is_valid` is only set here. Hard failures reject the save outright;
//! soft failures (unknown credential, unknown app) annotate the offending
//! action, clear `is_valid`, and let the save proceed so the frontend can
//! show the errors in place.

use std::collections::HashSet;

use tracing::warn;

use super::types::Workflow;
use crate::credentials::AppAuthenticationStorage;
use crate::error::{Error, Result};
use crate::storage::{Environment, WorkflowApp};

/// Registry snapshots the validator resolves references against.
pub struct ValidationContext<'a> {
    pub environments: &'a [Environment],
    pub apps: &'a [WorkflowApp],
    pub auths: &'a [AppAuthenticationStorage],
}

/// Validate a workflow in place.
///
/// Rules, in order:
/// 1. exactly one action carries the workflow's start id;
/// 2. every action environment resolves to a non-archived environment;
/// 3. app references resolve; the named action exists on the app; required
///    parameters are present, and present STATIC_VALUE required parameters
///    are non-empty;
/// 4. unknown authentication ids are recorded per-action and invalidate the
///    workflow without aborting validation;
/// 5. workflow variables are non-empty;
/// 6. branch endpoints exist among actions and triggers; orphan nodes are
///    tolerated only in single-action workflows.
pub fn validate_workflow(workflow: &mut Workflow, ctx: &ValidationContext) -> Result<()> {
    workflow.errors.clear();
    let mut valid = true;

    // 1. Startnode.
    let start_matches = workflow
        .actions
        .iter()
        .filter(|a| a.id == workflow.start)
        .count();
    if !workflow.actions.is_empty() && start_matches != 1 {
        return Err(Error::Validation("You need to set a startnode.".to_string()));
    }
    for action in &mut workflow.actions {
        action.is_start_node = action.id == workflow.start;
    }

    // 2. Environments.
    let live_envs: HashSet<&str> = ctx
        .environments
        .iter()
        .filter(|e| !e.archived)
        .map(|e| e.name.as_str())
        .collect();
    for action in &workflow.actions {
        if action.environment.is_empty() {
            return Err(Error::Validation(format!(
                "An environment for {} is required",
                action.label
            )));
        }
        if !live_envs.contains(action.environment.as_str()) {
            return Err(Error::Validation(format!(
                "Couldn't find environment {}. Maybe it's inactive?",
                action.environment
            )));
        }
    }

    // 3. App references and parameters.
    for action in &mut workflow.actions {
        let app = ctx.apps.iter().find(|app| {
            app.id == action.app_id
                || (app.name == action.app_name && app.app_version == action.app_version)
        });

        let app = match app {
            Some(app) => app,
            None => {
                warn!("App {} doesn't exist. Adding as error.", action.app_name);
                workflow
                    .errors
                    .push(format!("App {} doesn't exist", action.app_name));
                action.errors.push("This app doesn't exist.".to_string());
                action.is_valid = false;
                valid = false;
                continue;
            }
        };

        let app_action = app
            .actions
            .iter()
            .find(|a| a.name == action.name)
            .ok_or_else(|| {
                Error::Validation(format!("App action {} doesn't exist", action.name))
            })?;

        for expected in &app_action.parameters {
            match action.parameters.iter().find(|p| p.name == expected.name) {
                Some(present) => {
                    if present.value.is_empty()
                        && present.variant == "STATIC_VALUE"
                        && present.required
                    {
                        return Err(Error::Validation(format!(
                            "App action {} with required param '{}' is empty.",
                            action.name, expected.name
                        )));
                    }
                }
                None => {
                    if expected.required {
                        return Err(Error::Validation(format!(
                            "App action {} with required param '{}' is empty.",
                            action.name, expected.name
                        )));
                    }
                }
            }
        }
    }

    // 4. Credentials. Unknown ids annotate and continue.
    for action in &mut workflow.actions {
        if action.authentication_id.is_empty() {
            continue;
        }
        let found = ctx
            .auths
            .iter()
            .any(|auth| auth.id == action.authentication_id);
        if !found {
            warn!(
                "App auth {} doesn't exist. Setting error",
                action.authentication_id
            );
            workflow.errors.push(format!(
                "App authentication for {} doesn't exist!",
                action.app_name
            ));
            action
                .errors
                .push("App authentication doesn't exist".to_string());
            action.is_valid = false;
            action.authentication_id.clear();
            valid = false;
        }
    }

    // 5. Workflow variables.
    for variable in &workflow.workflow_variables {
        if variable.value.is_empty() {
            return Err(Error::Validation(format!(
                "Variable {} can't be empty",
                variable.name
            )));
        }
    }

    // 6. Branch endpoints and orphans.
    let known_nodes: HashSet<&str> = workflow
        .actions
        .iter()
        .map(|a| a.id.as_str())
        .chain(workflow.triggers.iter().map(|t| t.id.as_str()))
        .collect();
    for branch in &workflow.branches {
        if !known_nodes.contains(branch.source_id.as_str())
            || !known_nodes.contains(branch.destination_id.as_str())
        {
            return Err(Error::Validation(format!(
                "Branch {} -> {} references a node that doesn't exist",
                branch.source_id, branch.destination_id
            )));
        }
    }
    if workflow.actions.len() > 1 {
        let connected: HashSet<&str> = workflow
            .branches
            .iter()
            .flat_map(|b| [b.source_id.as_str(), b.destination_id.as_str()])
            .collect();
        for node in &known_nodes {
            if !connected.contains(node) {
                workflow
                    .errors
                    .push(format!("Node {} has no branches", node));
                valid = false;
            }
        }
    }

    for action in &mut workflow.actions {
        if action.errors.is_empty() {
            action.is_valid = true;
        }
    }
    workflow.is_valid = valid;

    Ok(())
}
