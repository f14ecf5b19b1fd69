//! App credentials.
//!
//! Credentials are org-scoped records of key/value fields for one app,
//! referenced from actions by `authentication_id`. They are inlined into
//! action parameters at execution start and never persisted back into a
//! workflow record.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::SqliteStorage;
use crate::workflow::Action;

/// Reference to the app a credential belongs to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppRef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub app_version: String,
}

/// One key/value field of a credential.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthField {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Tracks which workflow nodes use a credential.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthUsage {
    pub workflow_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// A stored app credential.
///
/// `workflow_count` and `node_count` mirror the usage list so listings can
/// show them without walking it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppAuthenticationStorage {
    pub id: String,
    #[serde(default)]
    pub org_id: String,
    #[serde(default)]
    pub app: AppRef,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub fields: Vec<AuthField>,
    #[serde(default)]
    pub usage: Vec<AuthUsage>,
    #[serde(default)]
    pub workflow_count: u64,
    #[serde(default)]
    pub node_count: u64,
    #[serde(default)]
    pub active: bool,
}

/// Rewrite an action's parameters from a credential's fields.
///
/// Every parameter whose name matches a field key takes the field's value.
/// Pure: callers decide what to do with the returned action, and the
/// credential is never mutated.
pub fn inject_credentials(action: &Action, auth: &AppAuthenticationStorage) -> Action {
    let mut updated = action.clone();
    for param in &mut updated.parameters {
        if let Some(field) = auth.fields.iter().find(|f| f.key == param.name) {
            param.value = field.value.clone();
        }
    }
    updated
}

/// Merge a `(workflow, node)` pair into a credential's usage and persist it.
///
/// Counters only move when something was actually added, so repeated saves
/// of the same workflow are no-ops. Callers treat failures as best-effort.
pub async fn update_app_auth(
    storage: &SqliteStorage,
    mut auth: AppAuthenticationStorage,
    workflow_id: &str,
    node_id: &str,
) -> Result<()> {
    let mut changed = false;

    match auth.usage.iter_mut().find(|u| u.workflow_id == workflow_id) {
        Some(usage) => {
            if !usage.nodes.iter().any(|n| n == node_id) {
                usage.nodes.push(node_id.to_string());
                auth.node_count += 1;
                changed = true;
            }
        }
        None => {
            auth.usage.push(AuthUsage {
                workflow_id: workflow_id.to_string(),
                nodes: vec![node_id.to_string()],
            });
            auth.workflow_count += 1;
            auth.node_count += 1;
            changed = true;
        }
    }

    if changed {
        debug!(
            auth_id = %auth.id,
            workflow_id = %workflow_id,
            node_id = %node_id,
            "Updating credential usage"
        );
        if let Err(e) = storage.set_app_auth(&auth).await {
            warn!("Failed updating credential usage for {}: {}", auth.id, e);
            return Err(e);
        }
    }

    Ok(())
}
