//! Outbound intents to the cloud-sync endpoint.
//!
//! The control plane never delivers email or SMS itself and never runs
//! cloud actions; it emits intents to an external sync service and treats
//! any non-2xx answer as a dispatch failure.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::workflow::Trigger;

/// A generic job for the sync service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudSyncJob {
    #[serde(rename = "type")]
    pub job_type: String,
    pub action: String,
    pub org_id: String,
    #[serde(default)]
    pub primary_item_id: String,
    #[serde(default)]
    pub secondary_item: String,
    #[serde(default)]
    pub third_item: String,
    #[serde(default)]
    pub fourth_item: String,
    #[serde(default)]
    pub fifth_item: String,
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    success: bool,
    #[serde(default)]
    reason: String,
}

/// HTTP client for the sync service.
#[derive(Clone)]
pub struct CloudSyncClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl CloudSyncClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Dispatching cloud sync request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let parsed: SyncResponse = response.json().await.unwrap_or(SyncResponse {
            success: false,
            reason: format!("Unparseable response with status {}", status),
        });

        if !status.is_success() {
            return Err(Error::CloudSync(format!(
                "Got status code {} when dispatching. Expected 200.",
                status.as_u16()
            )));
        }
        if !parsed.success {
            return Err(Error::CloudSync(parsed.reason));
        }

        Ok(())
    }

    /// Send a generic sync job (schedules, user-input notifications).
    pub async fn execute_action(&self, job: &CloudSyncJob) -> Result<()> {
        self.post_json("/api/v1/cloud/sync", job).await
    }

    /// Forward a single action for remote execution.
    pub async fn execute_node<T: Serialize>(&self, payload: &T) -> Result<()> {
        self.post_json("/api/v1/cloud/sync/execute_node", payload).await
    }
}

/// Emit the email/SMS intents for a user-input pause.
///
/// The trigger's parameters decide the contact channels: `type` holds a
/// comma-ish list containing "email" and/or "sms", `alertinfo` the message,
/// and `email`/`sms` the recipients.
pub async fn dispatch_user_input(
    client: &CloudSyncClient,
    trigger: &Trigger,
    org_id: &str,
    workflow_id: &str,
    reference_execution: &str,
) -> Result<()> {
    let mut contact_type = "";
    let mut alert_info = "";
    let mut email = "";
    let mut sms = "";
    for param in &trigger.parameters {
        match param.name.as_str() {
            "type" => contact_type = &param.value,
            "alertinfo" => alert_info = &param.value,
            "email" => email = &param.value,
            "sms" => sms = &param.value,
            _ => {}
        }
    }

    if contact_type.is_empty() {
        return Err(Error::Execution(
            "No contact option specified in user input".to_string(),
        ));
    }

    let start_node = trigger.id.clone();
    if contact_type.contains("email") {
        let job = CloudSyncJob {
            job_type: "user_input".to_string(),
            action: "send_email".to_string(),
            org_id: org_id.to_string(),
            primary_item_id: workflow_id.to_string(),
            secondary_item: start_node.clone(),
            third_item: alert_info.to_string(),
            fourth_item: email.to_string(),
            fifth_item: reference_execution.to_string(),
        };
        client.execute_action(&job).await?;
        info!("Dispatched user-input email intent to {}", email);
    }

    if contact_type.contains("sms") {
        let job = CloudSyncJob {
            job_type: "user_input".to_string(),
            action: "send_sms".to_string(),
            org_id: org_id.to_string(),
            primary_item_id: workflow_id.to_string(),
            secondary_item: start_node,
            third_item: alert_info.to_string(),
            fourth_item: sms.to_string(),
            fifth_item: reference_execution.to_string(),
        };
        client.execute_action(&job).await?;
        info!("Dispatched user-input SMS intent to {}", sms);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::ActionParameter;

    #[tokio::test]
    async fn test_dispatch_user_input_requires_contact_type() {
        let client = CloudSyncClient::new("http://localhost:1", "key");
        let trigger = Trigger {
            id: "t1".to_string(),
            parameters: vec![ActionParameter {
                name: "email".to_string(),
                value: "analyst@example.com".to_string(),
                ..ActionParameter::default()
            }],
            ..Trigger::default()
        };

        let err = dispatch_user_input(&client, &trigger, "org", "wf", "exec")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No contact option"));
    }

    #[test]
    fn test_job_wire_format_uses_type_key() {
        let job = CloudSyncJob {
            job_type: "schedule".to_string(),
            action: "start".to_string(),
            org_id: "org-1".to_string(),
            ..CloudSyncJob::default()
        };
        let encoded = serde_json::to_value(&job).unwrap();
        assert_eq!(encoded["type"], "schedule");
        assert_eq!(encoded["action"], "start");
    }
}
