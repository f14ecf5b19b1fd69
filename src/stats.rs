//! Store-backed statistics recorder.
//!
//! Counters feed observability, never control flow: callers log and swallow
//! failures. There is no transaction around load-modify-store, so racing
//! increments accept last-write-wins on the total.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::execution::{ActionStatus, WorkflowExecution};
use crate::storage::{AppExecutionExample, SqliteStorage, StatisticsData, StatisticsItem};

/// Add `amount` to the counter `fieldname`, recording which entity the
/// increment refers to.
pub async fn increment(
    storage: &SqliteStorage,
    fieldname: &str,
    reference: &str,
    amount: i64,
) -> Result<()> {
    let new_data = StatisticsData {
        timestamp: Utc::now().timestamp(),
        amount,
        id: reference.to_string(),
    };

    let item = match storage.get_statistic(fieldname).await? {
        Some(mut item) => {
            item.total += amount;
            item.data.push(new_data);
            item
        }
        None => StatisticsItem {
            fieldname: fieldname.to_string(),
            total: amount,
            data: vec![new_data],
        },
    };

    storage.set_statistic(&item).await
}

/// Increment a counter, logging instead of propagating failures.
pub async fn increment_quietly(
    storage: &SqliteStorage,
    fieldname: &str,
    reference: &str,
    amount: i64,
) {
    if let Err(e) = increment(storage, fieldname, reference, amount).await {
        warn!("Failed to increase {} stats: {}", fieldname, e);
    }
}

fn is_json(value: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(value).is_ok()
}

/// Collect per-app result examples from a finished execution.
///
/// Results are grouped by `action.app_id` and only payloads that parse as
/// JSON are kept. One record per `(execution_id, app_id)` is persisted;
/// individual write failures are logged and skipped.
pub async fn collect_examples(storage: &SqliteStorage, execution: &WorkflowExecution) {
    let mut examples: Vec<AppExecutionExample> = Vec::new();

    for result in &execution.results {
        if !is_json(&result.result) {
            continue;
        }

        let index = match examples.iter().position(|e| e.app_id == result.action.app_id) {
            Some(index) => index,
            None => {
                examples.push(AppExecutionExample {
                    example_id: format!("{}_{}", execution.execution_id, result.action.app_id),
                    app_name: result.action.app_name.clone(),
                    app_version: result.action.app_version.clone(),
                    app_action: result.action.name.clone(),
                    app_id: result.action.app_id.clone(),
                    ..AppExecutionExample::default()
                });
                examples.len() - 1
            }
        };
        let entry = &mut examples[index];

        match result.status {
            ActionStatus::Aborted | ActionStatus::Failure => {
                entry.failure_examples.push(result.result.clone());
            }
            ActionStatus::Finished | ActionStatus::Success => {
                entry.success_examples.push(result.result.clone());
            }
            other => {
                debug!("No example bucket for result status {}", other);
            }
        }
    }

    if examples.is_empty() {
        return;
    }

    let mut stored = 0;
    for example in &examples {
        match storage.set_example_result(example).await {
            Ok(()) => stored += 1,
            Err(e) => warn!("Failed storing example {}: {}", example.example_id, e),
        }
    }
    info!(
        execution_id = %execution.execution_id,
        stored,
        "Collected app result examples"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ActionResult;
    use crate::workflow::Action;

    #[tokio::test]
    async fn test_increment_creates_then_accumulates() {
        let storage = SqliteStorage::open_in_memory().unwrap();

        increment(&storage, "workflow_executions", "wf-1", 1).await.unwrap();
        increment(&storage, "workflow_executions", "wf-1", 1).await.unwrap();
        increment(&storage, "workflow_executions", "wf-2", 3).await.unwrap();

        let item = storage
            .get_statistic("workflow_executions")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.total, 5);
        assert_eq!(item.data.len(), 3);
        assert_eq!(item.data[2].id, "wf-2");
    }

    fn result_with(app_id: &str, status: ActionStatus, payload: &str) -> ActionResult {
        ActionResult {
            execution_id: "exec-1".to_string(),
            authorization: String::new(),
            action: Action {
                id: format!("node-{}", app_id),
                app_id: app_id.to_string(),
                app_name: "TestApp".to_string(),
                ..Action::default()
            },
            result: payload.to_string(),
            status,
            started_at: 0,
            completed_at: 0,
        }
    }

    #[tokio::test]
    async fn test_collect_examples_filters_non_json() {
        let storage = SqliteStorage::open_in_memory().unwrap();
        let execution = WorkflowExecution {
            execution_id: "exec-1".to_string(),
            results: vec![
                result_with("app-a", ActionStatus::Success, r#"{"ok": true}"#),
                result_with("app-a", ActionStatus::Failure, r#"{"ok": false}"#),
                result_with("app-b", ActionStatus::Success, "plain text, not json"),
            ],
            ..WorkflowExecution::default()
        };

        collect_examples(&storage, &execution).await;

        let stored = storage
            .get_example_result("exec-1_app-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.success_examples.len(), 1);
        assert_eq!(stored.failure_examples.len(), 1);

        // app-b's payload was not JSON, so no record exists.
        assert!(storage
            .get_example_result("exec-1_app-b")
            .await
            .unwrap()
            .is_none());
    }
}
