//! Per-environment dispatch queue.
//!
//! Each environment has a single inbox record holding an ordered sequence
//! of pending execution requests. Workers poll the whole sequence and ack
//! the items they picked up. The record is read-modify-written without
//! compare-and-set; workers must tolerate redelivery and the engine
//! tolerates a dropped request through the worker's next poll.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::execution::{ExecutionRequest, ExecutionRequestWrapper};
use crate::storage::SqliteStorage;

/// Append a request to an environment's inbox.
pub async fn enqueue(
    storage: &SqliteStorage,
    environment: &str,
    request: ExecutionRequest,
) -> Result<()> {
    if environment.is_empty() {
        return Err(Error::Queue("Environment name can't be empty".to_string()));
    }

    let mut wrapper = storage
        .get_queue(environment)
        .await?
        .unwrap_or_default();
    wrapper.data.push(request);

    storage.set_queue(environment, &wrapper).await?;
    Ok(())
}

/// Return the current pending sequence for an environment.
pub async fn peek(storage: &SqliteStorage, environment: &str) -> Result<Vec<ExecutionRequest>> {
    let wrapper = storage
        .get_queue(environment)
        .await?
        .unwrap_or_default();
    Ok(wrapper.data)
}

/// Remove acknowledged requests from an environment's inbox.
///
/// A request is removed when its `(execution_id, workflow_id)` pair appears
/// in `acked`. Pairs that are no longer in the sequence are tolerated so
/// workers can retry a confirm safely.
pub async fn ack(
    storage: &SqliteStorage,
    environment: &str,
    acked: &[ExecutionRequest],
) -> Result<()> {
    let wrapper = match storage.get_queue(environment).await? {
        Some(wrapper) => wrapper,
        None => {
            warn!("Confirm for empty queue in environment {}", environment);
            return Ok(());
        }
    };

    let before = wrapper.data.len();
    let remaining: Vec<ExecutionRequest> = wrapper
        .data
        .into_iter()
        .filter(|pending| {
            !acked.iter().any(|done| {
                done.execution_id == pending.execution_id
                    && done.workflow_id == pending.workflow_id
            })
        })
        .collect();

    if remaining.len() != before {
        info!(
            environment = %environment,
            removed = before - remaining.len(),
            "Confirmed execution requests"
        );
        storage
            .set_queue(environment, &ExecutionRequestWrapper { data: remaining })
            .await?;
    }

    Ok(())
}
