//! HTTP API server.
//!
//! Paths are stable for worker and frontend compatibility. Failures render
//! as `{"success": false, "reason": ...}`: 400 for malformed bodies, 401
//! for auth and logical rejections, 500 for storage.

mod middleware;

pub use middleware::{
    access_log_middleware, authenticate_user, bearer_token, request_id_middleware, RequestId,
    REQUEST_ID_HEADER,
};

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::execution::{
    tokens_match, ActionResult, ExecutionEngine, ExecutionRequestWrapper, StartRequest,
};
use crate::scheduler::Scheduler;
use crate::shutdown::ShutdownCoordinator;
use crate::stats;
use crate::storage::{SqliteStorage, User};
use crate::workflow::{
    Action, ScheduleSpec, Trigger, ValidationContext, Workflow, TRIGGER_SCHEDULE,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub storage: SqliteStorage,
    pub engine: ExecutionEngine,
    pub scheduler: Arc<Scheduler>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

fn error_response(e: Error) -> Response {
    match &e {
        Error::Storage(_) | Error::Database(_) | Error::Io(_) => error!("API error: {}", e),
        _ => warn!("API rejection: {}", e),
    }
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        Json(json!({"success": false, "reason": e.reason()})),
    )
        .into_response()
}

fn success_response() -> Response {
    Json(json!({"success": true})).into_response()
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(Error::from)
}

/// CORS layer from `PARAPET_CORS_ORIGINS` (comma-separated, default
/// http://localhost:3000).
pub fn create_cors_layer() -> CorsLayer {
    let origins_str = std::env::var("PARAPET_CORS_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000".to_string());

    let origins: Vec<HeaderValue> = origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(hv) => Some(hv),
                Err(e) => {
                    warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ])
}

/// Maximum request body size (results can carry large payloads).
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Default maximum concurrent requests.
const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 100;

fn max_concurrent_requests() -> usize {
    std::env::var("PARAPET_MAX_CONCURRENT_REQUESTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_MAX_CONCURRENT_REQUESTS)
}

/// Build the API router with middleware applied.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/metrics", get(prometheus_metrics))
        .route(
            "/api/v1/workflows",
            get(list_workflows).post(create_workflow),
        )
        .route(
            "/api/v1/workflows/{id}",
            get(get_workflow).put(save_workflow).delete(delete_workflow),
        )
        .route(
            "/api/v1/workflows/{id}/execute",
            get(execute_workflow_get).post(execute_workflow),
        )
        .route(
            "/api/v1/workflows/{id}/executions",
            get(list_workflow_executions),
        )
        .route(
            "/api/v1/workflows/{id}/executions/{eid}/abort",
            post(abort_execution),
        )
        .route("/api/v1/workflows/{id}/schedule", post(schedule_workflow))
        .route(
            "/api/v1/workflows/{id}/schedule/{sid}",
            delete(stop_schedule),
        )
        .route("/api/v1/workflows/queue", get(get_workflow_queue))
        .route(
            "/api/v1/workflows/queue/confirm",
            post(confirm_workflow_queue),
        )
        .route("/api/v1/streams", post(handle_stream_result))
        .route("/api/v1/streams/results", get(get_stream_results))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            max_concurrent_requests(),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(access_log_middleware))
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(create_cors_layer())
        .with_state(state)
}

/// Serve the API until shutdown is requested.
pub async fn run_server(state: AppState, addr: std::net::SocketAddr) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
        .await?;
    Ok(())
}

// ============================================================================
// Health + metrics
// ============================================================================

async fn health_check(State(state): State<AppState>) -> Response {
    match state.storage.check_health().await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => {
            error!("Health check failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error"})),
            )
                .into_response()
        }
    }
}

async fn prometheus_metrics() -> Response {
    use axum::http::header::CONTENT_TYPE;
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        crate::metrics::render_metrics(),
    )
        .into_response()
}

// ============================================================================
// Workflow CRUD
// ============================================================================

fn can_access_workflow(user: &User, workflow: &Workflow) -> bool {
    user.id == workflow.owner || user.is_admin()
}

async fn list_workflows(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let result = if user.is_admin() {
        state.storage.get_workflows_for_org(&user.active_org.id).await
    } else {
        state.storage.get_workflows_for_owner(&user.id).await
    };

    match result {
        Ok(workflows) => Json(workflows).into_response(),
        Err(e) => error_response(e),
    }
}

async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let mut workflow: Workflow = match parse_body(&body) {
        Ok(workflow) => workflow,
        Err(e) => return error_response(e),
    };

    workflow.id = uuid::Uuid::new_v4().to_string();
    workflow.owner = user.id.clone();
    workflow.org_id = user.active_org.id.clone();
    workflow.executing_org = user.active_org.clone();
    workflow.is_valid = true;
    workflow.configuration.exit_on_error = false;

    for trigger in &mut workflow.triggers {
        trigger.id = uuid::Uuid::new_v4().to_string();
        trigger.status = "uninitialized".to_string();
    }

    // A brand-new workflow gets a hello-world start node bound to the
    // org's default environment.
    if workflow.actions.is_empty() {
        let env_name = state
            .storage
            .get_environments(&user.active_org.id)
            .await
            .ok()
            .and_then(|envs| {
                envs.iter()
                    .find(|e| e.default)
                    .or_else(|| envs.first())
                    .map(|e| e.name.clone())
            })
            .unwrap_or_else(|| "default".to_string());

        let testing_app = state
            .storage
            .get_all_apps()
            .await
            .ok()
            .and_then(|apps| apps.into_iter().find(|a| a.name == "Testing"));

        let node_id = uuid::Uuid::new_v4().to_string();
        workflow.start = node_id.clone();
        workflow.actions.push(Action {
            id: node_id,
            label: "Start node".to_string(),
            name: "hello_world".to_string(),
            environment: env_name,
            app_name: testing_app
                .as_ref()
                .map(|a| a.name.clone())
                .unwrap_or_else(|| "Testing".to_string()),
            app_version: testing_app
                .as_ref()
                .map(|a| a.app_version.clone())
                .unwrap_or_else(|| "1.0.0".to_string()),
            app_id: testing_app.map(|a| a.id).unwrap_or_default(),
            is_valid: true,
            is_start_node: true,
            ..Action::default()
        });
    }

    if let Err(e) = state.storage.set_workflow(&workflow).await {
        return error_response(e);
    }
    stats::increment_quietly(&state.storage, "total_workflows", &workflow.id, 1).await;

    info!("Saved new workflow {} with name {}", workflow.id, workflow.name);
    Json(workflow).into_response()
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let workflow = match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return error_response(Error::NotFound(format!("Workflow {} doesn't exist", id)))
        }
        Err(e) => return error_response(e),
    };

    if !can_access_workflow(&user, &workflow) {
        warn!("Wrong user ({}) for workflow {}", user.username, workflow.id);
        return error_response(Error::Unauthorized("No access to workflow".to_string()));
    }

    Json(workflow).into_response()
}

async fn save_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let previous = match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return error_response(Error::NotFound(format!("Workflow {} doesn't exist", id)))
        }
        Err(e) => return error_response(e),
    };
    if !can_access_workflow(&user, &previous) {
        warn!(
            "Wrong user ({}) for workflow {} (save)",
            user.username, previous.id
        );
        return error_response(Error::Unauthorized("No access to workflow".to_string()));
    }

    let mut workflow: Workflow = match parse_body(&body) {
        Ok(workflow) => workflow,
        Err(e) => return error_response(e),
    };
    if workflow.id != id {
        return error_response(Error::Workflow(
            "Path and request workflow ids don't match".to_string(),
        ));
    }

    // Imported definitions may miss ownership fields.
    if workflow.owner.is_empty() {
        workflow.owner = user.id.clone();
    }
    if workflow.executing_org.id.is_empty() {
        workflow.executing_org = user.active_org.clone();
    }
    if workflow.org_id.is_empty() {
        workflow.org_id = user.active_org.id.clone();
    }

    refresh_trigger_status(&state, &mut workflow.triggers).await;

    let environments = match state.storage.get_environments(&workflow.executing_org.id).await {
        Ok(environments) => environments,
        Err(e) => return error_response(e),
    };
    let apps = match state.storage.get_all_apps().await {
        Ok(apps) => apps,
        Err(e) => return error_response(e),
    };
    let auths = match state.storage.get_all_app_auth(&user.active_org.id).await {
        Ok(auths) => auths,
        Err(e) => return error_response(e),
    };

    let ctx = ValidationContext {
        environments: &environments,
        apps: &apps,
        auths: &auths,
    };
    if let Err(e) = crate::workflow::validate_workflow(&mut workflow, &ctx) {
        return error_response(e);
    }

    // Credential usage tracking is best-effort and off the request path.
    for action in &workflow.actions {
        if action.authentication_id.is_empty() {
            continue;
        }
        if let Some(auth) = auths.iter().find(|a| a.id == action.authentication_id) {
            let storage = state.storage.clone();
            let auth = auth.clone();
            let workflow_id = workflow.id.clone();
            let node_id = action.id.clone();
            tokio::spawn(async move {
                let _ =
                    crate::credentials::update_app_auth(&storage, auth, &workflow_id, &node_id)
                        .await;
            });
        }
    }

    if let Err(e) = state.storage.set_workflow(&workflow).await {
        return error_response(e);
    }

    let delta = workflow.actions.len() as i64 - previous.actions.len() as i64;
    if delta != 0 {
        stats::increment_quietly(&state.storage, "total_workflow_actions", &workflow.id, delta)
            .await;
    }

    info!("Saved new version of workflow {} ({})", workflow.name, id);
    Json(json!({"success": true, "errors": workflow.errors})).into_response()
}

/// Mark SCHEDULE triggers whose backing record is gone as stopped.
async fn refresh_trigger_status(state: &AppState, triggers: &mut [Trigger]) {
    for trigger in triggers {
        if trigger.trigger_type == TRIGGER_SCHEDULE && trigger.status != "uninitialized" {
            match state.storage.get_schedule(&trigger.id).await {
                Ok(Some(_)) => {}
                _ => trigger.status = "stopped".to_string(),
            }
        }
    }
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let workflow = match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return error_response(Error::NotFound(format!("Workflow {} doesn't exist", id)))
        }
        Err(e) => return error_response(e),
    };
    if !can_access_workflow(&user, &workflow) {
        warn!(
            "Wrong user ({}) for workflow {} (delete)",
            user.username, workflow.id
        );
        return error_response(Error::Unauthorized("No access to workflow".to_string()));
    }

    // Stop anything the workflow left running.
    for trigger in &workflow.triggers {
        if trigger.trigger_type == TRIGGER_SCHEDULE && trigger.status != "uninitialized" {
            if let Err(e) = state.scheduler.delete(&trigger.id).await {
                warn!("Failed to delete schedule {}: {}", trigger.id, e);
            }
        }
    }

    if let Err(e) = state.storage.delete_workflow(&id).await {
        return error_response(e);
    }
    stats::increment_quietly(&state.storage, "total_workflows", &id, -1).await;

    success_response()
}

// ============================================================================
// Execution
// ============================================================================

fn can_execute_workflow(user: &User, workflow: &Workflow) -> bool {
    user.id == workflow.owner || user.is_admin() || user.role == "scheduler"
}

async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    if let Err(e) = check_execute_access(&state, &user, &id).await {
        return error_response(e);
    }

    info!("Starting execution of {}", id);
    let request = StartRequest {
        body: Some(body.to_vec()),
        ..StartRequest::default()
    };
    match state.engine.start(&id, request).await {
        Ok(Some(execution)) => Json(json!({
            "success": true,
            "execution_id": execution.execution_id,
            "authorization": execution.authorization,
        }))
        .into_response(),
        Ok(None) => success_response(),
        Err(e) => error_response(e),
    }
}

#[derive(serde::Deserialize)]
struct ExecuteQuery {
    start: Option<String>,
    reference_execution: Option<String>,
    answer: Option<String>,
    note: Option<String>,
}

async fn execute_workflow_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExecuteQuery>,
    headers: HeaderMap,
) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };
    if let Err(e) = check_execute_access(&state, &user, &id).await {
        return error_response(e);
    }

    let request = StartRequest {
        body: None,
        start: query.start,
        reference_execution: query.reference_execution,
        answer: query.answer,
        note: query.note,
    };
    match state.engine.start(&id, request).await {
        Ok(Some(execution)) => Json(json!({
            "success": true,
            "execution_id": execution.execution_id,
            "authorization": execution.authorization,
        }))
        .into_response(),
        Ok(None) => success_response(),
        Err(e) => error_response(e),
    }
}

async fn check_execute_access(state: &AppState, user: &User, workflow_id: &str) -> Result<()> {
    let workflow = state
        .storage
        .get_workflow(workflow_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Workflow {} doesn't exist", workflow_id)))?;
    if !can_execute_workflow(user, &workflow) {
        warn!(
            "Wrong user ({}) for workflow {} (execute)",
            user.username, workflow.id
        );
        return Err(Error::Unauthorized("No access to workflow".to_string()));
    }
    Ok(())
}

async fn abort_execution(
    State(state): State<AppState>,
    Path((id, execution_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let execution = match state.storage.get_execution(&execution_id).await {
        Ok(Some(execution)) => execution,
        Ok(None) => {
            return error_response(Error::NotFound(format!(
                "Failed getting execution ID {} because it doesn't exist (abort)",
                execution_id
            )))
        }
        Err(e) => return error_response(e),
    };

    // The execution's own capability is enough; otherwise fall back to an
    // owner/admin session.
    let token_ok = bearer_token(&headers)
        .map(|token| tokens_match(&execution.authorization, token))
        .unwrap_or(false);
    if !token_ok {
        let user = match authenticate_user(&state.storage, &headers).await {
            Ok(user) => user,
            Err(e) => return error_response(e),
        };
        if user.id != execution.workflow.owner && !user.is_admin() {
            warn!(
                "Wrong user ({}) for workflow {} (abort)",
                user.username, id
            );
            return error_response(Error::Unauthorized("No access to execution".to_string()));
        }
    }

    match state.engine.abort(&execution_id).await {
        Ok(()) => success_response(),
        Err(e) => error_response(e),
    }
}

async fn list_workflow_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let workflow = match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return error_response(Error::NotFound(format!("Workflow {} doesn't exist", id)))
        }
        Err(e) => return error_response(e),
    };
    if !can_access_workflow(&user, &workflow) {
        return error_response(Error::Unauthorized("No access to workflow".to_string()));
    }

    match state.storage.list_executions(&id, 20).await {
        Ok(executions) => Json(executions).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Schedules
// ============================================================================

async fn schedule_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let mut workflow = match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return error_response(Error::NotFound(format!("Workflow {} doesn't exist", id)))
        }
        Err(e) => return error_response(e),
    };
    if !can_execute_workflow(&user, &workflow) {
        return error_response(Error::Unauthorized("No access to workflow".to_string()));
    }

    let schedule: ScheduleSpec = match parse_body(&body) {
        Ok(schedule) => schedule,
        Err(e) => return error_response(e),
    };

    if schedule.id.len() != 36 {
        return error_response(Error::Schedule("Invalid schedule id".to_string()));
    }
    if schedule.name.is_empty() {
        return error_response(Error::Schedule(
            "Schedule name can't be empty".to_string(),
        ));
    }
    if schedule.frequency.is_empty() {
        return error_response(Error::Schedule("Frequency can't be empty".to_string()));
    }

    // A schedule trigger node may point at its own start node.
    let start_node = workflow
        .branches
        .iter()
        .find(|b| b.source_id == schedule.id)
        .map(|b| b.destination_id.clone())
        .unwrap_or_else(|| workflow.start.clone());

    let created = if schedule.environment == "cloud" {
        state
            .scheduler
            .create_cloud(
                &schedule.id,
                &workflow.id,
                &start_node,
                &schedule.frequency,
                &user.active_org.id,
                &schedule.execution_argument,
            )
            .await
    } else {
        state
            .scheduler
            .create(
                &schedule.id,
                &workflow.id,
                &start_node,
                &schedule.frequency,
                &user.active_org.id,
                &schedule.execution_argument,
            )
            .await
    };
    if let Err(e) = created {
        return error_response(e);
    }

    workflow.schedules.push(schedule);
    if let Err(e) = state.storage.set_workflow(&workflow).await {
        return error_response(e);
    }

    success_response()
}

async fn stop_schedule(
    State(state): State<AppState>,
    Path((id, schedule_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let user = match authenticate_user(&state.storage, &headers).await {
        Ok(user) => user,
        Err(e) => return error_response(e),
    };

    let workflow = match state.storage.get_workflow(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return error_response(Error::NotFound(format!("Workflow {} doesn't exist", id)))
        }
        Err(e) => return error_response(e),
    };
    if !can_execute_workflow(&user, &workflow) {
        return error_response(Error::Unauthorized("No access to workflow".to_string()));
    }

    let record = match state.storage.get_schedule(&schedule_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return error_response(Error::NotFound(format!(
                "Can't find schedule {}",
                schedule_id
            )))
        }
        Err(e) => return error_response(e),
    };

    let deleted = if record.environment == "cloud" {
        state
            .scheduler
            .delete_cloud(&record, &user.active_org.id)
            .await
    } else {
        state.scheduler.delete(&schedule_id).await
    };

    match deleted {
        Ok(()) => success_response(),
        // A timer that is already gone counts as stopped.
        Err(Error::NotFound(_)) => success_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Worker queue
// ============================================================================

fn org_id_header(headers: &HeaderMap) -> Result<String> {
    headers
        .get("Org-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or_else(|| Error::Unauthorized("Specify the org-id header.".to_string()))
}

async fn get_workflow_queue(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let queue_id = match org_id_header(&headers) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match crate::queue::peek(&state.storage, &queue_id).await {
        Ok(data) => Json(ExecutionRequestWrapper { data }).into_response(),
        Err(e) => error_response(e),
    }
}

async fn confirm_workflow_queue(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let queue_id = match org_id_header(&headers) {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let wrapper: ExecutionRequestWrapper = match parse_body(&body) {
        Ok(wrapper) => wrapper,
        Err(e) => return error_response(e),
    };
    if wrapper.data.is_empty() {
        return error_response(Error::Queue("No requests to confirm".to_string()));
    }

    match crate::queue::ack(&state.storage, &queue_id, &wrapper.data).await {
        Ok(()) => success_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// Worker result streams
// ============================================================================

async fn handle_stream_result(State(state): State<AppState>, body: Bytes) -> Response {
    let action_result: ActionResult = match parse_body(&body) {
        Ok(result) => result,
        Err(e) => return error_response(e),
    };

    match state.engine.submit_result(action_result).await {
        Ok(()) => success_response(),
        Err(e) => error_response(e),
    }
}

#[derive(serde::Deserialize)]
struct StreamResultsRequest {
    execution_id: String,
    #[serde(default)]
    authorization: String,
}

async fn get_stream_results(State(state): State<AppState>, body: Bytes) -> Response {
    let request: StreamResultsRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(e) => return error_response(e),
    };

    match state
        .engine
        .read_live(&request.execution_id, &request.authorization)
        .await
    {
        Ok(execution) => Json(execution).into_response(),
        Err(e) => error_response(e),
    }
}
