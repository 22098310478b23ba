//! Admin surface (§6): the HTTP entry points the host application offers
//! over the core's consumed contract — `register`, `send_to_module`,
//! `close_module`, `workflow_execute(id)`, `reload_all`, `list_jobs`.
//!
//! Gated behind `ORC_ADMIN_TOKEN` when set, same dev-mode-if-unset pattern
//! as the teacher's admin guard.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use orc_core::TimeUnit;
use orc_registry::DataRequirement;
use orc_scheduler::Workflow;

use crate::state::AppState;

fn check_admin_token(headers: &HeaderMap) -> Result<(), (StatusCode, Json<serde_json::Value>)> {
    let expected = match std::env::var("ORC_ADMIN_TOKEN") {
        Ok(t) if !t.is_empty() => t,
        _ => return Ok(()),
    };

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash both sides to a fixed-length digest before comparing, so a
    // mismatched length never shows up as an early-exit timing difference,
    // then compare in constant time.
    let provided_hash = Sha256::digest(provided.as_bytes());
    let expected_hash = Sha256::digest(expected.as_bytes());

    if !bool::from(provided_hash.ct_eq(&expected_hash)) {
        return Err(unauthorized());
    }
    Ok(())
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": "invalid admin token" })),
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/modules/register
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RegisterModuleRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub model_hash: String,
    #[serde(default)]
    pub input_data: Vec<DataRequirement>,
    #[serde(default)]
    pub output_data: Vec<DataRequirement>,
}

pub async fn register_module(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterModuleRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_admin_token(&headers) {
        return e.into_response();
    }

    match state.registry.register(
        &req.name,
        req.description.as_deref(),
        req.input_data,
        req.output_data,
        &req.model_hash,
    ) {
        Ok((module_id, module_hash)) => {
            Json(serde_json::json!({ "module_id": module_id, "module_hash": module_hash }))
                .into_response()
        }
        Err(e) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/modules/:module_id/send
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn send_to_module(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<u64>,
    Json(message): Json<serde_json::Value>,
) -> impl IntoResponse {
    if let Err(e) = check_admin_token(&headers) {
        return e.into_response();
    }
    state.hub.send_to_module(module_id, &message);
    StatusCode::ACCEPTED.into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/modules/:module_id/close
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn close_module(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(module_id): Path<u64>,
) -> impl IntoResponse {
    if let Err(e) = check_admin_token(&headers) {
        return e.into_response();
    }
    state.hub.close_module(module_id);
    StatusCode::ACCEPTED.into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/workflows/:workflow_id/execute
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn workflow_execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(workflow_id): Path<u64>,
) -> impl IntoResponse {
    if let Err(e) = check_admin_token(&headers) {
        return e.into_response();
    }

    if !state.scheduler.try_acquire(workflow_id) {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "execution already in progress" })),
        )
            .into_response();
    }
    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        scheduler.execute_workflow(workflow_id).await;
        scheduler.release(workflow_id);
    });
    StatusCode::ACCEPTED.into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/workflows/reload
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn reload_all(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = check_admin_token(&headers) {
        return e.into_response();
    }
    state.scheduler.reload_all();
    StatusCode::NO_CONTENT.into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/workflows/jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: String,
    pub workflow_id: u64,
    pub next_run_time: Option<String>,
    pub trigger_description: String,
    pub workflow_not_found: bool,
}

pub async fn list_jobs(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = check_admin_token(&headers) {
        return e.into_response();
    }

    let now_local = state.clock.now_local();
    let jobs: Vec<JobView> = state
        .scheduler
        .list_jobs(now_local)
        .into_iter()
        .map(|j| JobView {
            job_id: j.job_id,
            workflow_id: j.workflow_id,
            next_run_time: j.next_run_time.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            trigger_description: j.trigger_description,
            workflow_not_found: j.workflow_not_found,
        })
        .collect();

    Json(serde_json::json!({ "jobs": jobs })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/modules — online modules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_online_modules(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = check_admin_token(&headers) {
        return e.into_response();
    }
    Json(serde_json::json!({ "modules": state.registry.alive_modules() })).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/workflows — create, then immediately reload the job table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow_id: u64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "d_enable")]
    pub enable: bool,
    pub execute_cron_list: Vec<String>,
    #[serde(default)]
    pub execute_shift_time: i64,
    #[serde(default = "d_shift_unit")]
    pub execute_shift_unit: String,
    pub execute_modules: Vec<serde_json::Value>,
}

fn d_enable() -> bool {
    true
}

fn d_shift_unit() -> String {
    "s".into()
}

pub async fn create_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateWorkflowRequest>,
) -> impl IntoResponse {
    if let Err(e) = check_admin_token(&headers) {
        return e.into_response();
    }

    for cron in &req.execute_cron_list {
        if let Err(reason) = orc_scheduler::cron::validate_cron(cron) {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("invalid cron '{cron}': {reason}") })),
            )
                .into_response();
        }
    }
    let execute_shift_unit = match TimeUnit::parse(&req.execute_shift_unit) {
        Ok(u) => u,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    };

    state.workflows.put(Workflow {
        workflow_id: req.workflow_id,
        name: req.name,
        description: req.description,
        enable: req.enable,
        execute_cron_list: req.execute_cron_list,
        execute_shift_time: req.execute_shift_time,
        execute_shift_unit,
        execute_modules: req.execute_modules,
    });
    state.scheduler.reload_all();

    StatusCode::CREATED.into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/workflows — list all persisted workflows
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_workflows(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Err(e) = check_admin_token(&headers) {
        return e.into_response();
    }
    Json(serde_json::json!({ "workflows": state.workflows.all() })).into_response()
}
