use axum::{extract::{Request, State}, http::StatusCode, Json};
use axum::middleware::Next;
use axum::response::Response;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use service::giveaway::domain::{CompletedTask, Task};

use crate::errors::JsonApiError;
use crate::routes::{giveaway::parse_address, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    pub address: String,
    pub task_index: usize,
}

/// Award a task's points to an address.
pub async fn complete_task(
    State(state): State<AppState>,
    Json(payload): Json<CompleteTaskRequest>,
) -> Result<Json<CompletedTask>, JsonApiError> {
    let address = parse_address(&payload.address)?;
    Ok(Json(state.service.complete_task(address, payload.task_index).await?))
}

/// Replace the task list.
pub async fn set_tasks(
    State(state): State<AppState>,
    Json(tasks): Json<Vec<Task>>,
) -> Result<Json<Value>, JsonApiError> {
    state.service.set_tasks(tasks).await?;
    Ok(Json(json!({"success": true})))
}

/// Middleware: require the configured `X-API-Key` on admin routes
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.admin_api_key.as_deref() else {
        warn!(path = %req.uri().path(), "admin route called but no admin key is configured");
        return Err(StatusCode::FORBIDDEN);
    };

    let key = req
        .headers()
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    match key {
        Some(k) if !k.is_empty() && k == expected => Ok(next.run(req).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
