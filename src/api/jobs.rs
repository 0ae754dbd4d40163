//! Job scheduler admin endpoints (§6 `trigger-job`, job history).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::auth_user::AuthUser;
use crate::core::permissions::ADMIN_TRIGGER_JOBS;
use crate::db::job_executions::JobExecutionRecord;
use crate::errors::{AppError, AppResult};
use crate::AppState;

async fn require_trigger_permission(state: &AppState, user: &AuthUser) -> AppResult<()> {
    if user.is_admin {
        return Ok(());
    }
    if state.permissions.has_permission(&user.user_id, ADMIN_TRIGGER_JOBS).await? {
        return Ok(());
    }
    Err(AppError::Forbidden("admin.trigger_jobs required".into()))
}

#[derive(Serialize)]
struct TriggerResponse {
    execution_id: String,
    status: String,
}

async fn trigger_job(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_name): Path<String>,
) -> AppResult<(StatusCode, Json<TriggerResponse>)> {
    require_trigger_permission(&state, &user).await?;
    let outcome = state.scheduler.trigger(&job_name).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            execution_id: outcome.execution.id,
            status: outcome.execution.status,
        }),
    ))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    25
}

async fn job_history(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<JobExecutionRecord>>> {
    require_trigger_permission(&state, &user).await?;
    let history = state.scheduler.history(query.limit.clamp(1, 200), query.offset.max(0)).await?;
    Ok(Json(history))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{name}/trigger", post(trigger_job))
        .route("/history", get(job_history))
}
