use adpilot_core::schedule::{
    NewSchedule, ScheduleExecution, SchedulePatch, ScheduleStats, SyncSchedule,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct AccountQuery {
    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /api/schedules
pub async fn list_schedules(
    State(app): State<AppState>,
    Query(q): Query<AccountQuery>,
) -> Result<Json<Vec<SyncSchedule>>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.schedules(q.account_id.as_deref())).await?,
    ))
}

/// POST /api/schedules
pub async fn create_schedule(
    State(app): State<AppState>,
    Json(body): Json<NewSchedule>,
) -> Result<(StatusCode, Json<SyncSchedule>), AppError> {
    let s = blocking(&app, move |e| e.create_schedule(body)).await?;
    Ok((StatusCode::CREATED, Json(s)))
}

/// GET /api/schedules/{id}
pub async fn get_schedule(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncSchedule>, AppError> {
    Ok(Json(blocking(&app, move |e| e.schedule(&id)).await?))
}

/// PATCH /api/schedules/{id}: change fields; next run is recomputed.
pub async fn update_schedule(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SchedulePatch>,
) -> Result<Json<SyncSchedule>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.update_schedule(&id, patch)).await?,
    ))
}

/// DELETE /api/schedules/{id}
pub async fn delete_schedule(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    blocking(&app, move |e| e.delete_schedule(&id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct TriggerQuery {
    /// Retry transient failures with the configured policy.
    #[serde(default)]
    pub retry: bool,
}

/// POST /api/schedules/{id}/trigger?retry=true: run now and wait for the outcome.
pub async fn trigger_schedule(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<TriggerQuery>,
) -> Result<Json<ScheduleExecution>, AppError> {
    let exec = if q.retry {
        app.engine.trigger_schedule_with_retry(&id, None).await?
    } else {
        app.engine.trigger_schedule(&id).await?
    };
    Ok(Json(exec))
}

/// GET /api/schedules/{id}/history
pub async fn schedule_history(
    State(app): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<ScheduleExecution>>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.schedule_history(&id, q.limit)).await?,
    ))
}

/// GET /api/schedules/{id}/stats
pub async fn schedule_stats(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleStats>, AppError> {
    Ok(Json(blocking(&app, move |e| e.schedule_stats(&id)).await?))
}
