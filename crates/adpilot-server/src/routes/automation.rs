use adpilot_core::automation::{
    AutomationConfig, AutomationPatch, DailyExecutionStats, PendingApproval, ProposedAction,
};
use adpilot_core::ledger::{BatchRecord, ExecutionDetail};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Config / stop / resume
// ---------------------------------------------------------------------------

/// GET /api/automation/{account_id}/config
pub async fn get_config(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<AutomationConfig>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.automation_config(&account_id)).await?,
    ))
}

/// PATCH /api/automation/{account_id}/config
pub async fn update_config(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
    Json(patch): Json<AutomationPatch>,
) -> Result<Json<AutomationConfig>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.update_automation_config(&account_id, patch)).await?,
    ))
}

#[derive(Deserialize)]
pub struct StopBody {
    pub reason: String,
}

/// POST /api/automation/{account_id}/stop
pub async fn emergency_stop(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<StopBody>,
) -> Result<Json<AutomationConfig>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.emergency_stop(&account_id, &body.reason)).await?,
    ))
}

/// POST /api/automation/{account_id}/resume
pub async fn resume(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<AutomationConfig>, AppError> {
    Ok(Json(blocking(&app, move |e| e.resume(&account_id)).await?))
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct CycleBody {
    pub actions: Vec<ProposedAction>,
}

/// POST /api/automation/{account_id}/cycle: evaluate and execute proposals.
pub async fn run_cycle(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
    Json(body): Json<CycleBody>,
) -> Result<Json<BatchRecord>, AppError> {
    Ok(Json(
        app.engine.run_full_cycle(&account_id, body.actions).await?,
    ))
}

// ---------------------------------------------------------------------------
// Stats / ledger
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct StatsQuery {
    /// Local date; defaults to today in the account's time zone.
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

/// GET /api/automation/{account_id}/stats
pub async fn daily_stats(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
    Query(q): Query<StatsQuery>,
) -> Result<Json<DailyExecutionStats>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.daily_stats(&account_id, q.date)).await?,
    ))
}

#[derive(Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// GET /api/automation/{account_id}/stats/recent
pub async fn recent_stats(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<DailyExecutionStats>>, AppError> {
    let limit = q.limit.unwrap_or(30);
    Ok(Json(
        blocking(&app, move |e| e.recent_daily_stats(&account_id, limit)).await?,
    ))
}

/// GET /api/automation/{account_id}/history: batches newest first.
pub async fn history(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
    Query(q): Query<LimitQuery>,
) -> Result<Json<Vec<BatchRecord>>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.execution_history(&account_id, q.limit)).await?,
    ))
}

/// GET /api/details/{id}
pub async fn get_detail(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionDetail>, AppError> {
    Ok(Json(blocking(&app, move |e| e.execution_detail(&id)).await?))
}

/// POST /api/details/{id}/rollback
pub async fn rollback(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BatchRecord>, AppError> {
    Ok(Json(app.engine.rollback(&id).await?))
}

// ---------------------------------------------------------------------------
// Approvals
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ApprovalQuery {
    #[serde(default)]
    pub account_id: Option<String>,
}

/// GET /api/approvals: pending approvals, optionally for one account.
pub async fn list_approvals(
    State(app): State<AppState>,
    Query(q): Query<ApprovalQuery>,
) -> Result<Json<Vec<PendingApproval>>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.pending_approvals(q.account_id.as_deref())).await?,
    ))
}

/// POST /api/approvals/{id}/approve
pub async fn approve(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BatchRecord>, AppError> {
    Ok(Json(app.engine.approve(&id).await?))
}

/// POST /api/approvals/{id}/reject
pub async fn reject(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PendingApproval>, AppError> {
    Ok(Json(blocking(&app, move |e| e.reject(&id)).await?))
}
