use adpilot_core::engine::TickReport;
use adpilot_core::rate_limiter::RateLimitStatus;
use adpilot_core::sync_job::{JobFilter, SyncJob};
use adpilot_core::types::SyncType;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

/// GET /api/jobs: jobs filtered by account, status and type, newest first.
pub async fn list_jobs(
    State(app): State<AppState>,
    Query(filter): Query<JobFilter>,
) -> Result<Json<Vec<SyncJob>>, AppError> {
    Ok(Json(blocking(&app, move |e| e.jobs(&filter)).await?))
}

#[derive(Deserialize)]
pub struct CreateJobBody {
    pub account_id: String,
    #[serde(default = "default_sync_type")]
    pub sync_type: SyncType,
    /// Start it in the background instead of waiting for the next tick.
    #[serde(default)]
    pub run: bool,
}

fn default_sync_type() -> SyncType {
    SyncType::All
}

/// POST /api/jobs: create a pending manual job.
pub async fn create_job(
    State(app): State<AppState>,
    Json(body): Json<CreateJobBody>,
) -> Result<Json<SyncJob>, AppError> {
    let account_id = body.account_id;
    let sync_type = body.sync_type;
    let job = blocking(&app, move |e| e.create_job(&account_id, sync_type)).await?;

    if body.run {
        let engine = app.engine.clone();
        let job_id = job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_job(&job_id).await {
                tracing::warn!(job_id = %job_id, error = %e, "background job failed");
            }
        });
    }
    Ok(Json(job))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncJob>, AppError> {
    Ok(Json(blocking(&app, move |e| e.job(&id)).await?))
}

/// POST /api/jobs/{id}/run: run a pending job to completion.
pub async fn run_job(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncJob>, AppError> {
    Ok(Json(app.engine.run_job(&id).await?))
}

/// POST /api/jobs/{id}/cancel
pub async fn cancel_job(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncJob>, AppError> {
    Ok(Json(blocking(&app, move |e| e.cancel_job(&id)).await?))
}

/// GET /api/rate-limit: per-window usage and queue depth.
pub async fn rate_limit(State(app): State<AppState>) -> Json<RateLimitStatus> {
    Json(app.engine.rate_limit_status())
}

/// POST /api/tick: run one scheduler tick now.
pub async fn tick(State(app): State<AppState>) -> Result<Json<TickReport>, AppError> {
    Ok(Json(app.engine.tick(Utc::now()).await?))
}
