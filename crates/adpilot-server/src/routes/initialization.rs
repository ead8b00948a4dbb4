use adpilot_core::initialization::{InitTask, InitializationProgress};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use super::blocking;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct StartQuery {
    #[serde(default)]
    pub force: bool,
}

/// Run the account's backfill in the background, tracked in `app.backfills`.
fn spawn_backfill(app: &AppState, account_id: String) {
    let engine = app.engine.clone();
    let backfills = app.backfills.clone();
    tokio::spawn(async move {
        match engine.run_initialization(&account_id).await {
            Ok(p) => tracing::info!(
                account_id = %account_id,
                status = %p.status,
                progress = p.overall_progress,
                "backfill finished"
            ),
            Err(e) => tracing::warn!(account_id = %account_id, error = %e, "backfill failed"),
        }
        backfills.lock().await.remove(&account_id);
    });
}

/// POST /api/initialization/{account_id}/start: plan and start the backfill.
///
/// Returns the planned progress immediately; follow it via the progress
/// endpoint or `initialization_progress` events.
pub async fn start(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
    Query(q): Query<StartQuery>,
) -> Result<(StatusCode, Json<InitializationProgress>), AppError> {
    let mut running = app.backfills.lock().await;
    if running.contains(&account_id) {
        return Err(AppError::conflict(format!(
            "backfill already running for '{account_id}'"
        )));
    }
    let id = account_id.clone();
    let progress = blocking(&app, move |e| e.plan_initialization(&id, q.force)).await?;
    running.insert(account_id.clone());
    drop(running);

    spawn_backfill(&app, account_id);
    Ok((StatusCode::ACCEPTED, Json(progress)))
}

/// POST /api/initialization/{account_id}/retry: requeue failed tasks and run them.
pub async fn retry(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    let mut running = app.backfills.lock().await;
    if running.contains(&account_id) {
        return Err(AppError::conflict(format!(
            "backfill already running for '{account_id}'"
        )));
    }
    let id = account_id.clone();
    let requeued = blocking(&app, move |e| e.requeue_failed_initialization(&id)).await?;
    if requeued > 0 {
        running.insert(account_id.clone());
        drop(running);
        spawn_backfill(&app, account_id.clone());
    }
    let id = account_id.clone();
    let progress = blocking(&app, move |e| e.initialization_progress(&id)).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "requeued": requeued, "progress": progress })),
    ))
}

/// GET /api/initialization/{account_id}/progress
pub async fn progress(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<InitializationProgress>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.initialization_progress(&account_id)).await?,
    ))
}

/// GET /api/initialization/{account_id}/tasks
pub async fn tasks(
    State(app): State<AppState>,
    Path(account_id): Path<String>,
) -> Result<Json<Vec<InitTask>>, AppError> {
    Ok(Json(
        blocking(&app, move |e| e.initialization_tasks(&account_id)).await?,
    ))
}
