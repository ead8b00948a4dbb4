pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use adpilot_core::Engine;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router over a shared engine.
pub fn build_router(engine: Arc<Engine>) -> Router {
    let app_state = state::AppState::new(engine);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Jobs
        .route(
            "/api/jobs",
            get(routes::jobs::list_jobs).post(routes::jobs::create_job),
        )
        .route("/api/jobs/{id}", get(routes::jobs::get_job))
        .route("/api/jobs/{id}/run", post(routes::jobs::run_job))
        .route("/api/jobs/{id}/cancel", post(routes::jobs::cancel_job))
        .route("/api/rate-limit", get(routes::jobs::rate_limit))
        .route("/api/tick", post(routes::jobs::tick))
        // Schedules
        .route(
            "/api/schedules",
            get(routes::schedules::list_schedules).post(routes::schedules::create_schedule),
        )
        .route(
            "/api/schedules/{id}",
            get(routes::schedules::get_schedule)
                .patch(routes::schedules::update_schedule)
                .delete(routes::schedules::delete_schedule),
        )
        .route(
            "/api/schedules/{id}/trigger",
            post(routes::schedules::trigger_schedule),
        )
        .route(
            "/api/schedules/{id}/history",
            get(routes::schedules::schedule_history),
        )
        .route(
            "/api/schedules/{id}/stats",
            get(routes::schedules::schedule_stats),
        )
        // Initialization
        .route(
            "/api/initialization/{account_id}/start",
            post(routes::initialization::start),
        )
        .route(
            "/api/initialization/{account_id}/retry",
            post(routes::initialization::retry),
        )
        .route(
            "/api/initialization/{account_id}/progress",
            get(routes::initialization::progress),
        )
        .route(
            "/api/initialization/{account_id}/tasks",
            get(routes::initialization::tasks),
        )
        // Automation
        .route(
            "/api/automation/{account_id}/config",
            get(routes::automation::get_config).patch(routes::automation::update_config),
        )
        .route(
            "/api/automation/{account_id}/stop",
            post(routes::automation::emergency_stop),
        )
        .route(
            "/api/automation/{account_id}/resume",
            post(routes::automation::resume),
        )
        .route(
            "/api/automation/{account_id}/cycle",
            post(routes::automation::run_cycle),
        )
        .route(
            "/api/automation/{account_id}/stats",
            get(routes::automation::daily_stats),
        )
        .route(
            "/api/automation/{account_id}/stats/recent",
            get(routes::automation::recent_stats),
        )
        .route(
            "/api/automation/{account_id}/history",
            get(routes::automation::history),
        )
        .route("/api/details/{id}", get(routes::automation::get_detail))
        .route(
            "/api/details/{id}/rollback",
            post(routes::automation::rollback),
        )
        // Approvals
        .route("/api/approvals", get(routes::automation::list_approvals))
        .route(
            "/api/approvals/{id}/approve",
            post(routes::automation::approve),
        )
        .route(
            "/api/approvals/{id}/reject",
            post(routes::automation::reject),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve the API on a pre-bound listener so the caller can read the actual
/// port first (`port = 0` lets the OS pick).
pub async fn serve_on(
    engine: Arc<Engine>,
    listener: tokio::net::TcpListener,
) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app = build_router(engine);

    tracing::info!("adpilot API listening on http://localhost:{actual_port}");

    axum::serve(listener, app).await?;
    Ok(())
}
