use std::sync::Arc;
use std::time::Duration;

use adpilot_core::api::{AdsApi, Page, PageRequest};
use adpilot_core::automation::ProposedAction;
use adpilot_core::config::Config;
use adpilot_core::Engine;
use async_trait::async_trait;
use axum::http::StatusCode;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// One page of 10 records per entity; every change succeeds.
struct StubApi;

#[async_trait]
impl AdsApi for StubApi {
    async fn fetch_page(&self, _account_id: &str, _req: &PageRequest) -> adpilot_core::Result<Page> {
        Ok(Page {
            records: 10,
            next_token: None,
        })
    }

    async fn apply_change(&self, _account_id: &str, _action: &ProposedAction) -> adpilot_core::Result<()> {
        Ok(())
    }
}

fn app() -> (TempDir, axum::Router) {
    let dir = TempDir::new().unwrap();
    let mut cfg = Config::default();
    cfg.rate_limits.per_second = 1000;
    cfg.rate_limits.per_minute = 10_000;
    cfg.rate_limits.per_hour = 100_000;
    let engine = Engine::with_api(dir.path(), cfg, Arc::new(StubApi)).unwrap();
    (dir, adpilot_server::build_router(Arc::new(engine)))
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = axum::http::Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            axum::body::Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => axum::body::Body::empty(),
    };
    let response = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    send(app, "GET", uri, None).await
}

async fn post(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    send(app, "POST", uri, None).await
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Some(body)).await
}

async fn patch_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, "PATCH", uri, Some(body)).await
}

fn bid(target: &str, from: f64, to: f64, confidence: f64) -> Value {
    json!({
        "target_id": target,
        "confidence": confidence,
        "type": "bid_adjustment",
        "current_bid": from,
        "proposed_bid": to,
    })
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_lifecycle() {
    let (_dir, app) = app();
    let (status, job) = post_json(&app, "/api/jobs", json!({ "account_id": "acct-1", "sync_type": "campaigns" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "pending");
    let id = job["id"].as_str().unwrap().to_string();

    let (status, done) = post(&app, &format!("/api/jobs/{id}/run")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "completed");
    assert_eq!(done["records_synced"], 10);

    // finished jobs cannot be cancelled
    let (status, body) = post(&app, &format!("/api/jobs/{id}/cancel")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());

    let (status, list) = get(&app, "/api/jobs?account_id=acct-1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_job_is_404() {
    let (_dir, app) = app();
    let (status, body) = get(&app, "/api/jobs/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn empty_account_is_400() {
    let (_dir, app) = app();
    let (status, _) = post_json(&app, "/api/jobs", json!({ "account_id": "" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn tick_runs_pending_jobs() {
    let (_dir, app) = app();
    post_json(&app, "/api/jobs", json!({ "account_id": "acct-1" })).await;
    let (status, report) = post(&app, "/api/tick").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["jobs_run"], 1);
}

#[tokio::test]
async fn rate_limit_reports_windows() {
    let (_dir, app) = app();
    let (status, body) = get(&app, "/api/rate-limit").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["windows"].as_array().unwrap().len(), 3);
}

// ---------------------------------------------------------------------------
// Schedules
// ---------------------------------------------------------------------------

#[tokio::test]
async fn schedule_crud_and_trigger() {
    let (_dir, app) = app();
    let (status, s) = post_json(
        &app,
        "/api/schedules",
        json!({ "account_id": "acct-1", "sync_type": "keywords", "frequency": "daily", "time_of_day": "02:00:00" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = s["id"].as_str().unwrap().to_string();

    let (status, updated) = patch_json(&app, &format!("/api/schedules/{id}"), json!({ "enabled": false })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["enabled"], false);

    let (status, exec) = post(&app, &format!("/api/schedules/{id}/trigger")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(exec["status"], "completed");

    let (_, history) = get(&app, &format!("/api/schedules/{id}/history")).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
    let (_, stats) = get(&app, &format!("/api/schedules/{id}/stats")).await;
    assert_eq!(stats["total_executions"], 1);

    let (status, _) = send(&app, "DELETE", &format!("/api/schedules/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = get(&app, &format!("/api/schedules/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn monthly_schedule_without_day_is_400() {
    let (_dir, app) = app();
    let (status, _) = post_json(
        &app,
        "/api/schedules",
        json!({ "account_id": "acct-1", "sync_type": "all", "frequency": "monthly" }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Initialization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backfill_runs_in_background_and_replan_conflicts() {
    let (_dir, app) = app();
    let (status, planned) = post(&app, "/api/initialization/acct-1/start").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(planned["mode"], "backfill");

    let mut progress = Value::Null;
    for _ in 0..200 {
        let (_, p) = get(&app, "/api/initialization/acct-1/progress").await;
        if p["mode"] == "incremental" {
            progress = p;
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(progress["status"], "completed");
    assert_eq!(progress["overall_progress"], 100.0);

    let (status, _) = post(&app, "/api/initialization/acct-1/start").await;
    assert_eq!(status, StatusCode::CONFLICT);

    // the background task may still be winding down
    let mut retried = None;
    for _ in 0..100 {
        let (status, body) = post(&app, "/api/initialization/acct-1/retry").await;
        if status != StatusCode::CONFLICT {
            retried = Some((status, body));
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let (status, body) = retried.unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["requeued"], 0);
}

#[tokio::test]
async fn progress_for_unknown_account_is_404() {
    let (_dir, app) = app();
    let (status, _) = get(&app, "/api/initialization/ghost/progress").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

async fn enable(app: &axum::Router, account: &str, mode: &str) {
    let (status, cfg) = patch_json(
        app,
        &format!("/api/automation/{account}/config"),
        json!({ "enabled": true, "mode": mode }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cfg["enabled"], true);
}

#[tokio::test]
async fn cycle_applies_and_blocks() {
    let (_dir, app) = app();
    enable(&app, "acct-1", "full_auto").await;

    let (status, record) = post_json(
        &app,
        "/api/automation/acct-1/cycle",
        json!({ "actions": [bid("kw-1", 1.0, 1.1, 0.9), bid("kw-2", 1.0, 2.0, 0.9)] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["success_items"], 1);
    assert_eq!(record["blocked_items"], 1);

    let (_, stats) = get(&app, "/api/automation/acct-1/stats").await;
    assert_eq!(stats["bid_adjustments"], 1);
    assert_eq!(stats["blocked"], 1);

    let (_, history) = get(&app, "/api/automation/acct-1/history?limit=5").await;
    assert_eq!(history.as_array().unwrap().len(), 1);

    let detail_id = record["details"][0]["id"].as_str().unwrap();
    let (status, detail) = get(&app, &format!("/api/details/{detail_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["status"], "applied");
}

#[tokio::test]
async fn emergency_stop_blocks_until_resume() {
    let (_dir, app) = app();
    enable(&app, "acct-1", "full_auto").await;

    let (status, cfg) = post_json(&app, "/api/automation/acct-1/stop", json!({ "reason": "spend spike" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cfg["blocked_reason"], "spend spike");

    let (_, record) = post_json(
        &app,
        "/api/automation/acct-1/cycle",
        json!({ "actions": [bid("kw-1", 1.0, 1.1, 0.95)] }),
    )
    .await;
    assert_eq!(record["blocked_items"], 1);
    assert_eq!(record["success_items"], 0);

    let (status, cfg) = post(&app, "/api/automation/acct-1/resume").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cfg["enabled"], true);

    let (_, record) = post_json(
        &app,
        "/api/automation/acct-1/cycle",
        json!({ "actions": [bid("kw-1", 1.0, 1.1, 0.95)] }),
    )
    .await;
    assert_eq!(record["success_items"], 1);
}

#[tokio::test]
async fn stop_without_reason_is_400() {
    let (_dir, app) = app();
    let (status, _) = post_json(&app, "/api/automation/acct-1/stop", json!({ "reason": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn approval_flow() {
    let (_dir, app) = app();
    enable(&app, "acct-1", "approval").await;

    let (_, record) = post_json(
        &app,
        "/api/automation/acct-1/cycle",
        json!({ "actions": [bid("kw-1", 1.0, 1.1, 0.7)] }),
    )
    .await;
    assert_eq!(record["pending_items"], 1);

    let (_, pending) = get(&app, "/api/approvals?account_id=acct-1").await;
    let pending = pending.as_array().unwrap();
    assert_eq!(pending.len(), 1);
    let id = pending[0]["id"].as_str().unwrap().to_string();

    let (status, batch) = post(&app, &format!("/api/approvals/{id}/approve")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch["success_items"], 1);

    // already resolved
    let (status, _) = post(&app, &format!("/api/approvals/{id}/approve")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let (_, pending) = get(&app, "/api/approvals").await;
    assert!(pending.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn rollback_once() {
    let (_dir, app) = app();
    enable(&app, "acct-1", "full_auto").await;
    let (_, record) = post_json(
        &app,
        "/api/automation/acct-1/cycle",
        json!({ "actions": [bid("kw-1", 1.0, 1.2, 0.9)] }),
    )
    .await;
    let detail_id = record["details"][0]["id"].as_str().unwrap().to_string();

    let (status, rb) = post(&app, &format!("/api/details/{detail_id}/rollback")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rb["details"][0]["action_type"], "rollback");
    assert_eq!(rb["details"][0]["after"], json!(1.0));

    let (status, _) = post(&app, &format!("/api/details/{detail_id}/rollback")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_endpoint_is_an_sse_stream() {
    let (_dir, app) = app();
    let req = axum::http::Request::builder()
        .uri("/api/events")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ct = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(ct.starts_with("text/event-stream"));
}
