//! HTTP-level integration tests for the `/api/v1/tasks` endpoints.
//!
//! Requests go straight to the router through `tower::ServiceExt`; jobs
//! run on the real worker pool against an in-memory store.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{
    body_json, delete, get, log_messages, post_json, spawn_app, spawn_app_without_workers,
    submit, task, wait_for_status,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_202_with_task_id() {
    let app = spawn_app_without_workers();
    let response = post_json(app.router(), "/api/v1/tasks", json!({"duration": 1})).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "Processing");
    let id = json["data"]["task_id"].as_str().unwrap();

    let stored = task(&app, id).await;
    assert_eq!(stored["status"], "PENDING");
    assert_eq!(stored["retry_count"], 0);
    assert!(stored["started_at"].is_null());
    assert_eq!(log_messages(&stored), vec!["Task submitted"]);
}

#[tokio::test]
async fn submit_rejects_invalid_payloads() {
    let app = spawn_app_without_workers();

    for payload in [
        json!([1, 2, 3]),
        json!({"task_type": "mine_bitcoin"}),
        json!({"task_type": "web_scrape", "url": "ftp://example.com"}),
        json!({"duration": -1}),
    ] {
        let response = post_json(app.router(), "/api/v1/tasks", payload.clone()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "payload {payload}");
        let json = body_json(response).await;
        assert_eq!(json["code"], "VALIDATION_ERROR", "payload {payload}");
    }

    let listed = body_json(get(app.router(), "/api/v1/tasks").await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn malformed_json_body_returns_400() {
    let app = spawn_app_without_workers();
    let request = axum::http::Request::post("/api/v1/tasks")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app.router(), request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn vector_job_runs_to_success_with_checkpoint_logs() {
    let app = spawn_app();
    let id = submit(&app, json!({"vector_data": [0.5, 1.5], "duration": 5})).await;

    let done = wait_for_status(&app, &id, "SUCCESS").await;

    assert_eq!(done["result"]["processed_vectors"], 2);
    assert_eq!(done["result"]["processed_chunks"], 5);
    assert_eq!(done["result"]["status"], "indexed");
    assert!(done["started_at"].is_string());
    assert!(done["completed_at"].is_string());
    assert!(done["progress"].is_null());

    let messages = log_messages(&done);
    assert_eq!(messages.first().map(String::as_str), Some("Task submitted"));
    assert_eq!(messages.last().map(String::as_str), Some("Task processing complete"));
    let checkpoints = messages
        .iter()
        .filter(|m| m.starts_with("Processing chunk"))
        .count();
    assert_eq!(checkpoints, 5);
    assert_eq!(
        messages
            .iter()
            .filter(|m| m.starts_with("External service success"))
            .count(),
        5
    );
}

#[tokio::test]
async fn open_circuit_skips_external_calls_but_job_succeeds() {
    let store = std::sync::Arc::new(jobline_db::InMemoryJobStore::new());
    let app = common::TestApp::new(store, common::instant_external(1.0));
    app.start_workers();

    let id = submit(&app, json!({"vector_data": [1.0], "duration": 6})).await;
    let done = wait_for_status(&app, &id, "SUCCESS").await;

    let logs = done["logs"].as_array().unwrap();
    assert!(logs.iter().any(|l| l["level"] == "ERROR"
        && l["message"]
            .as_str()
            .unwrap()
            .starts_with("External service failed after retries")));
    assert!(logs.iter().any(|l| l["level"] == "WARNING"
        && l["message"] == "External service skipped (Circuit Breaker OPEN)"));
    assert_eq!(done["retry_count"], 0);
}

#[tokio::test]
async fn unreachable_scrape_target_fails_after_three_redeliveries() {
    let app = spawn_app();
    let id = submit(
        &app,
        json!({"task_type": "web_scrape", "url": "http://127.0.0.1:1/"}),
    )
    .await;

    let failed = wait_for_status(&app, &id, "FAILED").await;

    assert_eq!(failed["retry_count"], 3);
    assert!(failed["result"].is_null());
    let logs = failed["logs"].as_array().unwrap();
    let retries = logs
        .iter()
        .filter(|l| l["level"] == "WARNING" && l["message"].as_str().unwrap().starts_with("Retrying task: Scrape failed"))
        .count();
    assert_eq!(retries, 3);
    let last = logs.last().unwrap();
    assert_eq!(last["level"], "ERROR");
    assert!(last["message"].as_str().unwrap().starts_with("Scrape failed"));
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelling_running_job_is_final() {
    let app = spawn_app();
    let id = submit(&app, json!({"duration": 200})).await;
    wait_for_status(&app, &id, "RUNNING").await;

    let response = delete(app.router(), &format!("/api/v1/tasks/{id}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // Long enough for the worker to notice and for a late write to land.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let cancelled = task(&app, &id).await;
    assert_eq!(cancelled["status"], "CANCELLED");
    assert!(cancelled["result"].is_null());
    assert!(cancelled["completed_at"].is_string());
    let messages = log_messages(&cancelled);
    assert!(messages.iter().any(|m| m == "Task cancelled"));
    assert!(!messages.iter().any(|m| m == "Task processing complete"));

    // The stopped worker left no live progress behind.
    let job_id: jobline_core::types::JobId = id.parse().unwrap();
    assert!(app.engine.progress.get(job_id).await.is_none());
}

#[tokio::test]
async fn cancelling_pending_job_never_runs_it() {
    let app = spawn_app_without_workers();
    let id = submit(&app, json!({"duration": 1})).await;

    let response = delete(app.router(), &format!("/api/v1/tasks/{id}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    // The delivery is still queued; workers must skip it.
    app.start_workers();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let cancelled = task(&app, &id).await;
    assert_eq!(cancelled["status"], "CANCELLED");
    assert!(cancelled["started_at"].is_null());
    assert_eq!(log_messages(&cancelled), vec!["Task submitted", "Task cancelled"]);
}

#[tokio::test]
async fn cancelling_finished_job_returns_409() {
    let app = spawn_app_without_workers();
    let id = submit(&app, json!({"duration": 1})).await;

    let first = delete(app.router(), &format!("/api/v1/tasks/{id}")).await;
    assert_eq!(first.status(), StatusCode::NO_CONTENT);

    let second = delete(app.router(), &format!("/api/v1/tasks/{id}")).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let json = body_json(second).await;
    assert_eq!(json["code"], "CONFLICT");
    assert_eq!(json["error"], "Job is already CANCELLED and cannot be cancelled");
}

#[tokio::test]
async fn cancelling_unknown_job_returns_404() {
    let app = spawn_app_without_workers();
    let id = jobline_core::types::new_job_id();

    let response = delete(app.router(), &format!("/api/v1/tasks/{id}")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_returns_newest_first_with_paging() {
    let app = spawn_app_without_workers();
    let mut ids = Vec::new();
    for i in 0..15 {
        ids.push(submit(&app, json!({"duration": 1, "metadata": {"n": i}})).await);
    }

    let page = body_json(get(app.router(), "/api/v1/tasks").await).await;
    let page = page["data"].as_array().unwrap();
    assert_eq!(page.len(), 10);
    assert_eq!(page[0]["task_id"], ids[14].as_str());
    assert_eq!(page[9]["task_id"], ids[5].as_str());
    assert!(page.iter().all(|t| t.get("logs").is_none()));

    let rest = body_json(get(app.router(), "/api/v1/tasks?skip=10").await).await;
    let rest = rest["data"].as_array().unwrap();
    assert_eq!(rest.len(), 5);
    assert_eq!(rest[4]["task_id"], ids[0].as_str());

    let capped = body_json(get(app.router(), "/api/v1/tasks?limit=500").await).await;
    assert_eq!(capped["data"].as_array().unwrap().len(), 15);

    let small = body_json(get(app.router(), "/api/v1/tasks?offset=2&limit=3").await).await;
    let small = small["data"].as_array().unwrap();
    assert_eq!(small.len(), 3);
    assert_eq!(small[0]["task_id"], ids[12].as_str());
}

#[tokio::test]
async fn logs_endpoint_returns_ordered_logs() {
    let app = spawn_app();
    let id = submit(&app, json!({"duration": 2})).await;
    wait_for_status(&app, &id, "SUCCESS").await;

    let response = get(app.router(), &format!("/api/v1/tasks/{id}/logs")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let logs = body_json(response).await["data"].as_array().unwrap().clone();

    assert_eq!(logs[0]["message"], "Task submitted");
    assert_eq!(logs[1]["message"], "Task started processing");
    let timestamps: Vec<&str> = logs.iter().map(|l| l["timestamp"].as_str().unwrap()).collect();
    let parsed: Vec<chrono::DateTime<chrono::Utc>> =
        timestamps.iter().map(|t| t.parse().unwrap()).collect();
    assert!(parsed.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn unknown_task_returns_404_everywhere() {
    let app = spawn_app_without_workers();
    let id = jobline_core::types::new_job_id();

    for uri in [
        format!("/api/v1/tasks/{id}"),
        format!("/api/v1/tasks/{id}/logs"),
        format!("/api/v1/tasks/{id}/stream"),
    ] {
        let response = get(app.router(), &uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn malformed_task_id_returns_400() {
    let app = spawn_app_without_workers();
    let response = get(app.router(), "/api/v1/tasks/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
