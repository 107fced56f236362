//! Integration tests for the `/api/v1/jobs` resource.

mod common;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use common::{body_json, get, post_empty, post_json};
use serde_json::json;
use simjob_queue::Queue;
use simjob_worker::ProcessOutcome;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_201_with_queued_job() {
    let app = common::build_test_app();
    let response = post_json(
        app.router.clone(),
        "/api/v1/jobs",
        json!({ "params": { "runs": 8, "samples_per_run": 100, "seed": 7 } }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    let job = &json["data"];
    assert_eq!(job["status"], "queued");
    assert_eq!(job["attempts"], 0);
    assert_eq!(job["progress"], 0.0);
    assert_eq!(job["params"]["runs"], 8);
    assert!(job["result_ref"].is_null());

    assert_eq!(app.store.len().await, 1);
    assert_eq!(app.queue.depth().await.unwrap().visible, 1);
}

#[tokio::test]
async fn submit_with_invalid_params_leaves_no_record() {
    let app = common::build_test_app();
    let response = post_json(
        app.router.clone(),
        "/api/v1/jobs",
        json!({ "params": { "runs": 0 } }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");

    assert!(app.store.is_empty().await);
    assert_eq!(app.queue.depth().await.unwrap().visible, 0);
}

#[tokio::test]
async fn submit_with_unknown_param_is_rejected() {
    let app = common::build_test_app();
    let response = post_json(
        app.router,
        "/api/v1/jobs",
        json!({ "params": { "runs": 4, "colour": "blue" } }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn submit_with_malformed_body_returns_400() {
    let app = common::build_test_app();
    let response = post_json(app.router, "/api/v1/jobs", json!({ "runs": 4 })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

// ---------------------------------------------------------------------------
// Get / list
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_unknown_job_returns_404() {
    let app = common::build_test_app();
    let uri = format!("/api/v1/jobs/{}", uuid::Uuid::now_v7());
    let response = get(app.router, &uri).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn get_with_malformed_id_returns_400() {
    let app = common::build_test_app();
    let response = get(app.router, "/api/v1/jobs/not-a-uuid").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn completed_job_reports_result_ref() {
    let app = common::build_test_app();
    let job_id = app
        .state
        .jobs
        .submit(json!({ "runs": 4, "samples_per_run": 50, "seed": 1 }))
        .await
        .unwrap();

    assert_matches!(app.run_next().await, ProcessOutcome::Completed);

    let response = get(app.router, &format!("/api/v1/jobs/{job_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await["data"].clone();
    assert_eq!(job["status"], "completed");
    assert_eq!(job["attempts"], 1);
    assert_eq!(job["progress"], 1.0);
    assert!(job["result_ref"].as_str().unwrap().contains(&job_id.to_string()));
    assert!(job["completed_at"].is_string());
}

#[tokio::test]
async fn list_filters_by_status() {
    let app = common::build_test_app();
    let done = app.state.jobs.submit(json!({ "runs": 4 })).await.unwrap();
    app.run_next().await;
    let waiting = app.state.jobs.submit(json!({ "runs": 4 })).await.unwrap();

    let all = body_json(get(app.router.clone(), "/api/v1/jobs").await).await;
    assert_eq!(all["data"].as_array().unwrap().len(), 2);

    let queued = body_json(get(app.router.clone(), "/api/v1/jobs?status=queued").await).await;
    let queued = queued["data"].as_array().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0]["id"], waiting.to_string());

    let completed =
        body_json(get(app.router.clone(), "/api/v1/jobs?status=completed&limit=10").await).await;
    let completed = completed["data"].as_array().unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["id"], done.to_string());
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_queued_job_prevents_execution() {
    let app = common::build_test_app();
    let job_id = app.state.jobs.submit(json!({ "runs": 4 })).await.unwrap();

    let response = post_empty(app.router.clone(), &format!("/api/v1/jobs/{job_id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["cancelled"], true);
    assert_eq!(json["data"]["job"]["status"], "cancelled");

    // The message is still delivered but never runs.
    assert_matches!(app.run_next().await, ProcessOutcome::AlreadyTerminal);

    let job = body_json(get(app.router, &format!("/api/v1/jobs/{job_id}")).await).await;
    assert_eq!(job["data"]["status"], "cancelled");
    assert_eq!(job["data"]["attempts"], 0);
    assert_eq!(app.queue.depth().await.unwrap().visible, 0);
}

#[tokio::test]
async fn cancel_finished_job_is_a_noop() {
    let app = common::build_test_app();
    let job_id = app.state.jobs.submit(json!({ "runs": 4 })).await.unwrap();
    app.run_next().await;

    let response = post_empty(app.router, &format!("/api/v1/jobs/{job_id}/cancel")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["cancelled"], false);
    assert_eq!(json["data"]["job"]["status"], "completed");
}

#[tokio::test]
async fn cancel_unknown_job_returns_404() {
    let app = common::build_test_app();
    let uri = format!("/api/v1/jobs/{}/cancel", uuid::Uuid::now_v7());
    let response = post_empty(app.router, &uri).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
