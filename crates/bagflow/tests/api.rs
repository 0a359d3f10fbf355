mod common;

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use bagflow::api::{router, ApiState};
use bagflow::events::{FilterConfig, NotificationFilter};
use bagflow::jobs::builder::job_id_for;
use bagflow::jobs::{BuilderConfig, Dispatcher, JobRequestBuilder};
use bagflow::trigger::TriggerService;
use common::{
    fast_config, parked_retries, FaultyTable, Harness, Mode, RecordingBackend, UnavailableTable,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const SCENARIO_KEY: &str = "robot_log_20240101_000000.mcap";

fn scenario_body() -> Value {
    json!({
        "Records": [{
            "eventName": "s3:ObjectCreated:Put",
            "s3": {
                "bucket": { "name": "raw-data" },
                "object": { "key": SCENARIO_KEY }
            }
        }]
    })
}

fn app(h: &Harness) -> Router {
    router(ApiState::new(h.trigger()))
}

fn unavailable_app() -> Router {
    let dispatcher = Dispatcher::new(
        Arc::new(UnavailableTable),
        RecordingBackend::new(Mode::Accept),
        None,
        fast_config(),
    );
    router(ApiState::new(TriggerService::new(
        NotificationFilter::new(FilterConfig::default()),
        JobRequestBuilder::new(BuilderConfig::default()),
        dispatcher,
    )))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Vec<u8>>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(Body::from).unwrap_or_else(Body::empty))
        .expect("request");

    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post_json(app: &Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    send(app, "POST", uri, Some(serde_json::to_vec(body).unwrap())).await
}

#[tokio::test]
async fn scenario_event_is_accepted_then_deduplicated() {
    let h = Harness::new(parked_retries(), Mode::Accept);
    let app = app(&h);
    let expected_id = job_id_for("raw-data", SCENARIO_KEY, None);

    let (status, body) = post_json(&app, "/events", &scenario_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["results"].as_array().unwrap().len(), 1);
    assert_eq!(body["results"][0]["objectKey"], SCENARIO_KEY);
    assert_eq!(body["results"][0]["outcome"], "accepted");
    assert_eq!(body["results"][0]["jobId"], expected_id.as_str());

    let (status, body) = post_json(&app, "/events", &scenario_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["outcome"], "deduplicated");
    assert_eq!(h.backend.count(), 1);

    let (status, job) = send(&app, "GET", &format!("/jobs/{expected_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "submitted");
    assert_eq!(job["dest_bucket"], "processed-data");
    assert_eq!(job["dest_key"], "robot_log_20240101_000000.csv");
    assert_eq!(job["attempt"], 1);
}

#[tokio::test]
async fn minio_path_is_an_alias() {
    let h = Harness::new(parked_retries(), Mode::Accept);
    let (status, body) = post_json(&app(&h), "/minio-event", &scenario_body()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["outcome"], "accepted");
}

#[tokio::test]
async fn malformed_notifications_are_bad_requests() {
    let h = Harness::new(parked_retries(), Mode::Accept);
    let app = app(&h);

    let (status, body) = send(&app, "POST", "/events", Some(b"not json".to_vec())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("JSON"));

    let (status, _) = post_json(&app, "/events", &json!({ "records": [] })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post_json(&app, "/events", &json!({ "Records": 5 })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.backend.count(), 0);
}

#[tokio::test]
async fn irrelevant_events_need_no_action() {
    let h = Harness::new(parked_retries(), Mode::Accept);
    let body = json!({
        "Records": [
            { "eventName": "s3:ObjectCreated:Put", "s3": { "bucket": { "name": "other" }, "object": { "key": "x.mcap" } } },
            { "eventName": "s3:ObjectCreated:Put", "s3": { "bucket": { "name": "raw-data" }, "object": { "key": "notes.txt" } } }
        ]
    });

    let (status, body) = post_json(&app(&h), "/events", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_action");
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn backend_failure_still_accepts_and_schedules_retry() {
    let h = Harness::new(parked_retries(), Mode::FailTransport);
    let app = app(&h);

    let (status, body) = post_json(&app, "/events", &scenario_body()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"][0]["outcome"], "accepted");

    let id = job_id_for("raw-data", SCENARIO_KEY, None);
    let (_, job) = send(&app, "GET", &format!("/jobs/{id}"), None).await;
    assert_eq!(job["status"], "failed");
    assert_eq!(job["error_code"], "SUBMIT_TRANSPORT");
    assert!(job["next_retry_at"].is_string());
    assert!(job["suggested_action"].is_string());
    h.dispatcher.shutdown();
}

#[tokio::test]
async fn unknown_jobs_are_not_found() {
    let h = Harness::new(parked_retries(), Mode::Accept);
    let app = app(&h);

    let (status, _) = send(&app, "GET", "/jobs/deadbeef", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/jobs/deadbeef/abandon", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = post_json(
        &app,
        "/jobs/deadbeef/outcome",
        &json!({ "attempt": 1, "result": "succeeded" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ack"], "unknown");
}

#[tokio::test]
async fn outcome_callback_is_idempotent() {
    let h = Harness::new(parked_retries(), Mode::Accept);
    let app = app(&h);
    post_json(&app, "/events", &scenario_body()).await;
    let id = job_id_for("raw-data", SCENARIO_KEY, None);
    let uri = format!("/jobs/{id}/outcome");

    let (_, body) = post_json(&app, &uri, &json!({ "attempt": 1, "result": "running" })).await;
    assert_eq!(body["ack"], "applied");

    let (_, body) = post_json(&app, &uri, &json!({ "attempt": 1, "result": "succeeded" })).await;
    assert_eq!(body["ack"], "applied");

    let (_, body) = post_json(
        &app,
        &uri,
        &json!({ "attempt": 1, "result": "failed", "error": "late duplicate" }),
    )
    .await;
    assert_eq!(body["ack"], "stale");

    let (_, job) = send(&app, "GET", &format!("/jobs/{id}"), None).await;
    assert_eq!(job["status"], "succeeded");
}

#[tokio::test]
async fn abandon_route_stops_the_job() {
    let h = Harness::new(parked_retries(), Mode::Accept);
    let app = app(&h);
    post_json(&app, "/events", &scenario_body()).await;
    let id = job_id_for("raw-data", SCENARIO_KEY, None);

    let (status, job) = send(&app, "POST", &format!("/jobs/{id}/abandon"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "abandoned");
    assert_eq!(job["error_code"], "MANUAL_ABANDON");

    let (_, body) = post_json(&app, "/events", &scenario_body()).await;
    assert_eq!(body["results"][0]["outcome"], "rejected");
}

#[tokio::test]
async fn health_reflects_the_job_table() {
    let h = Harness::new(parked_retries(), Mode::Accept);
    let (status, body) = send(&app(&h), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&unavailable_app(), "GET", "/health", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn unavailable_table_asks_for_redelivery() {
    let app = unavailable_app();

    let (status, body) = post_json(&app, "/events", &scenario_body()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "error");
    assert_eq!(body["results"][0]["outcome"], "error");
    assert!(body["results"][0]["detail"].is_string());

    let (status, _) = send(&app, "GET", "/jobs/deadbeef", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // nothing actionable means nothing to retry
    let (status, body) = post_json(&app, "/events", &json!({ "Records": [] })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "no_action");
}

#[tokio::test]
async fn one_failing_file_does_not_block_the_others() {
    let table = Arc::new(FaultyTable::default());
    let backend = RecordingBackend::new(Mode::Accept);
    let dispatcher = Dispatcher::new(table.clone(), backend.clone(), None, parked_retries());
    let app = router(ApiState::new(TriggerService::new(
        NotificationFilter::new(FilterConfig::default()),
        JobRequestBuilder::new(BuilderConfig::default()),
        dispatcher,
    )));

    table.fail_job(&job_id_for("raw-data", "robot_log_a.mcap", None));
    let body = json!({
        "Records": [
            {
                "eventName": "s3:ObjectCreated:Put",
                "s3": { "bucket": { "name": "raw-data" }, "object": { "key": "robot_log_a.mcap" } }
            },
            {
                "eventName": "s3:ObjectCreated:Put",
                "s3": { "bucket": { "name": "raw-data" }, "object": { "key": "robot_log_b.mcap" } }
            }
        ]
    });

    let (status, body) = post_json(&app, "/events", &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "partial");

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["objectKey"], "robot_log_a.mcap");
    assert_eq!(results[0]["outcome"], "error");
    assert_eq!(results[1]["objectKey"], "robot_log_b.mcap");
    assert_eq!(results[1]["outcome"], "accepted");
    assert_eq!(backend.count(), 1);
}

#[tokio::test]
async fn index_lists_endpoints() {
    let h = Harness::new(parked_retries(), Mode::Accept);
    let (status, body) = send(&app(&h), "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["endpoints"]["POST /events"].is_string());
}
