use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api::models::{
    ErrorBody, HealthResponse, JobView, OutcomeKind, OutcomeRequest, OutcomeResponse,
};
use crate::error::DispatchError;
use crate::events::StorageEvent;
use crate::jobs::dispatcher::{Dispatcher, JobResult};
use crate::trigger::TriggerService;

pub mod models;

#[derive(Clone)]
pub struct ApiState {
    pub trigger: TriggerService,
    pub dispatcher: Dispatcher,
}

impl ApiState {
    pub fn new(trigger: TriggerService) -> Self {
        let dispatcher = trigger.dispatcher().clone();
        Self {
            trigger,
            dispatcher,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        // Notifications
        .route("/events", post(receive_event))
        .route("/minio-event", post(receive_event))
        // Jobs
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/outcome", post(report_outcome))
        .route("/jobs/:id/abandon", post(abandon_job))
        // Health
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn index() -> impl IntoResponse {
    Json(json!({
        "service": "bagflow-trigger",
        "endpoints": {
            "POST /events": "storage notification webhook",
            "POST /minio-event": "alias of /events",
            "GET /health": "job table health",
            "GET /jobs/:id": "job record",
            "POST /jobs/:id/outcome": "run outcome callback",
            "POST /jobs/:id/abandon": "manual abandon",
        }
    }))
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
        .into_response()
}

fn unavailable(e: DispatchError) -> Response {
    warn!(error = %e, "job table unavailable");
    error_response(StatusCode::SERVICE_UNAVAILABLE, e)
}

/// The body is decoded by hand so malformed notifications get our 400, not axum's rejection.
pub async fn receive_event(State(state): State<ApiState>, body: Bytes) -> Response {
    let event = match StorageEvent::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "malformed notification");
            return error_response(StatusCode::BAD_REQUEST, e);
        }
    };

    let report = state.trigger.handle(&event).await;
    let status = if report.all_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report)).into_response()
}

pub async fn health(State(state): State<ApiState>) -> Response {
    match state.dispatcher.table().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                error: None,
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy".to_string(),
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

pub async fn get_job(State(state): State<ApiState>, Path(job_id): Path<String>) -> Response {
    match state.dispatcher.status(&job_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(JobView::from(record))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("job {job_id} not found")),
        Err(e) => unavailable(e),
    }
}

pub async fn report_outcome(
    State(state): State<ApiState>,
    Path(job_id): Path<String>,
    Json(body): Json<OutcomeRequest>,
) -> Response {
    let dispatcher = &state.dispatcher;
    let ack = match body.result {
        OutcomeKind::Running => dispatcher.mark_running(&job_id, body.attempt).await,
        OutcomeKind::Succeeded => {
            dispatcher
                .report_outcome(&job_id, body.attempt, JobResult::Succeeded)
                .await
        }
        OutcomeKind::Failed => {
            let message = body
                .error
                .unwrap_or_else(|| "job reported failure".to_string());
            dispatcher
                .report_outcome(&job_id, body.attempt, JobResult::Failed(message))
                .await
        }
    };

    match ack {
        Ok(ack) => (StatusCode::OK, Json(OutcomeResponse { ack })).into_response(),
        Err(e) => unavailable(e),
    }
}

pub async fn abandon_job(State(state): State<ApiState>, Path(job_id): Path<String>) -> Response {
    match state.dispatcher.abandon(&job_id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(JobView::from(record))).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("job {job_id} not found")),
        Err(e) => unavailable(e),
    }
}
