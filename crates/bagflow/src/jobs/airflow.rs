use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::error::BackendError;
use crate::jobs::backend::{ExecutionBackend, JobOutcomeSource, RunState};
use crate::jobs::model::JobRequest;

#[derive(Debug, Clone)]
pub struct AirflowConfig {
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub dag_id: String,
    pub timeout: Duration,
}

impl Default for AirflowConfig {
    fn default() -> Self {
        Self {
            api_url: "http://airflow-webserver:8080".to_string(),
            username: "admin".to_string(),
            password: "admin".to_string(),
            dag_id: "rosbag_processor_poc".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Triggers DAG runs through the Airflow stable REST API and reads their state back.
pub struct AirflowBackend {
    client: reqwest::Client,
    cfg: AirflowConfig,
}

#[derive(Debug, Deserialize)]
struct DagRun {
    dag_run_id: Option<String>,
    state: Option<String>,
}

impl AirflowBackend {
    pub fn new(cfg: AirflowConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(cfg.timeout).build()?;
        Ok(Self { client, cfg })
    }

    /// Stable per `(job_id, attempt)`, so a repeated submit hits 409 instead of a second run.
    pub fn dag_run_id(request: &JobRequest) -> String {
        let short = &request.job_id[..request.job_id.len().min(16)];
        format!("bagflow-{short}-a{}", request.attempt)
    }

    fn runs_url(&self) -> String {
        format!(
            "{}/api/v1/dags/{}/dagRuns",
            self.cfg.api_url.trim_end_matches('/'),
            self.cfg.dag_id
        )
    }
}

#[async_trait]
impl ExecutionBackend for AirflowBackend {
    fn name(&self) -> &'static str {
        "airflow"
    }

    #[instrument(skip(self, request), fields(job_id = %request.job_id, attempt = request.attempt))]
    async fn submit_job(&self, request: &JobRequest) -> Result<String, BackendError> {
        let run_id = Self::dag_run_id(request);
        let payload = json!({
            "dag_run_id": run_id,
            "conf": {
                "job_id": request.job_id,
                "attempt": request.attempt,
                "bucket": request.source_bucket,
                "key": request.source_key,
                "dest_bucket": request.dest_bucket,
                "dest_key": request.dest_key,
            }
        });

        let response = self
            .client
            .post(self.runs_url())
            .basic_auth(&self.cfg.username, Some(&self.cfg.password))
            .json(&payload)
            .send()
            .await?;

        match response.status() {
            s if s.is_success() => {
                let run: DagRun = response
                    .json()
                    .await
                    .map_err(|e| BackendError::Protocol(e.to_string()))?;
                Ok(run.dag_run_id.unwrap_or(run_id))
            }
            StatusCode::CONFLICT => {
                debug!(run_id = %run_id, "dag run already exists");
                Ok(run_id)
            }
            status => Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

#[async_trait]
impl JobOutcomeSource for AirflowBackend {
    async fn poll(&self, backend_run_id: &str) -> Result<RunState, BackendError> {
        let response = self
            .client
            .get(format!("{}/{}", self.runs_url(), backend_run_id))
            .basic_auth(&self.cfg.username, Some(&self.cfg.password))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let run: DagRun = response
            .json()
            .await
            .map_err(|e| BackendError::Protocol(e.to_string()))?;

        Ok(run_state(run.state.as_deref(), backend_run_id))
    }
}

fn run_state(state: Option<&str>, run_id: &str) -> RunState {
    match state {
        Some("running") => RunState::Running,
        Some("success") => RunState::Succeeded,
        Some("failed") => RunState::Failed(format!("dag run {run_id} failed")),
        _ => RunState::Queued,
    }
}
