#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bagflow::error::{BackendError, TableError};
use bagflow::events::model::sample_notification;
use bagflow::events::{ActionableFile, FilterConfig, NotificationFilter, StorageEvent};
use bagflow::jobs::retry::RetryConfig;
use bagflow::jobs::{
    BuilderConfig, Dispatcher, DispatcherConfig, ExecutionBackend, JobOutcomeSource, JobRecord,
    JobRequest, JobRequestBuilder, JobStatus, JobTable, MemoryJobTable, RunState,
};
use bagflow::trigger::TriggerService;

pub const RAW: &str = "raw-data";
pub const PROCESSED: &str = "processed-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Accept,
    FailTransport,
}

/// Fake backend that records every submission.
pub struct RecordingBackend {
    mode: Mutex<Mode>,
    delay: Duration,
    submissions: Mutex<Vec<(JobRequest, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingBackend {
    pub fn new(mode: Mode) -> Arc<Self> {
        Self::with_delay(mode, Duration::ZERO)
    }

    pub fn with_delay(mode: Mode, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            mode: Mutex::new(mode),
            delay,
            submissions: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn set_mode(&self, mode: Mode) {
        *self.mode.lock() = mode;
    }

    pub fn count(&self) -> usize {
        self.submissions.lock().len()
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.submissions.lock().iter().map(|(r, _)| r.attempt).collect()
    }

    pub fn submitted_at(&self) -> Vec<Instant> {
        self.submissions.lock().iter().map(|(_, at)| *at).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn run_id(request: &JobRequest) -> String {
        format!("run-{}-a{}", &request.job_id[..8], request.attempt)
    }
}

#[async_trait]
impl ExecutionBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn submit_job(&self, request: &JobRequest) -> Result<String, BackendError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.submissions.lock().push((request.clone(), Instant::now()));

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match *self.mode.lock() {
            Mode::Accept => Ok(Self::run_id(request)),
            Mode::FailTransport => Err(BackendError::Transport("connection refused".to_string())),
        }
    }
}

/// Outcome source whose answers the test scripts.
#[derive(Default)]
pub struct FakeOutcomeSource {
    states: Mutex<HashMap<String, RunState>>,
}

impl FakeOutcomeSource {
    pub fn set(&self, run_id: &str, state: RunState) {
        self.states.lock().insert(run_id.to_string(), state);
    }
}

#[async_trait]
impl JobOutcomeSource for FakeOutcomeSource {
    async fn poll(&self, backend_run_id: &str) -> Result<RunState, BackendError> {
        Ok(self
            .states
            .lock()
            .get(backend_run_id)
            .cloned()
            .unwrap_or(RunState::Queued))
    }
}

/// A job table whose backing store is down.
pub struct UnavailableTable;

fn down() -> TableError {
    TableError::Unavailable("connection refused".to_string())
}

#[async_trait]
impl JobTable for UnavailableTable {
    async fn get(&self, _job_id: &str) -> Result<Option<JobRecord>, TableError> {
        Err(down())
    }

    async fn put_if_absent(&self, _record: &JobRecord) -> Result<bool, TableError> {
        Err(down())
    }

    async fn update(&self, _record: &JobRecord, _expected_version: i64) -> Result<bool, TableError> {
        Err(down())
    }

    async fn delete(&self, _job_id: &str, _expected_version: i64) -> Result<bool, TableError> {
        Err(down())
    }

    async fn list_by_status(
        &self,
        _statuses: &[JobStatus],
        _limit: usize,
    ) -> Result<Vec<JobRecord>, TableError> {
        Err(down())
    }

    async fn ping(&self) -> Result<(), TableError> {
        Err(down())
    }
}

/// In-memory table that fails every call touching one chosen `job_id`.
#[derive(Default)]
pub struct FaultyTable {
    inner: MemoryJobTable,
    failing: Mutex<Option<String>>,
}

impl FaultyTable {
    pub fn fail_job(&self, job_id: &str) {
        *self.failing.lock() = Some(job_id.to_string());
    }

    pub fn heal(&self) {
        *self.failing.lock() = None;
    }

    fn check(&self, job_id: &str) -> Result<(), TableError> {
        if self.failing.lock().as_deref() == Some(job_id) {
            return Err(down());
        }
        Ok(())
    }
}

#[async_trait]
impl JobTable for FaultyTable {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, TableError> {
        self.check(job_id)?;
        self.inner.get(job_id).await
    }

    async fn put_if_absent(&self, record: &JobRecord) -> Result<bool, TableError> {
        self.check(&record.job_id)?;
        self.inner.put_if_absent(record).await
    }

    async fn update(&self, record: &JobRecord, expected_version: i64) -> Result<bool, TableError> {
        self.check(&record.job_id)?;
        self.inner.update(record, expected_version).await
    }

    async fn delete(&self, job_id: &str, expected_version: i64) -> Result<bool, TableError> {
        self.check(job_id)?;
        self.inner.delete(job_id, expected_version).await
    }

    async fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<JobRecord>, TableError> {
        self.inner.list_by_status(statuses, limit).await
    }

    async fn ping(&self) -> Result<(), TableError> {
        self.inner.ping().await
    }
}

/// Short delays, no jitter, and timers long enough not to fire unless a test wants them to.
pub fn fast_config() -> DispatcherConfig {
    DispatcherConfig {
        max_attempts: 3,
        retry: RetryConfig {
            base: Duration::from_millis(50),
            max: Duration::from_secs(2),
            jitter_pct: 0.0,
        },
        running_timeout: Duration::from_secs(3600),
        dedup_window: Duration::from_secs(3600),
        max_concurrent_submits: 3,
        scan_batch: 100,
    }
}

/// Retries far enough out that only an explicit call runs them.
pub fn parked_retries() -> DispatcherConfig {
    DispatcherConfig {
        retry: RetryConfig {
            base: Duration::from_secs(600),
            max: Duration::from_secs(600),
            jitter_pct: 0.0,
        },
        ..fast_config()
    }
}

pub struct Harness {
    pub table: Arc<MemoryJobTable>,
    pub backend: Arc<RecordingBackend>,
    pub outcomes: Arc<FakeOutcomeSource>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new(cfg: DispatcherConfig, mode: Mode) -> Self {
        Self::with_backend(cfg, RecordingBackend::new(mode))
    }

    pub fn with_backend(cfg: DispatcherConfig, backend: Arc<RecordingBackend>) -> Self {
        let table = Arc::new(MemoryJobTable::new());
        let outcomes = Arc::new(FakeOutcomeSource::default());
        let dispatcher = Dispatcher::new(
            table.clone(),
            backend.clone(),
            Some(outcomes.clone() as Arc<dyn JobOutcomeSource>),
            cfg,
        );
        Self {
            table,
            backend,
            outcomes,
            dispatcher,
        }
    }

    pub fn trigger(&self) -> TriggerService {
        TriggerService::new(
            NotificationFilter::new(FilterConfig::default()),
            JobRequestBuilder::new(BuilderConfig::default()),
            self.dispatcher.clone(),
        )
    }

    pub async fn record(&self, job_id: &str) -> JobRecord {
        self.dispatcher
            .status(job_id)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("no record for {job_id}"))
    }
}

pub fn request(key: &str) -> JobRequest {
    JobRequestBuilder::new(BuilderConfig::default()).build(&ActionableFile {
        bucket: RAW.to_string(),
        object_key: key.to_string(),
        content_version: None,
        detected_at: Utc::now(),
    })
}

pub fn event(bucket: &str, key: &str) -> StorageEvent {
    StorageEvent::from_value(&sample_notification(bucket, key), Utc::now()).unwrap()
}

/// Polls `check` until it returns true or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}

pub async fn wait_for_status(dispatcher: &Dispatcher, job_id: &str, status: JobStatus) -> JobRecord {
    let reached = wait_until(Duration::from_secs(5), move || async move {
        matches!(dispatcher.status(job_id).await, Ok(Some(r)) if r.status == status)
    })
    .await;
    assert!(reached, "job {job_id} never reached {status}");
    dispatcher.status(job_id).await.unwrap().unwrap()
}

/// Postgres tests run only when TEST_DATABASE_URL is set.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE job_records")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}
