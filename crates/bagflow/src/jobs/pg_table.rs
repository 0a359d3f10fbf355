// crates/bagflow/src/jobs/pg_table.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::TableError;
use crate::jobs::model::{JobRecord, JobStatus};
use crate::jobs::table::JobTable;

const COLUMNS: &str = r#"
    job_id, status, attempt, max_attempts,
    source_bucket, source_key, dest_bucket, dest_key, content_version,
    backend_run_id, last_error, next_retry_at,
    version, created_at, updated_at
"#;

#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRecordRow {
    job_id: String,
    status: String,
    attempt: i32,
    max_attempts: i32,

    source_bucket: String,
    source_key: String,
    dest_bucket: String,
    dest_key: String,
    content_version: Option<String>,

    backend_run_id: Option<String>,
    last_error: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,

    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRecordRow> for JobRecord {
    type Error = TableError;

    fn try_from(row: JobRecordRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row.status.parse().map_err(|reason| TableError::Corrupt {
            job_id: row.job_id.clone(),
            reason,
        })?;

        Ok(JobRecord {
            job_id: row.job_id,
            status,
            attempt: row.attempt.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            source_bucket: row.source_bucket,
            source_key: row.source_key,
            dest_bucket: row.dest_bucket,
            dest_key: row.dest_key,
            content_version: row.content_version,
            backend_run_id: row.backend_run_id,
            last_error: row.last_error,
            next_retry_at: row.next_retry_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Shared job table. Exclusivity across trigger instances comes from
/// `ON CONFLICT DO NOTHING` inserts and version-guarded updates.
#[derive(Clone)]
pub struct PgJobTable {
    pool: PgPool,
}

impl PgJobTable {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobTable for PgJobTable {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, TableError> {
        let row = sqlx::query_as::<_, JobRecordRow>(&format!(
            "SELECT {COLUMNS} FROM job_records WHERE job_id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn put_if_absent(&self, record: &JobRecord) -> Result<bool, TableError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO job_records (
                job_id, status, attempt, max_attempts,
                source_bucket, source_key, dest_bucket, dest_key, content_version,
                backend_run_id, last_error, next_retry_at,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (job_id) DO NOTHING
            "#,
        )
        .bind(&record.job_id)
        .bind(record.status.as_str())
        .bind(record.attempt as i32)
        .bind(record.max_attempts as i32)
        .bind(&record.source_bucket)
        .bind(&record.source_key)
        .bind(&record.dest_bucket)
        .bind(&record.dest_key)
        .bind(&record.content_version)
        .bind(&record.backend_run_id)
        .bind(&record.last_error)
        .bind(record.next_retry_at)
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn update(&self, record: &JobRecord, expected_version: i64) -> Result<bool, TableError> {
        let updated = sqlx::query(
            r#"
            UPDATE job_records
            SET status = $2,
                attempt = $3,
                max_attempts = $4,
                backend_run_id = $5,
                last_error = $6,
                next_retry_at = $7,
                version = $8,
                updated_at = $9
            WHERE job_id = $1
              AND version = $10
            "#,
        )
        .bind(&record.job_id)
        .bind(record.status.as_str())
        .bind(record.attempt as i32)
        .bind(record.max_attempts as i32)
        .bind(&record.backend_run_id)
        .bind(&record.last_error)
        .bind(record.next_retry_at)
        .bind(record.version)
        .bind(record.updated_at)
        .bind(expected_version)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(updated == 1)
    }

    async fn delete(&self, job_id: &str, expected_version: i64) -> Result<bool, TableError> {
        let deleted = sqlx::query("DELETE FROM job_records WHERE job_id = $1 AND version = $2")
            .bind(job_id)
            .bind(expected_version)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(deleted == 1)
    }

    async fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<JobRecord>, TableError> {
        let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
        let limit = limit.clamp(1, 10_000) as i64;

        let rows = sqlx::query_as::<_, JobRecordRow>(&format!(
            r#"
            SELECT {COLUMNS}
            FROM job_records
            WHERE status = ANY($1)
            ORDER BY updated_at ASC
            LIMIT $2
            "#
        ))
        .bind(statuses)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobRecord::try_from).collect()
    }

    async fn ping(&self) -> Result<(), TableError> {
        let _: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
