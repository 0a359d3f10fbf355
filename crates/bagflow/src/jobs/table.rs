use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::error::TableError;
use crate::jobs::model::{JobRecord, JobStatus};

/// Storage for job records keyed by `job_id`.
///
/// Writes are conditional so exclusivity holds even when several dispatchers
/// share one table: `put_if_absent` only creates, `update` and `delete` only
/// succeed against the version the caller read.
#[async_trait]
pub trait JobTable: Send + Sync {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, TableError>;

    /// Returns `false` if a record with this id already exists.
    async fn put_if_absent(&self, record: &JobRecord) -> Result<bool, TableError>;

    /// Replaces the record iff its stored version equals `expected_version`.
    async fn update(&self, record: &JobRecord, expected_version: i64) -> Result<bool, TableError>;

    async fn delete(&self, job_id: &str, expected_version: i64) -> Result<bool, TableError>;

    /// Oldest `updated_at` first.
    async fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<JobRecord>, TableError>;

    async fn ping(&self) -> Result<(), TableError>;
}

/// Process-local table. Suitable for a single trigger instance and for tests.
#[derive(Default)]
pub struct MemoryJobTable {
    records: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryJobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl JobTable for MemoryJobTable {
    async fn get(&self, job_id: &str) -> Result<Option<JobRecord>, TableError> {
        Ok(self.records.read().get(job_id).cloned())
    }

    async fn put_if_absent(&self, record: &JobRecord) -> Result<bool, TableError> {
        let mut records = self.records.write();
        if records.contains_key(&record.job_id) {
            return Ok(false);
        }
        records.insert(record.job_id.clone(), record.clone());
        Ok(true)
    }

    async fn update(&self, record: &JobRecord, expected_version: i64) -> Result<bool, TableError> {
        let mut records = self.records.write();
        match records.get_mut(&record.job_id) {
            Some(current) if current.version == expected_version => {
                *current = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, job_id: &str, expected_version: i64) -> Result<bool, TableError> {
        let mut records = self.records.write();
        match records.get(job_id) {
            Some(current) if current.version == expected_version => {
                records.remove(job_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_status(
        &self,
        statuses: &[JobStatus],
        limit: usize,
    ) -> Result<Vec<JobRecord>, TableError> {
        let mut rows: Vec<JobRecord> = self
            .records
            .read()
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.updated_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn ping(&self) -> Result<(), TableError> {
        Ok(())
    }
}
