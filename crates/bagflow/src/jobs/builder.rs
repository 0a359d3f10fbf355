use sha2::{Digest, Sha256};

use crate::events::ActionableFile;
use crate::jobs::model::JobRequest;

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub dest_bucket: String,
    pub source_extension: String,
    pub dest_extension: String,
    /// Fold the object's version/ETag into the job id, so a re-upload is new work.
    pub include_content_version: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            dest_bucket: "processed-data".to_string(),
            source_extension: ".mcap".to_string(),
            dest_extension: ".csv".to_string(),
            include_content_version: false,
        }
    }
}

/// Turns actionable files into job requests. Pure and deterministic.
#[derive(Debug, Clone)]
pub struct JobRequestBuilder {
    cfg: BuilderConfig,
}

impl JobRequestBuilder {
    pub fn new(cfg: BuilderConfig) -> Self {
        Self { cfg }
    }

    pub fn build(&self, file: &ActionableFile) -> JobRequest {
        let version = if self.cfg.include_content_version {
            file.content_version.as_deref()
        } else {
            None
        };

        JobRequest {
            job_id: job_id_for(&file.bucket, &file.object_key, version),
            source_bucket: file.bucket.clone(),
            source_key: file.object_key.clone(),
            dest_bucket: self.cfg.dest_bucket.clone(),
            dest_key: dest_key_for(
                &file.object_key,
                &self.cfg.source_extension,
                &self.cfg.dest_extension,
            ),
            content_version: file.content_version.clone(),
            attempt: 1,
            created_at: file.detected_at,
        }
    }
}

/// Hex SHA-256 over `bucket \0 key [\0 version]`.
pub fn job_id_for(bucket: &str, key: &str, content_version: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bucket.as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    if let Some(version) = content_version {
        hasher.update([0u8]);
        hasher.update(version.as_bytes());
    }
    hex::encode(hasher.finalize())
}

pub fn dest_key_for(source_key: &str, source_ext: &str, dest_ext: &str) -> String {
    match source_key.strip_suffix(source_ext) {
        Some(stem) if !stem.is_empty() && !source_ext.is_empty() => format!("{stem}{dest_ext}"),
        _ => format!("{source_key}{dest_ext}"),
    }
}
