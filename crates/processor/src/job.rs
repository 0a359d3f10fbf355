use tracing::{info, instrument};

use crate::store::{ObjectStore, StoreError};
use crate::transform::{transform, TransformError};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum JobArgsError {
    #[error("usage: bag-processor <source_bucket> <source_key> <dest_bucket> <dest_key>")]
    Usage,
    #[error("argument {0} must not be empty")]
    Empty(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("transform {key}: {source}")]
    Transform {
        key: String,
        #[source]
        source: TransformError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub bytes_in: usize,
    pub bytes_out: usize,
}

/// One processing run: raw object in, normalized object out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingJob {
    pub source_bucket: String,
    pub source_key: String,
    pub dest_bucket: String,
    pub dest_key: String,
}

impl ProcessingJob {
    /// Positional arguments, program name already stripped.
    pub fn from_args<I, S>(args: I) -> Result<Self, JobArgsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let [source_bucket, source_key, dest_bucket, dest_key] =
            <[String; 4]>::try_from(args).map_err(|_| JobArgsError::Usage)?;

        for (name, value) in [
            ("source_bucket", &source_bucket),
            ("source_key", &source_key),
            ("dest_bucket", &dest_bucket),
            ("dest_key", &dest_key),
        ] {
            if value.trim().is_empty() {
                return Err(JobArgsError::Empty(name));
            }
        }

        Ok(Self {
            source_bucket,
            source_key,
            dest_bucket,
            dest_key,
        })
    }

    /// Safe to repeat: the destination object is overwritten with identical bytes.
    #[instrument(skip_all, fields(source = %format!("{}/{}", self.source_bucket, self.source_key)))]
    pub async fn run(&self, store: &dyn ObjectStore) -> Result<RunSummary, ProcessError> {
        let raw = store.download(&self.source_bucket, &self.source_key).await?;

        let processed = transform(&raw, &self.source_key).map_err(|source| ProcessError::Transform {
            key: self.source_key.clone(),
            source,
        })?;

        store.create_bucket_if_absent(&self.dest_bucket).await?;
        let summary = RunSummary {
            bytes_in: raw.len(),
            bytes_out: processed.len(),
        };
        store
            .upload(&self.dest_bucket, &self.dest_key, processed)
            .await?;

        info!(
            dest = %format!("{}/{}", self.dest_bucket, self.dest_key),
            bytes_in = summary.bytes_in,
            bytes_out = summary.bytes_out,
            "processed object uploaded"
        );
        Ok(summary)
    }
}
