use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, instrument};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("object store request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn upload(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Succeeds when the bucket already exists.
    async fn create_bucket_if_absent(&self, bucket: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint_url: Option<String>,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// MinIO needs path-style addressing.
    pub force_path_style: bool,
}

impl S3Config {
    pub fn from_env() -> Self {
        let var = |k: &str| std::env::var(k).ok().filter(|s| !s.trim().is_empty());
        Self {
            endpoint_url: var("MINIO_ENDPOINT").or_else(|| Some("http://minio:9000".to_string())),
            region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            access_key: var("MINIO_ACCESS_KEY").or_else(|| var("AWS_ACCESS_KEY_ID")),
            secret_key: var("MINIO_SECRET_KEY").or_else(|| var("AWS_SECRET_ACCESS_KEY")),
            force_path_style: true,
        }
    }
}

/// S3 or MinIO through the AWS SDK.
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        if let (Some(access), Some(secret)) = (&config.access_key, &config.secret_key) {
            loader = loader.credentials_provider(Credentials::new(
                access.clone(),
                secret.clone(),
                None,
                None,
                "bag-processor",
            ));
        }
        let aws_config = loader.load().await;

        let mut builder = S3ConfigBuilder::from(&aws_config);
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        info!(
            endpoint = config.endpoint_url.as_deref().unwrap_or("aws"),
            region = %config.region,
            "object store client initialized"
        );
        Self {
            client: S3Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self))]
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| match e.as_service_error() {
                Some(se) if se.is_no_such_key() => StoreError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                },
                _ => StoreError::Request(format!("get {bucket}/{key}: {e}")),
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Request(format!("read {bucket}/{key}: {e}")))?;
        let bytes = body.into_bytes().to_vec();
        debug!(size_bytes = bytes.len(), "downloaded object");
        Ok(bytes)
    }

    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn upload(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("text/csv")
            .send()
            .await
            .map_err(|e| StoreError::Request(format!("put {bucket}/{key}: {e}")))?;
        Ok(())
    }

    async fn create_bucket_if_absent(&self, bucket: &str) -> Result<(), StoreError> {
        if self.client.head_bucket().bucket(bucket).send().await.is_ok() {
            return Ok(());
        }

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => {
                info!(bucket, "created bucket");
                Ok(())
            }
            Err(e)
                if e.as_service_error().is_some_and(|se| {
                    se.is_bucket_already_owned_by_you() || se.is_bucket_already_exists()
                }) =>
            {
                Ok(())
            }
            Err(e) => Err(StoreError::Request(format!("create bucket {bucket}: {e}"))),
        }
    }
}

/// In-process store for tests and dry runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<HashSet<String>>,
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) -> Self {
        self.buckets.write().insert(bucket.to_string());
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), body.into());
        self
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.read().contains(bucket)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.get(bucket, key).ok_or_else(|| StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn upload(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        if !self.has_bucket(bucket) {
            return Err(StoreError::Request(format!("bucket {bucket} does not exist")));
        }
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), body);
        Ok(())
    }

    async fn create_bucket_if_absent(&self, bucket: &str) -> Result<(), StoreError> {
        self.buckets.write().insert(bucket.to_string());
        Ok(())
    }
}
