pub mod job;
pub mod store;
pub mod transform;

pub use job::{JobArgsError, ProcessError, ProcessingJob, RunSummary};
pub use store::{MemoryObjectStore, ObjectStore, S3Config, S3ObjectStore, StoreError};
pub use transform::{transform, TransformError};
