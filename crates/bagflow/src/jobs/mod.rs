pub mod airflow;
pub mod backend;
pub mod builder;
pub mod dispatcher;
pub mod error_codes;
pub mod local;
pub mod locks;
pub mod maintenance;
pub mod model;
pub mod pg_table;
pub mod retry;
pub mod table;

pub use airflow::{AirflowBackend, AirflowConfig};
pub use backend::{ExecutionBackend, JobOutcomeSource, RunState};
pub use builder::{BuilderConfig, JobRequestBuilder};
pub use dispatcher::{
    Dispatcher, DispatcherConfig, JobResult, MaintenanceReport, ReportAck, SubmitOutcome,
};
pub use local::LocalProcessBackend;
pub use model::{JobRecord, JobRequest, JobStatus};
pub use pg_table::PgJobTable;
pub use table::{JobTable, MemoryJobTable};
