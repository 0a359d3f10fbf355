use bag_processor::{ProcessingJob, S3Config, S3ObjectStore};
use bagflow::telemetry::{self, LogFormat};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let format = std::env::var("BAGFLOW_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Text);
    if let Err(e) = telemetry::init_tracing(format) {
        eprintln!("tracing init failed: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %format!("{e:#}"), "processing failed");
        // the last stderr line is what the local backend records as the failure
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let job = ProcessingJob::from_args(std::env::args().skip(1))?;
    let job_id = std::env::var("BAGFLOW_JOB_ID").unwrap_or_default();
    let attempt = std::env::var("BAGFLOW_ATTEMPT").unwrap_or_default();
    info!(
        job_id = %job_id,
        attempt = %attempt,
        source_bucket = %job.source_bucket,
        source_key = %job.source_key,
        "processing job started"
    );

    let store = S3ObjectStore::new(&S3Config::from_env()).await;
    job.run(&store).await?;
    Ok(())
}
