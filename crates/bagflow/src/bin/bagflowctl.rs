use bagflow::db;
use bagflow::events::model::sample_notification;
use bagflow::jobs::builder::job_id_for;
use bagflow::jobs::error_codes::ErrorCode;
use bagflow::jobs::{JobRecord, JobStatus, JobTable, PgJobTable};
use chrono::Utc;
use std::env;

const USAGE: &str = "bagflowctl <command>\n\
Commands:\n\
- reset\n\
- show <job_id>\n\
- list <status> [limit]\n\
- abandon <job_id>\n\
- job-id <bucket> <key>\n\
- event <bucket> <key>\n\
\n\
Table commands use DATABASE_URL or TEST_DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    let Some(command) = args.get(1) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    // offline helpers first; they need no database
    match command.as_str() {
        "job-id" => {
            let (bucket, key) = two_args(&args, "job-id <bucket> <key>")?;
            println!("{}", job_id_for(bucket, key, None));
            return Ok(());
        }
        "event" => {
            let (bucket, key) = two_args(&args, "event <bucket> <key>")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&sample_notification(bucket, key))?
            );
            return Ok(());
        }
        _ => {}
    }

    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("DATABASE_URL or TEST_DATABASE_URL must be set"))?;
    let pool = db::make_pool(&url).await?;
    db::run_migrations(&pool).await?;
    let table = PgJobTable::new(pool.clone());

    match command.as_str() {
        "reset" => {
            sqlx::query("TRUNCATE TABLE job_records")
                .execute(&pool)
                .await?;
            println!("reset OK");
        }
        "show" => {
            let job_id = one_arg(&args, "show <job_id>")?;
            match table.get(job_id).await? {
                Some(record) => print_record(&record),
                None => println!("job {job_id} not found"),
            }
        }
        "list" => {
            let status: JobStatus = one_arg(&args, "list <status> [limit]")?
                .parse()
                .map_err(anyhow::Error::msg)?;
            let limit: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(50);
            let rows = table.list_by_status(&[status], limit).await?;
            for r in &rows {
                println!(
                    "{}  {:<10} attempt={}/{}  {}/{}  updated={}",
                    r.job_id,
                    r.status,
                    r.attempt,
                    r.max_attempts,
                    r.source_bucket,
                    r.source_key,
                    r.updated_at.to_rfc3339()
                );
            }
            println!("{} job(s)", rows.len());
        }
        "abandon" => {
            let job_id = one_arg(&args, "abandon <job_id>")?;
            abandon(&table, job_id).await?;
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

/// Version-checked write, so a concurrent trigger transition wins and we report it.
async fn abandon(table: &PgJobTable, job_id: &str) -> anyhow::Result<()> {
    let Some(current) = table.get(job_id).await? else {
        println!("job {job_id} not found");
        return Ok(());
    };
    if current.status.is_terminal() {
        println!("job {job_id} already {}", current.status);
        return Ok(());
    }

    let mut next = current.clone();
    next.status = JobStatus::Abandoned;
    next.last_error = Some(ErrorCode::ManualAbandon.format("abandoned via bagflowctl"));
    next.next_retry_at = None;
    next.version = current.version + 1;
    next.updated_at = Utc::now();

    if table.update(&next, current.version).await? {
        println!("job {job_id} abandoned (was {})", current.status);
    } else {
        println!("job {job_id} changed concurrently; re-run to retry");
    }
    Ok(())
}

fn print_record(r: &JobRecord) {
    println!("job_id:        {}", r.job_id);
    println!("status:        {}", r.status);
    println!("attempt:       {}/{}", r.attempt, r.max_attempts);
    println!("source:        {}/{}", r.source_bucket, r.source_key);
    println!("dest:          {}/{}", r.dest_bucket, r.dest_key);
    if let Some(v) = &r.content_version {
        println!("version:       {v}");
    }
    if let Some(run) = &r.backend_run_id {
        println!("backend run:   {run}");
    }
    if let Some(err) = &r.last_error {
        println!("last error:    {err}");
    }
    if let Some(at) = r.next_retry_at {
        println!("next retry at: {}", at.to_rfc3339());
    }
    println!("updated:       {}", r.updated_at.to_rfc3339());
}

fn one_arg<'a>(args: &'a [String], usage: &str) -> anyhow::Result<&'a str> {
    args.get(2)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("usage: bagflowctl {usage}"))
}

fn two_args<'a>(args: &'a [String], usage: &str) -> anyhow::Result<(&'a str, &'a str)> {
    match (args.get(2), args.get(3)) {
        (Some(a), Some(b)) => Ok((a.as_str(), b.as_str())),
        _ => anyhow::bail!("usage: bagflowctl {usage}"),
    }
}
