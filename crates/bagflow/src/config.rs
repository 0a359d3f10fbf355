use std::time::Duration;

use crate::events::FilterConfig;
use crate::jobs::airflow::AirflowConfig;
use crate::jobs::builder::BuilderConfig;
use crate::jobs::dispatcher::DispatcherConfig;
use crate::jobs::retry::RetryConfig;
use crate::telemetry::LogFormat;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Memory,
    Postgres { database_url: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Airflow,
    Local,
}

/// Runtime configuration for the trigger process, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub listen_addr: String,
    pub filter: FilterConfig,
    pub builder: BuilderConfig,
    pub dispatcher: DispatcherConfig,
    pub maintenance_interval: Duration,
    pub store: StoreKind,
    pub migrate_on_startup: bool,
    pub backend: BackendKind,
    pub airflow: AirflowConfig,
    pub processor_cmd: String,
    pub poll_outcomes: bool,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process environment.
    pub fn from_source(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let env = Env { lookup: &lookup };

        let listen_addr = env
            .either("BAGFLOW_LISTEN_ADDR", "LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:5000".to_string());

        let raw_bucket = env
            .get("BAGFLOW_RAW_BUCKET")
            .unwrap_or_else(|| "raw-data".to_string());
        let suffix = env
            .get("BAGFLOW_SOURCE_SUFFIX")
            .unwrap_or_else(|| ".mcap".to_string());
        let filter = FilterConfig {
            raw_bucket,
            suffix: suffix.clone(),
            key_prefix: env.get("BAGFLOW_KEY_PREFIX"),
            event_prefixes: env
                .get("BAGFLOW_EVENT_PREFIXES")
                .map(|s| split_list(&s))
                .unwrap_or_default(),
        };

        let builder = BuilderConfig {
            dest_bucket: env
                .get("BAGFLOW_PROCESSED_BUCKET")
                .unwrap_or_else(|| "processed-data".to_string()),
            source_extension: suffix,
            dest_extension: env
                .get("BAGFLOW_DEST_EXTENSION")
                .unwrap_or_else(|| ".csv".to_string()),
            include_content_version: env.bool("BAGFLOW_JOB_ID_INCLUDES_VERSION")?.unwrap_or(false),
        };

        let dispatcher = DispatcherConfig {
            max_attempts: env.parse("BAGFLOW_MAX_ATTEMPTS")?.unwrap_or(3),
            retry: RetryConfig {
                base: Duration::from_millis(env.parse("BAGFLOW_RETRY_BASE_MS")?.unwrap_or(30_000)),
                max: Duration::from_millis(env.parse("BAGFLOW_RETRY_MAX_MS")?.unwrap_or(900_000)),
                jitter_pct: env.parse("BAGFLOW_RETRY_JITTER_PCT")?.unwrap_or(0.2),
            },
            running_timeout: Duration::from_secs(
                env.parse("BAGFLOW_RUNNING_TIMEOUT_SECS")?.unwrap_or(3600),
            ),
            dedup_window: Duration::from_secs(
                env.parse("BAGFLOW_DEDUP_WINDOW_SECS")?.unwrap_or(86_400),
            ),
            max_concurrent_submits: env.parse("BAGFLOW_MAX_CONCURRENT_SUBMITS")?.unwrap_or(3),
            ..DispatcherConfig::default()
        };

        let maintenance_interval = Duration::from_secs(
            env.parse("BAGFLOW_MAINTENANCE_INTERVAL_SECS")?.unwrap_or(15),
        );

        let store = match env
            .get("BAGFLOW_STORE")
            .unwrap_or_else(|| "memory".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreKind::Memory,
            "postgres" => StoreKind::Postgres {
                database_url: env.get("DATABASE_URL").ok_or_else(|| {
                    anyhow::anyhow!("DATABASE_URL is missing (required by BAGFLOW_STORE=postgres)")
                })?,
            },
            other => anyhow::bail!("BAGFLOW_STORE must be memory or postgres, got {other}"),
        };

        let backend = match env
            .get("BAGFLOW_BACKEND")
            .unwrap_or_else(|| "airflow".to_string())
            .to_lowercase()
            .as_str()
        {
            "airflow" => BackendKind::Airflow,
            "local" => BackendKind::Local,
            other => anyhow::bail!("BAGFLOW_BACKEND must be airflow or local, got {other}"),
        };

        let defaults = AirflowConfig::default();
        let airflow = AirflowConfig {
            api_url: env
                .either("BAGFLOW_AIRFLOW_API_URL", "AIRFLOW_API_URL")
                .unwrap_or(defaults.api_url),
            username: env
                .either("BAGFLOW_AIRFLOW_USER", "AIRFLOW_USER")
                .unwrap_or(defaults.username),
            password: env
                .either("BAGFLOW_AIRFLOW_PASSWORD", "AIRFLOW_PASSWORD")
                .unwrap_or(defaults.password),
            dag_id: env
                .either("BAGFLOW_AIRFLOW_DAG_ID", "AIRFLOW_DAG_ID")
                .unwrap_or(defaults.dag_id),
            timeout: env
                .parse::<u64>("AIRFLOW_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        };

        let log_format = match env.get("BAGFLOW_LOG_FORMAT") {
            Some(s) => s.parse().map_err(anyhow::Error::msg)?,
            None => LogFormat::Text,
        };

        let cfg = Self {
            listen_addr,
            filter,
            builder,
            dispatcher,
            maintenance_interval,
            store,
            migrate_on_startup: env.bool("BAGFLOW_MIGRATE_ON_STARTUP")?.unwrap_or(false),
            backend,
            airflow,
            processor_cmd: env
                .get("BAGFLOW_PROCESSOR_CMD")
                .unwrap_or_else(|| "bag-processor".to_string()),
            poll_outcomes: env.bool("BAGFLOW_POLL_OUTCOMES")?.unwrap_or(true),
            log_format,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.filter.raw_bucket.trim().is_empty() {
            anyhow::bail!("BAGFLOW_RAW_BUCKET must not be empty");
        }
        if self.filter.suffix.trim().is_empty() {
            anyhow::bail!("BAGFLOW_SOURCE_SUFFIX must not be empty");
        }
        if self.builder.dest_bucket.trim().is_empty() {
            anyhow::bail!("BAGFLOW_PROCESSED_BUCKET must not be empty");
        }
        if self.dispatcher.max_attempts == 0 {
            anyhow::bail!("BAGFLOW_MAX_ATTEMPTS must be > 0");
        }
        if self.dispatcher.max_concurrent_submits == 0 {
            anyhow::bail!("BAGFLOW_MAX_CONCURRENT_SUBMITS must be > 0");
        }
        let retry = &self.dispatcher.retry;
        if !(0.0..=1.0).contains(&retry.jitter_pct) {
            anyhow::bail!("BAGFLOW_RETRY_JITTER_PCT must be within 0..=1");
        }
        if retry.base > retry.max {
            anyhow::bail!("BAGFLOW_RETRY_BASE_MS must not exceed BAGFLOW_RETRY_MAX_MS");
        }
        Ok(())
    }
}

struct Env<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Env<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn either(&self, primary: &str, fallback: &str) -> Option<String> {
        self.get(primary).or_else(|| self.get(fallback))
    }

    fn parse<T>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|s| {
                s.parse::<T>()
                    .map_err(|e| anyhow::anyhow!("{key}={s} is invalid: {e}"))
            })
            .transpose()
    }

    fn bool(&self, key: &str) -> anyhow::Result<Option<bool>> {
        self.get(key)
            .map(|v| match v.to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                other => Err(anyhow::anyhow!("{key}={other} is not a boolean")),
            })
            .transpose()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
