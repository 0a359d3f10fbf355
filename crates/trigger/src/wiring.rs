use std::sync::Arc;
use tracing::info;

use bagflow::config::{BackendKind, Config, StoreKind};
use bagflow::db;
use bagflow::jobs::{
    AirflowBackend, ExecutionBackend, JobOutcomeSource, JobTable, LocalProcessBackend,
    MemoryJobTable, PgJobTable,
};

pub async fn build_table(cfg: &Config) -> anyhow::Result<Arc<dyn JobTable>> {
    match &cfg.store {
        StoreKind::Memory => {
            info!("job table: in-memory (single instance only)");
            Ok(Arc::new(MemoryJobTable::new()))
        }
        StoreKind::Postgres { database_url } => {
            let pool = db::make_pool(database_url).await?;
            if cfg.migrate_on_startup {
                db::run_migrations(&pool).await?;
                info!("migrations applied");
            }
            info!("job table: postgres");
            Ok(Arc::new(PgJobTable::new(pool)))
        }
    }
}

pub struct Backends {
    pub backend: Arc<dyn ExecutionBackend>,
    pub outcomes: Option<Arc<dyn JobOutcomeSource>>,
}

/// The same adapter serves as outcome source when polling is on.
pub fn build_backend(cfg: &Config) -> anyhow::Result<Backends> {
    let backends = match cfg.backend {
        BackendKind::Airflow => {
            let airflow = Arc::new(AirflowBackend::new(cfg.airflow.clone())?);
            info!(api = %cfg.airflow.api_url, dag = %cfg.airflow.dag_id, "backend: airflow");
            Backends {
                backend: airflow.clone(),
                outcomes: cfg
                    .poll_outcomes
                    .then(|| airflow as Arc<dyn JobOutcomeSource>),
            }
        }
        BackendKind::Local => {
            let local = Arc::new(LocalProcessBackend::new(cfg.processor_cmd.clone()));
            info!(cmd = %cfg.processor_cmd, "backend: local process");
            Backends {
                backend: local.clone(),
                outcomes: cfg
                    .poll_outcomes
                    .then(|| local as Arc<dyn JobOutcomeSource>),
            }
        }
    };
    Ok(backends)
}
