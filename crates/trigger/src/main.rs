use bagflow::api;
use bagflow::config::Config;
use bagflow::events::NotificationFilter;
use bagflow::jobs::{maintenance, Dispatcher, JobRequestBuilder};
use bagflow::telemetry;
use bagflow::trigger::TriggerService;

use tokio_util::sync::CancellationToken;
use tracing::info;

mod wiring;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env()?;
    telemetry::init_tracing(cfg.log_format)?;

    info!(
        listen = %cfg.listen_addr,
        raw_bucket = %cfg.filter.raw_bucket,
        processed_bucket = %cfg.builder.dest_bucket,
        suffix = %cfg.filter.suffix,
        max_attempts = cfg.dispatcher.max_attempts,
        max_concurrent_submits = cfg.dispatcher.max_concurrent_submits,
        "bagflow trigger starting"
    );

    let table = wiring::build_table(&cfg).await?;
    let backends = wiring::build_backend(&cfg)?;

    let dispatcher = Dispatcher::new(
        table,
        backends.backend,
        backends.outcomes,
        cfg.dispatcher.clone(),
    );
    let trigger = TriggerService::new(
        NotificationFilter::new(cfg.filter.clone()),
        JobRequestBuilder::new(cfg.builder.clone()),
        dispatcher.clone(),
    );

    let shutdown = CancellationToken::new();

    // ---- API task ----
    let app = api::router(api::ApiState::new(trigger));
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    info!("trigger api listening on http://{}", cfg.listen_addr);
    let api_shutdown = shutdown.clone();
    let mut api_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { api_shutdown.cancelled().await })
            .await?;
        Ok::<(), anyhow::Error>(())
    });

    // ---- Maintenance task ----
    let maintenance_handle = tokio::spawn(maintenance::run(
        dispatcher.clone(),
        cfg.maintenance_interval,
        shutdown.clone(),
    ));

    let api_result = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("shutdown requested");
            None
        }
        res = &mut api_handle => Some(res),
    };

    shutdown.cancel();
    dispatcher.shutdown();
    match api_result {
        Some(res) => res??,
        None => api_handle.await??,
    }
    maintenance_handle.await?;

    info!("bagflow trigger stopped");
    Ok(())
}
