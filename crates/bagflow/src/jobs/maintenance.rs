use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::jobs::dispatcher::{Dispatcher, MaintenanceReport};

/// Periodic dispatcher upkeep: timeout sweep, retry recovery, outcome polling
/// and eviction. Returns when `shutdown` fires.
pub async fn run(dispatcher: Dispatcher, interval: Duration, shutdown: CancellationToken) {
    let interval = interval.max(Duration::from_millis(100));
    info!(interval_ms = interval.as_millis() as u64, "maintenance loop started");

    loop {
        match dispatcher.run_maintenance().await {
            Ok(report) => log_report(&report),
            // the table is down; next tick tries again
            Err(e) => warn!(error = %e, "maintenance pass failed"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("maintenance loop stopped");
}

fn log_report(report: &MaintenanceReport) {
    if *report == MaintenanceReport::default() {
        debug!("maintenance pass: nothing to do");
        return;
    }
    info!(
        timed_out = report.timed_out,
        retried = report.retried,
        polled = report.polled,
        evicted = report.evicted,
        "maintenance pass"
    );
}
