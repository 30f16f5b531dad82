//! Pollmesh Worker - executes poll jobs from the shared job queue
//!
//! - Competes with other workers for jobs (MQTT shared subscription)
//! - Bulk-walks each job's module subtree via net-snmp
//! - Publishes one telemetry message per successful job
//! - Logs per-outcome job counters periodically

mod command;
mod output;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pollmesh_core::{load_config, MessageBus, MqttBus, PollWorker, WorkerStats};

use command::CommandWalker;

fn report_stats(stats: Arc<WorkerStats>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let s = stats.snapshot();
            info!(
                completed = s.completed,
                session_failures = s.session_failures,
                walk_failures = s.walk_failures,
                publish_failures = s.publish_failures,
                unsupported = s.unsupported,
                dropped = s.dropped,
                "worker stats"
            );
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("pollmesh worker starting");
    let config = load_config().await.context("Failed to load configuration")?;

    let bus: Arc<dyn MessageBus> = Arc::new(MqttBus::connect(&config.mqtt, "worker"));
    let walker = Arc::new(CommandWalker::new(&config.walk));
    let worker = Arc::new(PollWorker::new(walker, config.walk.timeout()));

    if config.workers.stats_interval_secs > 0 {
        report_stats(worker.stats(), Duration::from_secs(config.workers.stats_interval_secs));
    }

    tokio::select! {
        result = worker.clone().run(bus, config.workers.concurrency) => {
            result.context("Job consumption stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }

    let s = worker.stats().snapshot();
    info!(completed = s.completed, "pollmesh worker stopped");
    Ok(())
}
