/**
 * POLLMESH CONTROLLER - one polling pass over the device inventory
 *
 * ROLE: loads config, capability definitions and the inventory, turns every
 * (device, enabled module) into a PollJob and publishes it on the job queue.
 *
 * ARCHITECTURE: run-once process, scheduled externally (cron/systemd timer).
 * Exit status is non-zero when the pass was aborted or the bus was lost.
 */

mod inventory;
mod pass;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pollmesh_core::capabilities::FileDefinitionStore;
use pollmesh_core::{load_config, CapabilityResolver, JobProducer, MessageBus, MqttBus};

use crate::inventory::FileInventory;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config().await.context("Failed to load configuration")?;
    let resolver = CapabilityResolver::new(FileDefinitionStore::new(&config.capabilities.definitions_dir));

    let inventory = FileInventory::new(&config.inventory.path);
    let rows = inventory.read().await?;
    info!(
        inventory = %inventory.path().display(),
        definitions = %config.capabilities.definitions_dir.display(),
        modules = ?config.poller_modules.keys().collect::<Vec<_>>(),
        "starting pass"
    );

    let bus = MqttBus::connect(&config.mqtt, "controller");
    let producer = JobProducer::new(&config.poller_modules, &resolver)
        .with_fallback(config.capabilities.on_missing)
        .with_issue_time(Utc::now().timestamp());

    let report = pass::dispatch(&bus, producer, rows)
        .await
        .context("Job publication stopped")?;
    bus.flush(FLUSH_TIMEOUT).await.context("Jobs not acknowledged by broker")?;
    pass::log_report(&report);
    info!(definitions_cached = resolver.cached(), "controller done");

    if let Some(reason) = report.abort_reason {
        bail!("pass aborted: {reason}");
    }
    Ok(())
}
