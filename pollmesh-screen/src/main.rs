/**
 * POLLMESH SCREEN - telemetry sink
 *
 * ROLE: subscribes to the telemetry channel (fan-out, every screen sees
 * every message) and prints each StatisticMessage as pretty JSON.
 *
 * No storage: this is the reference consumer for debugging a deployment.
 */

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pollmesh_core::{load_config, MessageBus, MqttBus, StatisticMessage};

/// Pretty JSON exactly as it travelled on the wire.
fn render(msg: &StatisticMessage) -> serde_json::Result<String> {
    serde_json::to_string_pretty(msg)
}

async fn screen(bus: &dyn MessageBus) -> Result<u64> {
    let mut telemetry = bus.consume_telemetry().await.context("Telemetry subscription failed")?;
    info!("waiting for telemetry");

    let mut seen = 0u64;
    while let Some(msg) = telemetry.recv().await {
        seen += 1;
        match render(&msg) {
            Ok(pretty) => info!(
                host = %msg.hostname,
                module = %msg.polling_module,
                records = msg.records.len(),
                fields = msg.field_count(),
                "statistic message\n{pretty}"
            ),
            Err(e) => warn!(host = %msg.hostname, error = %e, "cannot render message"),
        }
    }
    Ok(seen)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config().await.context("Failed to load configuration")?;
    let bus = MqttBus::connect(&config.mqtt, "screen");

    tokio::select! {
        seen = screen(&bus) => {
            let seen = seen?;
            anyhow::bail!("telemetry subscription closed after {seen} messages");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }
    Ok(())
}
