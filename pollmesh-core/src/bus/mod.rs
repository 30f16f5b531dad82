/**
 * MESSAGE BUS - publish/subscribe boundary of the pipeline
 *
 * ROLE:
 * Two channels only. The job queue carries `PollJob`s from the controller to
 * exactly one worker each; the telemetry channel fans every
 * `StatisticMessage` out to all subscribed sinks.
 *
 * DELIVERY:
 * At-least-once, no ordering across jobs. Payloads that fail to decode are
 * logged and dropped at the adapter; subscribers only see typed values.
 * A subscription that ends means the bus is gone (`BusUnavailable`).
 */

pub mod memory;
pub mod mqtt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::Result;
use crate::models::{PollJob, StatisticMessage};

pub use memory::MemoryBus;
pub use mqtt::MqttBus;

pub const JOBS_TOPIC: &str = "pollmesh/jobs@v1";
pub const STATS_TOPIC: &str = "pollmesh/stats@v1";

pub type Subscription<T> = mpsc::Receiver<T>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_job(&self, job: &PollJob) -> Result<()>;

    async fn consume_jobs(&self) -> Result<Subscription<PollJob>>;

    async fn publish_telemetry(&self, msg: &StatisticMessage) -> Result<()>;

    async fn consume_telemetry(&self) -> Result<Subscription<StatisticMessage>>;

    /// Waits until everything published so far has left the process.
    async fn flush(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// Decodes a payload, logging and discarding it when malformed.
pub(crate) fn decode<T: DeserializeOwned>(topic: &str, payload: &[u8]) -> Option<T> {
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(topic, bytes = payload.len(), error = %e, "dropping undecodable payload");
            None
        }
    }
}

/// Topic name without its `$share/<group>/` prefix.
pub fn base_topic(filter: &str) -> &str {
    match filter.strip_prefix("$share/") {
        Some(rest) => rest.split_once('/').map(|(_, topic)| topic).unwrap_or(rest),
        None => filter,
    }
}
