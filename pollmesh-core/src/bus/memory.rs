//! In-process bus: a single job queue plus a broadcast telemetry channel.
//!
//! Every message goes through its JSON encoding on the way, so consumers see
//! exactly what a broker would have delivered. Published messages are also
//! recorded for assertions.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

use super::{decode, MessageBus, Subscription, JOBS_TOPIC, STATS_TOPIC};
use crate::error::{PollError, Result};
use crate::models::{PollJob, StatisticMessage};

pub struct MemoryBus {
    jobs_tx: Mutex<Option<mpsc::Sender<PollJob>>>,
    jobs_rx: Mutex<Option<mpsc::Receiver<PollJob>>>,
    telemetry_tx: Mutex<Option<broadcast::Sender<StatisticMessage>>>,
    published_jobs: Mutex<Vec<PollJob>>,
    published_telemetry: Mutex<Vec<StatisticMessage>>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (jobs_tx, jobs_rx) = mpsc::channel(capacity);
        let (telemetry_tx, _) = broadcast::channel(capacity);
        Self {
            jobs_tx: Mutex::new(Some(jobs_tx)),
            jobs_rx: Mutex::new(Some(jobs_rx)),
            telemetry_tx: Mutex::new(Some(telemetry_tx)),
            published_jobs: Mutex::new(Vec::new()),
            published_telemetry: Mutex::new(Vec::new()),
        }
    }

    /// Simulates the broker going away: subscriptions end once drained.
    pub fn close(&self) {
        self.jobs_tx.lock().take();
        self.telemetry_tx.lock().take();
    }

    pub fn published_jobs(&self) -> Vec<PollJob> {
        self.published_jobs.lock().clone()
    }

    pub fn published_telemetry(&self) -> Vec<StatisticMessage> {
        self.published_telemetry.lock().clone()
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(256)
    }
}

fn through_wire<T>(topic: &str, value: &T) -> Result<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let payload = serde_json::to_vec(value)?;
    decode(topic, &payload).ok_or_else(|| PollError::Publish {
        topic: topic.to_string(),
        reason: "payload does not decode".into(),
    })
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish_job(&self, job: &PollJob) -> Result<()> {
        let sender = self
            .jobs_tx
            .lock()
            .clone()
            .ok_or_else(|| PollError::BusUnavailable("job queue closed".into()))?;
        let delivered = through_wire(JOBS_TOPIC, job)?;
        self.published_jobs.lock().push(delivered.clone());
        sender
            .send(delivered)
            .await
            .map_err(|_| PollError::BusUnavailable("job queue has no consumer".into()))
    }

    async fn consume_jobs(&self) -> Result<Subscription<PollJob>> {
        self.jobs_rx
            .lock()
            .take()
            .ok_or_else(|| PollError::BusUnavailable("job queue already consumed".into()))
    }

    async fn publish_telemetry(&self, msg: &StatisticMessage) -> Result<()> {
        let sender = self
            .telemetry_tx
            .lock()
            .clone()
            .ok_or_else(|| PollError::BusUnavailable("telemetry channel closed".into()))?;
        let delivered = through_wire(STATS_TOPIC, msg)?;
        self.published_telemetry.lock().push(delivered.clone());
        // Fan-out: having no subscriber is not an error.
        let _ = sender.send(delivered);
        Ok(())
    }

    async fn consume_telemetry(&self) -> Result<Subscription<StatisticMessage>> {
        let mut source = self
            .telemetry_tx
            .lock()
            .as_ref()
            .map(|tx| tx.subscribe())
            .ok_or_else(|| PollError::BusUnavailable("telemetry channel closed".into()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "telemetry subscriber lagging");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }
}
