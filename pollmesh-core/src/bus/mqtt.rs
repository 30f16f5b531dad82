//! MQTT transport (rumqttc)
//!
//! One `AsyncClient` per process. A background task polls the event loop,
//! re-subscribes after each (re)connection and counts PubAcks so `flush` can
//! wait for QoS 1 delivery. Incoming publishes go through an unbounded queue
//! to a second task that routes them to subscribers; the event loop never
//! waits on a full subscriber.
//! After `max_reconnect_attempts` consecutive connection errors every
//! subscription is closed and publishing fails with `BusUnavailable`.

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, Incoming, MqttOptions, Outgoing, Publish, QoS};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{base_topic, decode, MessageBus, Subscription, JOBS_TOPIC, STATS_TOPIC};
use crate::config::MqttConf;
use crate::error::{PollError, Result};
use crate::models::{PollJob, StatisticMessage};

#[derive(Default)]
struct Routes {
    filters: Vec<String>,
    jobs: Vec<mpsc::Sender<PollJob>>,
    telemetry: Vec<mpsc::Sender<StatisticMessage>>,
}

#[derive(Default)]
struct LinkState {
    published: AtomicU64,
    acked: AtomicU64,
    reconnects: AtomicU64,
    closed: AtomicBool,
}

pub struct MqttBus {
    client: AsyncClient,
    routes: Arc<Mutex<Routes>>,
    link: Arc<LinkState>,
    share_group: Option<String>,
    capacity: usize,
}

impl MqttBus {
    /// Creates the client and spawns its event loop. `role` ends up in the
    /// client id when none is configured.
    pub fn connect(conf: &MqttConf, role: &str) -> Self {
        let client_id = conf.client_id.clone().unwrap_or_else(|| {
            let suffix = Uuid::new_v4().simple().to_string();
            format!("pollmesh-{role}-{}", &suffix[..8])
        });

        let mut opts = MqttOptions::new(&client_id, &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(conf.keep_alive_secs));
        opts.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(opts, conf.channel_capacity);
        let routes = Arc::new(Mutex::new(Routes::default()));
        let link = Arc::new(LinkState::default());

        info!(client_id = %client_id, host = %conf.host, port = conf.port, "connecting to MQTT broker");
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(route(inbound_rx, routes.clone()));
        tokio::spawn(drive(
            eventloop,
            client.clone(),
            routes.clone(),
            inbound_tx,
            link.clone(),
            conf.max_reconnect_attempts,
        ));

        Self {
            client,
            routes,
            link,
            share_group: conf.share_group.clone(),
            capacity: conf.channel_capacity,
        }
    }

    pub fn reconnects(&self) -> u64 {
        self.link.reconnects.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.link.closed.load(Ordering::Acquire) {
            return Err(PollError::BusUnavailable("MQTT link closed".into()));
        }
        Ok(())
    }

    async fn subscribe(&self, filter: String) -> Result<()> {
        self.routes.lock().filters.push(filter.clone());
        self.client
            .subscribe(filter.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| PollError::BusUnavailable(format!("subscribe {filter}: {e}")))?;
        info!(filter = %filter, "subscribed");
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        self.ensure_open()?;
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| PollError::Publish { topic: topic.to_string(), reason: e.to_string() })?;
        self.link.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish_job(&self, job: &PollJob) -> Result<()> {
        let payload = serde_json::to_vec(job)?;
        self.publish(JOBS_TOPIC, payload).await
    }

    async fn consume_jobs(&self) -> Result<Subscription<PollJob>> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel(self.capacity);
        self.routes.lock().jobs.push(tx);
        let filter = match &self.share_group {
            Some(group) => format!("$share/{group}/{JOBS_TOPIC}"),
            None => JOBS_TOPIC.to_string(),
        };
        self.subscribe(filter).await?;
        Ok(rx)
    }

    async fn publish_telemetry(&self, msg: &StatisticMessage) -> Result<()> {
        let payload = serde_json::to_vec(msg)?;
        self.publish(STATS_TOPIC, payload).await
    }

    async fn consume_telemetry(&self) -> Result<Subscription<StatisticMessage>> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::channel(self.capacity);
        self.routes.lock().telemetry.push(tx);
        self.subscribe(STATS_TOPIC.to_string()).await?;
        Ok(rx)
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_open()?;
            let published = self.link.published.load(Ordering::Relaxed);
            let acked = self.link.acked.load(Ordering::Relaxed);
            if acked >= published {
                break;
            }
            if Instant::now() >= deadline {
                return Err(PollError::Publish {
                    topic: "*".into(),
                    reason: format!("{} of {published} messages unacknowledged", published - acked),
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect after flush failed");
        }
        Ok(())
    }
}

async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    routes: Arc<Mutex<Routes>>,
    inbound: mpsc::UnboundedSender<Publish>,
    link: Arc<LinkState>,
    max_failures: u32,
) {
    let mut failures = 0u32;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                if failures > 0 {
                    link.reconnects.fetch_add(1, Ordering::Relaxed);
                    info!(after = failures, "MQTT reconnected");
                }
                failures = 0;
                // Clean session: the broker forgot our filters.
                let filters = routes.lock().filters.clone();
                for filter in filters {
                    if let Err(e) = client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                        warn!(filter = %filter, error = %e, "re-subscribe failed");
                    }
                }
            }
            Ok(Event::Incoming(Incoming::PubAck(_))) => {
                link.acked.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Event::Incoming(Incoming::Publish(p))) => {
                if inbound.send(p).is_err() {
                    debug!("router gone, publish dropped");
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect requested");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                failures += 1;
                error!(attempt = failures, max = max_failures, error = %e, "MQTT connection error");
                if failures >= max_failures {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }

    // The router drains what is queued, then ends every subscription.
    link.closed.store(true, Ordering::Release);
    if failures >= max_failures {
        error!("MQTT link given up, subscriptions closed");
    }
}

/// Delivers queued publishes in arrival order. Waiting on a full subscriber
/// only holds up this task.
async fn route(mut inbound: mpsc::UnboundedReceiver<Publish>, routes: Arc<Mutex<Routes>>) {
    while let Some(p) = inbound.recv().await {
        dispatch(&routes, base_topic(&p.topic), &p.payload).await;
    }
    // Dropping the senders ends every subscription.
    let mut routes = routes.lock();
    routes.jobs.clear();
    routes.telemetry.clear();
}

async fn dispatch(routes: &Mutex<Routes>, topic: &str, payload: &[u8]) {
    match topic {
        JOBS_TOPIC => {
            let Some(job) = decode::<PollJob>(topic, payload) else { return };
            let senders = routes.lock().jobs.clone();
            for tx in senders {
                if tx.send(job.clone()).await.is_err() {
                    debug!("job subscriber gone");
                }
            }
        }
        STATS_TOPIC => {
            let Some(msg) = decode::<StatisticMessage>(topic, payload) else { return };
            let senders = routes.lock().telemetry.clone();
            for tx in senders {
                if tx.send(msg.clone()).await.is_err() {
                    debug!("telemetry subscriber gone");
                }
            }
        }
        other => debug!(topic = other, "ignoring publish on unrouted topic"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProtocolParams;

    fn job_publish(host: &str) -> Publish {
        let job = PollJob {
            hostname: host.into(),
            issued_at: 0,
            snmp: ProtocolParams {
                community: "public".into(),
                version: "2c".into(),
                port: 161,
                ip: "10.0.0.1".into(),
                transport: "udp".into(),
            },
            polling_module: "ports".into(),
        };
        Publish::new(
            format!("$share/workers/{JOBS_TOPIC}"),
            QoS::AtLeastOnce,
            serde_json::to_vec(&job).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_router_queues_past_full_subscriber() {
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (job_tx, mut jobs) = mpsc::channel(1);
        routes.lock().jobs.push(job_tx);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route(inbound_rx, routes.clone()));

        // Nobody is reading yet; queuing must never block the sender.
        for n in 0..5 {
            inbound_tx.send(job_publish(&format!("sw{n}"))).unwrap();
        }
        drop(inbound_tx);

        let mut hosts = Vec::new();
        while let Some(job) = jobs.recv().await {
            hosts.push(job.hostname);
        }
        assert_eq!(hosts, vec!["sw0", "sw1", "sw2", "sw3", "sw4"]);
        router.await.unwrap();
        assert!(routes.lock().jobs.is_empty());
    }

    #[tokio::test]
    async fn test_router_drops_undecodable_and_unrouted() {
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (job_tx, mut jobs) = mpsc::channel(4);
        routes.lock().jobs.push(job_tx);

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route(inbound_rx, routes));
        inbound_tx.send(Publish::new(JOBS_TOPIC, QoS::AtLeastOnce, b"{oops".to_vec())).unwrap();
        inbound_tx.send(Publish::new("other/topic", QoS::AtLeastOnce, b"{}".to_vec())).unwrap();
        inbound_tx.send(job_publish("sw9")).unwrap();
        drop(inbound_tx);

        assert_eq!(jobs.recv().await.unwrap().hostname, "sw9");
        assert!(jobs.recv().await.is_none());
        router.await.unwrap();
    }
}
