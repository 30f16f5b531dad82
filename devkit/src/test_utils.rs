/*!
Test harness for pollmesh pipelines

- In-memory bus with a worker pool already consuming jobs
- Scripted walker instead of devices
- Producer passes published straight onto the bus
- Waiting/asserting on telemetry with timeouts
*/

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::info;

use pollmesh_core::bus::Subscription;
use pollmesh_core::producer::PassSummary;
use pollmesh_core::worker::StatsSnapshot;
use pollmesh_core::{InventoryRow, JobProducer, MemoryBus, MessageBus, PollError, PollJob, PollWorker, StatisticMessage};

use crate::walker_stub::ScriptedWalker;

pub const DEFAULT_CONCURRENCY: usize = 4;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Installs a test-writer subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

pub struct TestHarness {
    pub bus: Arc<MemoryBus>,
    pub walker: ScriptedWalker,
    worker: Arc<PollWorker>,
    telemetry: Subscription<StatisticMessage>,
    handle: JoinHandle<pollmesh_core::Result<()>>,
}

impl TestHarness {
    pub async fn start(walker: ScriptedWalker) -> Result<Self> {
        Self::start_with(walker, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT).await
    }

    /// Subscribes to telemetry first, then spawns the worker pool, so no
    /// message can be missed.
    pub async fn start_with(walker: ScriptedWalker, concurrency: usize, session_timeout: Duration) -> Result<Self> {
        init_tracing();
        let bus = Arc::new(MemoryBus::default());
        let telemetry = bus.consume_telemetry().await.context("telemetry subscription")?;

        let worker = Arc::new(PollWorker::new(Arc::new(walker.clone()), session_timeout));
        let handle = tokio::spawn(worker.clone().run(bus.clone(), concurrency));
        info!(concurrency, "test harness started");

        Ok(Self {
            bus,
            walker,
            worker,
            telemetry,
            handle,
        })
    }

    pub async fn submit(&self, job: &PollJob) -> Result<()> {
        self.bus.publish_job(job).await?;
        Ok(())
    }

    /// Runs one producer pass and publishes every job it yields. A fatal
    /// pass error stops publication; the summary says so.
    pub async fn publish_pass<I>(&self, producer: JobProducer<'_>, rows: I) -> Result<PassSummary>
    where
        I: IntoIterator<Item = pollmesh_core::Result<InventoryRow>>,
    {
        let mut jobs = producer.produce(rows);
        while let Some(next) = jobs.next() {
            match next {
                Ok(job) => self.bus.publish_job(&job).await?,
                Err(e) => info!(error = %e, "pass ended early"),
            }
        }
        Ok(jobs.into_summary())
    }

    pub async fn wait_for_telemetry(&mut self, within: Duration) -> Option<StatisticMessage> {
        timeout(within, self.telemetry.recv()).await.ok().flatten()
    }

    /// Collects exactly `count` messages or fails.
    pub async fn collect_telemetry(&mut self, count: usize, within: Duration) -> Result<Vec<StatisticMessage>> {
        let mut messages = Vec::with_capacity(count);
        for n in 0..count {
            match self.wait_for_telemetry(within).await {
                Some(msg) => messages.push(msg),
                None => bail!("timed out waiting for telemetry message {} of {count}", n + 1),
            }
        }
        Ok(messages)
    }

    /// Fails if any telemetry arrives within `within`.
    pub async fn expect_no_telemetry(&mut self, within: Duration) -> Result<()> {
        if let Some(msg) = self.wait_for_telemetry(within).await {
            bail!("unexpected telemetry from {} ({})", msg.hostname, msg.polling_module);
        }
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.worker.stats().snapshot()
    }

    /// Waits until the worker has finished `jobs` jobs, whatever their outcome.
    pub async fn wait_for_outcomes(&self, jobs: u64, within: Duration) -> Result<StatsSnapshot> {
        let settled = timeout(within, async {
            loop {
                let s = self.stats();
                if s.completed + s.session_failures + s.walk_failures + s.publish_failures + s.unsupported + s.dropped
                    >= jobs {
                    return s;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        settled.with_context(|| format!("worker did not settle {jobs} jobs"))
    }

    /// Closes the bus and waits for the pool to drain.
    pub async fn shutdown(self) -> Result<StatsSnapshot> {
        self.bus.close();
        match self.handle.await? {
            Err(PollError::BusUnavailable(_)) => {}
            other => bail!("worker ended unexpectedly: {other:?}"),
        }
        Ok(self.worker.stats().snapshot())
    }
}
