//! Poll worker
//!
//! `execute` turns one job into one `StatisticMessage`:
//! open session -> bulk walk -> fold pairs -> stamp completion time.
//! Everything it builds is local to the call, so concurrent jobs cannot see
//! each other's records. `run` pulls jobs from the bus and executes each in
//! its own task, bounded by a semaphore.

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::aggregate::Aggregation;
use crate::bus::MessageBus;
use crate::error::{PollError, Result};
use crate::models::{PollJob, StatisticMessage};
use crate::oids;
use crate::walker::ProtocolWalker;

/// Per-outcome job counters, shared by all tasks of a worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    completed: AtomicU64,
    session_failures: AtomicU64,
    walk_failures: AtomicU64,
    publish_failures: AtomicU64,
    unsupported: AtomicU64,
    /// Anything else: encode errors, bus gone mid-publish.
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub completed: u64,
    pub session_failures: u64,
    pub walk_failures: u64,
    pub publish_failures: u64,
    pub unsupported: u64,
    pub dropped: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            session_failures: self.session_failures.load(Ordering::Relaxed),
            walk_failures: self.walk_failures.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &Result<()>) {
        let counter = match outcome {
            Ok(()) => &self.completed,
            Err(PollError::Session { .. } | PollError::SessionTimeout { .. }) => &self.session_failures,
            Err(PollError::Walk { .. }) => &self.walk_failures,
            Err(PollError::UnsupportedModule(_)) => &self.unsupported,
            Err(PollError::Publish { .. }) => &self.publish_failures,
            Err(_) => &self.dropped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct PollWorker {
    walker: Arc<dyn ProtocolWalker>,
    timeout: Duration,
    stats: Arc<WorkerStats>,
}

impl PollWorker {
    pub fn new(walker: Arc<dyn ProtocolWalker>, timeout: Duration) -> Self {
        Self {
            walker,
            timeout,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Walks the job's module subtree and aggregates the result. A walk error
    /// discards everything collected so far.
    pub async fn execute(&self, job: &PollJob) -> Result<StatisticMessage> {
        let walk = oids::module_walk(&job.polling_module)
            .ok_or_else(|| PollError::UnsupportedModule(job.polling_module.clone()))?;

        let mut session = tokio::time::timeout(self.timeout, self.walker.open(&job.snmp, self.timeout))
            .await
            .map_err(|_| PollError::SessionTimeout {
                target: job.snmp.ip.clone(),
                timeout: self.timeout,
            })??;

        let mut aggregation = Aggregation::new();
        let mut pairs = session.bulk_walk(walk.base);
        while let Some(pair) = pairs.next().await {
            aggregation.insert(pair?);
        }
        drop(pairs);
        drop(session);

        let message = aggregation.finish(job, Utc::now());
        debug!(
            host = %message.hostname,
            module = %message.polling_module,
            indices = message.records.len(),
            fields = message.field_count(),
            "walk aggregated"
        );
        Ok(message)
    }

    /// Executes one job and publishes its message. Failures are logged and
    /// counted here; nothing propagates to other jobs.
    pub async fn process(&self, bus: &dyn MessageBus, job: PollJob) {
        info!(host = %job.hostname, module = %job.polling_module, "polling");
        let outcome = match self.execute(&job).await {
            Ok(message) => bus.publish_telemetry(&message).await,
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(()) => {}
            Err(e @ PollError::Publish { .. }) => warn!(host = %job.hostname, error = %e, "telemetry lost"),
            Err(e) => warn!(host = %job.hostname, module = %job.polling_module, error = %e, "job dropped"),
        }
        self.stats.record(&outcome);
    }

    /// Consumes jobs until the subscription ends, then waits for in-flight
    /// jobs and returns `BusUnavailable`.
    pub async fn run(self: Arc<Self>, bus: Arc<dyn MessageBus>, concurrency: usize) -> Result<()> {
        let mut jobs = bus.consume_jobs().await?;
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = JoinSet::new();
        info!(concurrency, "waiting for jobs");

        while let Some(job) = jobs.recv().await {
            let permit = permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PollError::BusUnavailable("worker pool closed".into()))?;
            let worker = self.clone();
            let bus = bus.clone();
            tasks.spawn(async move {
                worker.process(bus.as_ref(), job).await;
                drop(permit);
            });

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "poll task panicked");
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "poll task panicked");
            }
        }
        Err(PollError::BusUnavailable("job subscription closed".into()))
    }
}
