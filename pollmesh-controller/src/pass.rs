//! One polling pass: drain the producer and put every job on the bus.

use tracing::{error, info, warn};

use pollmesh_core::producer::PassSummary;
use pollmesh_core::{InventoryRow, JobProducer, MessageBus, PollError};

#[derive(Debug, Default)]
pub struct PassReport {
    pub summary: PassSummary,
    pub published: usize,
    pub publish_failures: usize,
    /// Capability error that ended the pass early.
    pub abort_reason: Option<String>,
}

/// Publishes jobs as the producer yields them. A single failed publish is
/// counted and skipped; a lost bus ends the pass with an error.
pub async fn dispatch<I>(
    bus: &dyn MessageBus,
    producer: JobProducer<'_>,
    rows: I,
) -> pollmesh_core::Result<PassReport>
where
    I: IntoIterator<Item = pollmesh_core::Result<InventoryRow>>,
{
    let mut report = PassReport::default();
    let mut jobs = producer.produce(rows);

    while let Some(next) = jobs.next() {
        let job = match next {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "pass aborted");
                report.abort_reason = Some(e.to_string());
                continue;
            }
        };
        match bus.publish_job(&job).await {
            Ok(()) => report.published += 1,
            Err(e @ PollError::BusUnavailable(_)) => return Err(e),
            Err(e) => {
                warn!(host = %job.hostname, module = %job.polling_module, error = %e, "job not published");
                report.publish_failures += 1;
            }
        }
    }

    report.summary = jobs.into_summary();
    Ok(report)
}

pub fn log_report(report: &PassReport) {
    let summary = &report.summary;
    info!(
        devices = summary.devices_seen,
        jobs = summary.jobs_emitted,
        published = report.published,
        publish_failures = report.publish_failures,
        skipped_rows = summary.skipped.len(),
        hostname_fallbacks = summary.hostname_fallbacks.len(),
        defaults_only = summary.defaults_only.len(),
        aborted = summary.aborted,
        "pass complete"
    );
    for skipped in &summary.skipped {
        warn!(row = skipped.row, reason = %skipped.reason, "inventory row skipped");
    }
    if !summary.hostname_fallbacks.is_empty() {
        warn!(hosts = ?summary.hostname_fallbacks, "polled by hostname");
    }
}
