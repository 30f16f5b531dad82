//! Job producer
//!
//! One pass over the inventory yields one `PollJob` per (device, enabled
//! module). The pass is lazy: rows are pulled from the inventory only as jobs
//! are consumed, and the returned iterator cannot be restarted.
//!
//! Bad rows are skipped and reported in the `PassSummary`. Capability errors
//! end the pass unless `DefinitionFallback::UseDefaults` is configured.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::capabilities::{is_module_enabled, CapabilityResolver, CapabilitySet, ModuleDefaults};
use crate::error::{PollError, Result};
use crate::models::{Device, InventoryRow, PollJob};

/// What to do when a device's OS has no usable definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionFallback {
    /// End the pass with the resolution error.
    #[default]
    Abort,
    /// Schedule the device with the global defaults only.
    #[serde(rename = "defaults")]
    UseDefaults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

/// End-of-pass report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub devices_seen: usize,
    pub jobs_emitted: usize,
    /// Hostnames of devices addressed by name because their IP bytes were unusable.
    pub hostname_fallbacks: Vec<String>,
    /// Hostnames scheduled with defaults only after a capability error.
    pub defaults_only: Vec<String>,
    pub skipped: Vec<SkippedRow>,
    pub aborted: bool,
}

#[derive(Clone, Copy)]
pub struct JobProducer<'a> {
    defaults: &'a ModuleDefaults,
    resolver: &'a CapabilityResolver,
    fallback: DefinitionFallback,
    issued_at: i64,
}

impl<'a> JobProducer<'a> {
    pub fn new(defaults: &'a ModuleDefaults, resolver: &'a CapabilityResolver) -> Self {
        Self {
            defaults,
            resolver,
            fallback: DefinitionFallback::default(),
            issued_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn with_fallback(mut self, fallback: DefinitionFallback) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_issue_time(mut self, issued_at: i64) -> Self {
        self.issued_at = issued_at;
        self
    }

    pub fn produce<I>(self, rows: I) -> Jobs<'a, I::IntoIter>
    where
        I: IntoIterator<Item = Result<InventoryRow>>,
    {
        Jobs {
            producer: self,
            rows: rows.into_iter(),
            row_no: 0,
            pending: VecDeque::new(),
            summary: PassSummary::default(),
            done: false,
        }
    }

    fn capabilities(&self, device: &Device, summary: &mut PassSummary) -> Result<Arc<CapabilitySet>> {
        match self.resolver.resolve(&device.os) {
            Ok(set) => Ok(set),
            Err(e @ (PollError::DefinitionNotFound(_) | PollError::DefinitionInvalid { .. }))
                if self.fallback == DefinitionFallback::UseDefaults =>
            {
                warn!(host = %device.hostname, error = %e, "scheduling with default modules only");
                summary.defaults_only.push(device.hostname.clone());
                Ok(Arc::new(CapabilitySet::defaults_only(&device.os)))
            }
            Err(e) => Err(e),
        }
    }

    fn schedule(&self, device: &Device, summary: &mut PassSummary) -> Result<Vec<PollJob>> {
        let capabilities = self.capabilities(device, summary)?;
        let params = device.protocol_params();

        // BTreeMap keys: modules come out in sorted order.
        let jobs: Vec<PollJob> = self
            .defaults
            .keys()
            .filter(|module| is_module_enabled(self.defaults, &capabilities, module))
            .map(|module| PollJob {
                hostname: device.hostname.clone(),
                issued_at: self.issued_at,
                snmp: params.clone(),
                polling_module: module.clone(),
            })
            .collect();

        debug!(host = %device.hostname, os = %device.os, jobs = jobs.len(), "device scheduled");
        Ok(jobs)
    }
}

/// Lazy job sequence for one pass. Call `summary()` once it is exhausted.
pub struct Jobs<'a, I> {
    producer: JobProducer<'a>,
    rows: I,
    row_no: usize,
    pending: VecDeque<PollJob>,
    summary: PassSummary,
    done: bool,
}

impl<I> Jobs<'_, I> {
    pub fn summary(&self) -> &PassSummary {
        &self.summary
    }

    pub fn into_summary(self) -> PassSummary {
        self.summary
    }
}

impl<I> Iterator for Jobs<'_, I>
where
    I: Iterator<Item = Result<InventoryRow>>,
{
    type Item = Result<PollJob>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(job) = self.pending.pop_front() {
                self.summary.jobs_emitted += 1;
                return Some(Ok(job));
            }
            if self.done {
                return None;
            }

            let row_no = self.row_no;
            self.row_no += 1;
            let row = match self.rows.next() {
                None => {
                    self.done = true;
                    return None;
                }
                Some(Err(e)) => {
                    warn!(row = row_no, error = %e, "skipping inventory row");
                    self.summary.skipped.push(SkippedRow { row: row_no, reason: e.to_string() });
                    continue;
                }
                Some(Ok(row)) => row,
            };

            let device = Device::from_row(row);
            self.summary.devices_seen += 1;
            if device.address.is_degraded() {
                warn!(host = %device.hostname, "no usable IP address, polling by hostname");
                self.summary.hostname_fallbacks.push(device.hostname.clone());
            }

            match self.producer.schedule(&device, &mut self.summary) {
                Ok(jobs) => self.pending.extend(jobs),
                Err(e) => {
                    self.done = true;
                    self.summary.aborted = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Convenience wrapper: a pass with the default fallback policy.
pub fn produce<'a, I>(
    rows: I,
    defaults: &'a ModuleDefaults,
    resolver: &'a CapabilityResolver,
) -> Jobs<'a, I::IntoIter>
where
    I: IntoIterator<Item = Result<InventoryRow>>,
{
    JobProducer::new(defaults, resolver).produce(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{MemoryDefinitionStore, Toggle};

    fn row(id: i64, hostname: &str, ip: Vec<u8>, os: &str) -> Result<InventoryRow> {
        Ok(InventoryRow {
            device_id: id,
            hostname: hostname.into(),
            ip,
            community: "public".into(),
            snmpver: "v2c".into(),
            port: 161,
            transport: "udp".into(),
            os: os.into(),
        })
    }

    fn resolver() -> CapabilityResolver {
        CapabilityResolver::new(
            MemoryDefinitionStore::new()
                .with("generic", "os: generic\n")
                .with("ios", "os: ios\npoller_modules:\n  bgp-peers: 1\n  ports: 1\n")
                .with("printer", "os: printer\npoller_modules:\n  ports: 0\n"),
        )
    }

    #[test]
    fn test_single_device_single_module() {
        let defaults = ModuleDefaults::from([("ports".to_string(), Toggle::Enabled)]);
        let resolver = resolver();
        let jobs: Vec<PollJob> = produce(vec![row(1, "gw", vec![192, 168, 1, 1], "generic")], &defaults, &resolver)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].polling_module, "ports");
        assert_eq!(jobs[0].snmp.ip, "192.168.1.1");
        assert_eq!(jobs[0].hostname, "gw");
    }

    #[test]
    fn test_overrides_gate_modules() {
        let defaults = ModuleDefaults::from([
            ("bgp-peers".to_string(), Toggle::Disabled),
            ("ports".to_string(), Toggle::Enabled),
            ("sensors".to_string(), Toggle::Unspecified),
        ]);
        let resolver = resolver();
        let rows = vec![
            row(1, "core", vec![10, 0, 0, 1], "ios"),
            row(2, "lobby-printer", vec![10, 0, 0, 2], "printer"),
        ];
        let mut pass = JobProducer::new(&defaults, &resolver).with_issue_time(42).produce(rows);
        let jobs: Vec<PollJob> = pass.by_ref().collect::<Result<_>>().unwrap();

        let modules: Vec<(&str, &str)> =
            jobs.iter().map(|j| (j.hostname.as_str(), j.polling_module.as_str())).collect();
        assert_eq!(modules, vec![("core", "bgp-peers"), ("core", "ports")]);
        assert!(jobs.iter().all(|j| j.issued_at == 42));

        let summary = pass.summary();
        assert_eq!(summary.devices_seen, 2);
        assert_eq!(summary.jobs_emitted, 2);
        assert!(!summary.aborted);
    }

    #[test]
    fn test_bad_rows_are_skipped_and_reported() {
        let defaults = ModuleDefaults::from([("ports".to_string(), Toggle::Enabled)]);
        let resolver = resolver();
        let rows = vec![
            row(1, "a", vec![10, 0, 0, 1], "generic"),
            Err(PollError::Inventory { row: 1, reason: "port is not a number".into() }),
            row(3, "c", vec![1, 2, 3], "generic"),
        ];
        let mut pass = produce(rows, &defaults, &resolver);
        let jobs: Vec<PollJob> = pass.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].snmp.ip, "c");

        let summary = pass.into_summary();
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].row, 1);
        assert_eq!(summary.hostname_fallbacks, vec!["c".to_string()]);
    }

    #[test]
    fn test_missing_definition_aborts_pass() {
        let defaults = ModuleDefaults::from([("ports".to_string(), Toggle::Enabled)]);
        let resolver = resolver();
        let rows = vec![
            row(1, "a", vec![10, 0, 0, 1], "generic"),
            row(2, "b", vec![10, 0, 0, 2], "junos"),
            row(3, "c", vec![10, 0, 0, 3], "generic"),
        ];
        let mut pass = produce(rows, &defaults, &resolver);
        assert!(pass.next().unwrap().is_ok());
        assert!(matches!(pass.next(), Some(Err(PollError::DefinitionNotFound(_)))));
        assert!(pass.next().is_none());
        assert!(pass.summary().aborted);
        assert_eq!(pass.summary().jobs_emitted, 1);
    }

    #[test]
    fn test_missing_definition_with_defaults_fallback() {
        let defaults = ModuleDefaults::from([("ports".to_string(), Toggle::Enabled)]);
        let resolver = resolver();
        let rows = vec![row(2, "b", vec![10, 0, 0, 2], "junos")];
        let mut pass = JobProducer::new(&defaults, &resolver)
            .with_fallback(DefinitionFallback::UseDefaults)
            .produce(rows);
        let jobs: Vec<PollJob> = pass.by_ref().collect::<Result<_>>().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(pass.summary().defaults_only, vec!["b".to_string()]);
    }

    #[test]
    fn test_rows_pulled_lazily() {
        let defaults = ModuleDefaults::from([("ports".to_string(), Toggle::Enabled)]);
        let resolver = resolver();
        let pulled = std::cell::Cell::new(0);
        let rows = (0..100).map(|i| {
            pulled.set(pulled.get() + 1);
            row(i, "dev", vec![10, 0, 0, 1], "generic")
        });
        let first = produce(rows, &defaults, &resolver).next();
        assert!(first.is_some());
        assert_eq!(pulled.get(), 1);
    }
}
