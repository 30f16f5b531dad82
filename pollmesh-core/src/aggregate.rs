//! Folding walk results into keyed stat records.
//!
//! An `Aggregation` is the message under construction for exactly one job.
//! It is owned by the task running that job and turns into a
//! `StatisticMessage` only through `finish`, once the walk has completed.
//! If the walk fails the aggregation is simply dropped.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{trace, warn};

use crate::models::{PollJob, Stat, StatKind, StatRecord, StatisticMessage};
use crate::oids;
use crate::walker::{SnmpValue, VarBind};

#[derive(Debug, Default)]
pub struct Aggregation {
    records: BTreeMap<u32, StatRecord>,
    skipped: usize,
}

impl Aggregation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one pair under `records[index][field]`. A repeated
    /// (index, field) replaces the earlier stat. Returns false when the OID
    /// has no numeric index and the pair was skipped.
    pub fn insert(&mut self, varbind: VarBind) -> bool {
        let Some((base, index)) = oids::split_index(&varbind.oid) else {
            warn!(oid = %varbind.oid, "no numeric index, pair skipped");
            self.skipped += 1;
            return false;
        };

        let name = oids::field_name(&base).unwrap_or_default();
        // Unknown columns keep an empty name; key them by base OID so they
        // do not overwrite each other.
        let key = if name.is_empty() { base } else { name.to_string() };

        let stat = to_stat(name, &varbind.value);
        trace!(index, field = %key, value = %stat.value, "stat");
        self.records.entry(index).or_default().insert(key, stat);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn finish(self, job: &PollJob, completed_at: DateTime<Utc>) -> StatisticMessage {
        StatisticMessage {
            hostname: job.hostname.clone(),
            polling_module: job.polling_module.clone(),
            time: completed_at,
            records: self.records,
        }
    }
}

/// Kind and string rendering of a protocol value. Kind follows the protocol
/// type tag, never the value's contents.
pub fn to_stat(name: &str, value: &SnmpValue) -> Stat {
    let (kind, value, range) = match value {
        SnmpValue::OctetString(bytes) => (StatKind::String, String::from_utf8_lossy(bytes).into_owned(), None),
        SnmpValue::Counter32(v) => (StatKind::Counter, v.to_string(), Some(u64::from(u32::MAX))),
        SnmpValue::Counter64(v) => (StatKind::Counter, v.to_string(), Some(u64::MAX)),
        SnmpValue::Gauge32(v) => (StatKind::Gauge, v.to_string(), Some(u64::from(u32::MAX))),
        // Plain integers and timeticks are levels, not running totals; they
        // report as gauges without a range hint.
        SnmpValue::Integer(v) => (StatKind::Gauge, v.to_string(), None),
        SnmpValue::TimeTicks(v) => (StatKind::Gauge, v.to_string(), None),
        SnmpValue::IpAddress(ip) => (StatKind::String, ip.to_string(), None),
        SnmpValue::ObjectIdentifier(oid) => (StatKind::String, oid.clone(), None),
        SnmpValue::Opaque(text) => (StatKind::String, text.clone(), None),
        SnmpValue::Null => (StatKind::String, String::new(), None),
    };
    Stat {
        name: name.to_string(),
        value,
        kind,
        min: range.map(|_| 0),
        max: range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProtocolParams;

    const IF_NAME: &str = ".1.3.6.1.2.1.31.1.1.1.1";
    const IF_HC_IN: &str = ".1.3.6.1.2.1.31.1.1.1.6";
    const IF_HIGH_SPEED: &str = ".1.3.6.1.2.1.31.1.1.1.15";

    fn job() -> PollJob {
        PollJob {
            hostname: "edge1".into(),
            issued_at: 0,
            snmp: ProtocolParams {
                community: "public".into(),
                version: "2c".into(),
                port: 161,
                ip: "10.1.1.1".into(),
                transport: "udp".into(),
            },
            polling_module: "ports".into(),
        }
    }

    fn octets(s: &str) -> SnmpValue {
        SnmpValue::OctetString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_octet_string_becomes_named_string_stat() {
        let mut agg = Aggregation::new();
        assert!(agg.insert(VarBind::new(format!("{IF_NAME}.5"), octets("eth0"))));
        let msg = agg.finish(&job(), Utc::now());

        let stat = msg.records[&5].get("ifName").unwrap();
        assert_eq!(stat.name, "ifName");
        assert_eq!(stat.kind, StatKind::String);
        assert_eq!(stat.value, "eth0");
        assert_eq!(stat.min, None);
    }

    #[test]
    fn test_kind_follows_type_tag() {
        let mut agg = Aggregation::new();
        agg.insert(VarBind::new(format!("{IF_HC_IN}.2"), SnmpValue::Counter64(18_446_744_073_709_551_615)));
        agg.insert(VarBind::new(format!("{IF_HIGH_SPEED}.2"), SnmpValue::Gauge32(1000)));
        agg.insert(VarBind::new(".1.3.6.1.2.1.31.1.1.1.2.2", SnmpValue::Counter32(7)));
        agg.insert(VarBind::new(".1.3.6.1.2.1.31.1.1.1.14.2", SnmpValue::Integer(1)));
        let msg = agg.finish(&job(), Utc::now());
        let record = &msg.records[&2];

        let hc_in = record.get("ifHCInOctets").unwrap();
        assert_eq!(hc_in.kind, StatKind::Counter);
        assert_eq!(hc_in.value, "18446744073709551615");
        assert_eq!(hc_in.max, Some(u64::MAX));

        let speed = record.get("ifHighSpeed").unwrap();
        assert_eq!(speed.kind, StatKind::Gauge);
        assert_eq!((speed.min, speed.max), (Some(0), Some(u64::from(u32::MAX))));

        assert_eq!(record.get("ifInMulticastPkts").unwrap().kind, StatKind::Counter);
        let trap = record.get("ifLinkUpDownTrapEnable").unwrap();
        assert_eq!(trap.kind, StatKind::Gauge);
        assert_eq!(trap.value, "1");
        assert_eq!((trap.min, trap.max), (None, None));
    }

    #[test]
    fn test_duplicate_pair_last_write_wins() {
        let mut agg = Aggregation::new();
        agg.insert(VarBind::new(format!("{IF_NAME}.3"), octets("old")));
        agg.insert(VarBind::new(format!("{IF_NAME}.3"), octets("new")));
        let msg = agg.finish(&job(), Utc::now());

        assert_eq!(msg.records.len(), 1);
        assert_eq!(msg.records[&3].len(), 1);
        assert_eq!(msg.records[&3].get("ifName").unwrap().value, "new");
        assert!(!msg.records.contains_key(&1));
    }

    #[test]
    fn test_unknown_columns_are_kept_apart() {
        let mut agg = Aggregation::new();
        agg.insert(VarBind::new(".1.3.6.1.2.1.31.1.1.1.40.7", SnmpValue::Gauge32(1)));
        agg.insert(VarBind::new(".1.3.6.1.2.1.31.1.1.1.41.7", SnmpValue::Gauge32(2)));
        let msg = agg.finish(&job(), Utc::now());

        let record = &msg.records[&7];
        assert_eq!(record.len(), 2);
        let unknown = record.get(".1.3.6.1.2.1.31.1.1.1.40").unwrap();
        assert_eq!(unknown.name, "");
        assert_eq!(unknown.value, "1");
    }

    #[test]
    fn test_pair_without_index_is_skipped() {
        let mut agg = Aggregation::new();
        assert!(!agg.insert(VarBind::new(".1.3.6.1.2.1.31.1.1.1.1.eth", octets("x"))));
        assert!(agg.is_empty());
        assert_eq!(agg.skipped(), 1);
    }

    #[test]
    fn test_finish_copies_job_identity() {
        let completed = Utc::now();
        let msg = Aggregation::new().finish(&job(), completed);
        assert_eq!(msg.hostname, "edge1");
        assert_eq!(msg.polling_module, "ports");
        assert_eq!(msg.time, completed);
        assert!(msg.records.is_empty());
    }
}
