//! Wire and domain types shared by the controller, the workers and the sinks.
//!
//! Job and telemetry payloads keep the field names the existing consumers
//! already parse (`Hostname`, `PollingModule`, `SNMP`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::address::DeviceAddress;

/// One row of the device inventory, as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRow {
    pub device_id: i64,
    pub hostname: String,
    /// Raw address bytes: 4 for IPv4, 16 for IPv6, anything else means "use the hostname".
    #[serde(default)]
    pub ip: Vec<u8>,
    pub community: String,
    pub snmpver: String,
    pub port: u16,
    pub transport: String,
    pub os: String,
}

/// Device snapshot for one polling pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub id: i64,
    pub hostname: String,
    pub address: DeviceAddress,
    pub community: String,
    pub version: String,
    pub port: u16,
    pub transport: String,
    pub os: String,
}

impl Device {
    pub fn from_row(row: InventoryRow) -> Self {
        let address = DeviceAddress::decode(&row.ip, &row.hostname);
        Self {
            id: row.device_id,
            hostname: row.hostname,
            address,
            community: row.community,
            version: row.snmpver,
            port: row.port,
            transport: row.transport,
            os: row.os,
        }
    }

    pub fn protocol_params(&self) -> ProtocolParams {
        ProtocolParams {
            community: self.community.clone(),
            version: self.version.clone(),
            port: self.port,
            ip: self.address.to_string(),
            transport: self.transport.clone(),
        }
    }
}

/// Protocol parameters carried inside a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProtocolParams {
    pub community: String,
    pub version: String,
    pub port: u16,
    #[serde(rename = "IP")]
    pub ip: String,
    pub transport: String,
}

/// A unit of polling work: one module on one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PollJob {
    pub hostname: String,
    /// Unix seconds at the start of the producer pass.
    #[serde(rename = "Time")]
    pub issued_at: i64,
    #[serde(rename = "SNMP")]
    pub snmp: ProtocolParams,
    pub polling_module: String,
}

/// Semantic kind of a stat, independent of the protocol's wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatKind {
    String,
    Counter,
    Gauge,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Stat {
    /// Field name from the OID table; empty when the column is unknown.
    pub name: String,
    pub value: String,
    #[serde(rename = "Type")]
    pub kind: StatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

/// All fields collected for one index (interface or other sub-entity).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatRecord {
    fields: BTreeMap<String, Stat>,
}

impl StatRecord {
    /// Inserts a stat under `key`, returning the value it replaced.
    pub fn insert(&mut self, key: String, stat: Stat) -> Option<Stat> {
        self.fields.insert(key, stat)
    }

    pub fn get(&self, key: &str) -> Option<&Stat> {
        self.fields.get(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Stat)> {
        self.fields.iter()
    }
}

/// Aggregated result of one job, published once on the telemetry channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StatisticMessage {
    pub hostname: String,
    pub polling_module: String,
    /// Wall clock at walk completion.
    pub time: DateTime<Utc>,
    pub records: BTreeMap<u32, StatRecord>,
}

impl StatisticMessage {
    pub fn field_count(&self) -> usize {
        self.records.values().map(StatRecord::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> PollJob {
        PollJob {
            hostname: "core-sw1".into(),
            issued_at: 1_700_000_000,
            snmp: ProtocolParams {
                community: "public".into(),
                version: "2c".into(),
                port: 161,
                ip: "10.0.0.1".into(),
                transport: "udp".into(),
            },
            polling_module: "ports".into(),
        }
    }

    #[test]
    fn test_job_wire_keys() {
        let value = serde_json::to_value(sample_job()).unwrap();
        let obj = value.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["Hostname", "PollingModule", "SNMP", "Time"]);
        assert_eq!(value["SNMP"]["IP"], "10.0.0.1");
        assert_eq!(value["SNMP"]["Port"], 161);
    }

    #[test]
    fn test_job_decodes_from_wire() {
        let payload = r#"{
            "Hostname": "edge1",
            "Time": 12,
            "SNMP": {"Community": "c", "Version": "2c", "Port": 161, "IP": "edge1", "Transport": "udp"},
            "PollingModule": "ports"
        }"#;
        let job: PollJob = serde_json::from_str(payload).unwrap();
        assert_eq!(job.hostname, "edge1");
        assert_eq!(job.issued_at, 12);
        assert_eq!(job.snmp.ip, "edge1");
    }

    #[test]
    fn test_telemetry_index_keys_are_strings() {
        let mut record = StatRecord::default();
        record.insert(
            "ifName".into(),
            Stat {
                name: "ifName".into(),
                value: "eth0".into(),
                kind: StatKind::String,
                min: None,
                max: None,
            },
        );
        let msg = StatisticMessage {
            hostname: "edge1".into(),
            polling_module: "ports".into(),
            time: Utc::now(),
            records: BTreeMap::from([(5, record)]),
        };
        let value = serde_json::to_value(&msg).unwrap();
        let stat = &value["Records"]["5"]["ifName"];
        assert_eq!(stat["Type"], "String");
        assert_eq!(stat["Value"], "eth0");
        assert!(stat.get("Min").is_none());

        let back: StatisticMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back.records[&5].get("ifName").unwrap().value, "eth0");
    }

    #[test]
    fn test_device_from_row_short_address() {
        let device = Device::from_row(InventoryRow {
            device_id: 3,
            hostname: "lab-rtr".into(),
            ip: vec![],
            community: "public".into(),
            snmpver: "v2c".into(),
            port: 161,
            transport: "udp".into(),
            os: "generic".into(),
        });
        assert_eq!(device.protocol_params().ip, "lab-rtr");
        assert!(device.address.is_degraded());
    }
}
