/*!
Builders for pipeline test data: inventory rows, jobs and walk pairs.
*/

use chrono::Utc;
use pollmesh_core::{InventoryRow, PollJob, ProtocolParams, SnmpValue, VarBind};

/// IF-MIB::ifXEntry
pub const IF_X_ENTRY: &str = ".1.3.6.1.2.1.31.1.1.1";
pub const IF_NAME: u32 = 1;
pub const IF_HC_IN_OCTETS: u32 = 6;
pub const IF_HC_OUT_OCTETS: u32 = 10;
pub const IF_HIGH_SPEED: u32 = 15;
pub const IF_ALIAS: u32 = 18;

/// Fluent inventory row, defaulting to a v2c device on udp/161 running
/// the `generic` OS.
#[derive(Debug, Clone)]
pub struct DeviceBuilder {
    row: InventoryRow,
}

impl DeviceBuilder {
    pub fn new(device_id: i64, hostname: impl Into<String>) -> Self {
        Self {
            row: InventoryRow {
                device_id,
                hostname: hostname.into(),
                ip: Vec::new(),
                community: "public".into(),
                snmpver: "2c".into(),
                port: 161,
                transport: "udp".into(),
                os: "generic".into(),
            },
        }
    }

    pub fn ip(mut self, bytes: &[u8]) -> Self {
        self.row.ip = bytes.to_vec();
        self
    }

    pub fn os(mut self, os: impl Into<String>) -> Self {
        self.row.os = os.into();
        self
    }

    pub fn community(mut self, community: impl Into<String>) -> Self {
        self.row.community = community.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.row.port = port;
        self
    }

    pub fn build(self) -> InventoryRow {
        self.row
    }

    /// As the inventory reader yields it.
    pub fn row(self) -> pollmesh_core::Result<InventoryRow> {
        Ok(self.build())
    }
}

pub struct PollmeshMessageBuilder;

impl PollmeshMessageBuilder {
    /// Job for `module` against `ip`, issued now.
    pub fn job(hostname: &str, ip: &str, module: &str) -> PollJob {
        PollJob {
            hostname: hostname.to_string(),
            issued_at: Utc::now().timestamp(),
            snmp: ProtocolParams {
                community: "public".into(),
                version: "2c".into(),
                port: 161,
                ip: ip.to_string(),
                transport: "udp".into(),
            },
            polling_module: module.to_string(),
        }
    }

    /// One ifXEntry pair: `<ifXEntry>.<column>.<index>`.
    pub fn if_x(column: u32, index: u32, value: SnmpValue) -> VarBind {
        VarBind::new(format!("{IF_X_ENTRY}.{column}.{index}"), value)
    }

    /// A plausible ifXTable walk: name, alias, octet counters and speed for
    /// every `(index, name)`.
    pub fn if_x_table(interfaces: &[(u32, &str)]) -> Vec<VarBind> {
        let mut pairs = Vec::new();
        for &(index, name) in interfaces {
            let octets = u64::from(index) * 1_000;
            pairs.push(Self::if_x(IF_NAME, index, SnmpValue::OctetString(name.as_bytes().to_vec())));
            pairs.push(Self::if_x(IF_HC_IN_OCTETS, index, SnmpValue::Counter64(octets)));
            pairs.push(Self::if_x(IF_HC_OUT_OCTETS, index, SnmpValue::Counter64(octets / 2)));
            pairs.push(Self::if_x(IF_HIGH_SPEED, index, SnmpValue::Gauge32(1_000)));
            pairs.push(Self::if_x(IF_ALIAS, index, SnmpValue::OctetString(format!("{name} link").into_bytes())));
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollmesh_core::oids;

    #[test]
    fn test_if_x_matches_ports_walk() {
        assert_eq!(oids::module_walk("ports").unwrap().base, IF_X_ENTRY);
        assert_eq!(oids::field_name(&format!("{IF_X_ENTRY}.{IF_NAME}")), Some("ifName"));
        assert_eq!(oids::field_name(&format!("{IF_X_ENTRY}.{IF_HIGH_SPEED}")), Some("ifHighSpeed"));
        assert_eq!(oids::field_name(&format!("{IF_X_ENTRY}.{IF_ALIAS}")), Some("ifAlias"));
    }

    #[test]
    fn test_device_builder() {
        let row = DeviceBuilder::new(7, "rtr7").ip(&[10, 0, 0, 7]).os("ios").port(1161).build();
        assert_eq!(row.device_id, 7);
        assert_eq!(row.ip, vec![10, 0, 0, 7]);
        assert_eq!(row.os, "ios");
        assert_eq!(row.port, 1161);
        assert_eq!(row.snmpver, "2c");
    }

    #[test]
    fn test_if_x_table() {
        let pairs = PollmeshMessageBuilder::if_x_table(&[(1, "lo"), (2, "eth0")]);
        assert_eq!(pairs.len(), 10);
        assert_eq!(pairs[5].oid, ".1.3.6.1.2.1.31.1.1.1.1.2");
    }
}
