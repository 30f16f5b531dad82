use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Polling address decoded from the raw inventory bytes.
///
/// Any length other than 4 or 16 falls back to the hostname. That is a
/// degraded but valid state: the device is still polled, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAddress {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
    Hostname(String),
}

impl DeviceAddress {
    pub fn decode(raw: &[u8], hostname: &str) -> Self {
        if let Ok(octets) = <[u8; 4]>::try_from(raw) {
            return DeviceAddress::V4(Ipv4Addr::from(octets));
        }
        if let Ok(octets) = <[u8; 16]>::try_from(raw) {
            return DeviceAddress::V6(Ipv6Addr::from(octets));
        }
        DeviceAddress::Hostname(hostname.to_string())
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, DeviceAddress::Hostname(_))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::V4(ip) => write!(f, "{ip}"),
            // Always eight full groups, never the compressed `::` form.
            DeviceAddress::V6(ip) => {
                for (i, group) in ip.segments().iter().enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{group:04X}")?;
                }
                Ok(())
            }
            DeviceAddress::Hostname(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_dotted_quad() {
        let addr = DeviceAddress::decode(&[192, 168, 1, 1], "rtr");
        assert_eq!(addr.to_string(), "192.168.1.1");

        for octets in [[0u8, 0, 0, 0], [255, 255, 255, 255], [10, 0, 20, 7]] {
            let expected = Ipv4Addr::from(octets).to_string();
            assert_eq!(DeviceAddress::decode(&octets, "x").to_string(), expected);
        }
    }

    #[test]
    fn test_ipv6_eight_full_groups() {
        let mut raw = [0u8; 16];
        raw[0] = 0x20;
        raw[1] = 0x01;
        raw[2] = 0x0d;
        raw[3] = 0xb8;
        raw[15] = 0x01;
        let text = DeviceAddress::decode(&raw, "rtr").to_string();
        assert_eq!(text, "2001:0DB8:0000:0000:0000:0000:0000:0001");

        let groups: Vec<&str> = text.split(':').collect();
        assert_eq!(groups.len(), 8);
        assert!(groups
            .iter()
            .all(|g| g.len() == 4 && g.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn test_other_lengths_fall_back_to_hostname() {
        for len in [0usize, 1, 3, 5, 15, 17, 32] {
            let raw = vec![1u8; len];
            let addr = DeviceAddress::decode(&raw, "branch-fw");
            assert!(addr.is_degraded());
            assert_eq!(addr.to_string(), "branch-fw");
        }
    }
}
