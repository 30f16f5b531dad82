//! Parser for net-snmp walk output printed with numeric OIDs (`-On`) and
//! numeric enums (`-Oe`):
//!
//! ```text
//! .1.3.6.1.2.1.31.1.1.1.1.2 = STRING: "eth0"
//! .1.3.6.1.2.1.31.1.1.1.6.2 = Counter64: 123456789
//! ```
//!
//! A quoted string may span several lines; any line that does not start a new
//! binding continues the previous one.

use pollmesh_core::{SnmpValue, VarBind};
use std::net::Ipv4Addr;
use tracing::debug;

/// Values net-snmp prints instead of a binding when the subtree is exhausted
/// or an instance is missing.
const END_MARKERS: &[&str] = &["No more variables left", "No Such Object", "No Such Instance", "End of MIB"];

pub fn parse_walk_output(text: &str) -> Vec<VarBind> {
    let mut raw: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        match split_binding(line) {
            Some((oid, value)) => raw.push((oid.to_string(), value.to_string())),
            None => {
                if let Some((_, value)) = raw.last_mut() {
                    value.push('\n');
                    value.push_str(line);
                } else if !line.trim().is_empty() {
                    debug!(line, "ignoring walk output line");
                }
            }
        }
    }

    raw.into_iter()
        .filter(|(_, value)| !END_MARKERS.iter().any(|m| value.starts_with(m)))
        .map(|(oid, value)| VarBind::new(oid, parse_value(&value)))
        .collect()
}

fn split_binding(line: &str) -> Option<(&str, &str)> {
    if !line.starts_with('.') {
        return None;
    }
    let (oid, value) = line.split_once(" = ")?;
    if !oid.bytes().all(|b| b == b'.' || b.is_ascii_digit()) {
        return None;
    }
    Some((oid, value))
}

/// Types one printed value. Anything that does not parse as its announced
/// type is kept verbatim as `Opaque`.
pub fn parse_value(raw: &str) -> SnmpValue {
    let Some((kind, text)) = raw.split_once(": ") else {
        return match raw.trim() {
            "\"\"" => SnmpValue::OctetString(Vec::new()),
            "NULL" => SnmpValue::Null,
            other => SnmpValue::Opaque(other.to_string()),
        };
    };
    let text = text.trim_end();
    let typed = match kind {
        "STRING" => Some(SnmpValue::OctetString(unquote(text).into_bytes())),
        "Hex-STRING" => parse_hex(text).map(SnmpValue::OctetString),
        "INTEGER" => leading_number(text).parse().ok().map(SnmpValue::Integer),
        "Counter32" => text.parse().ok().map(SnmpValue::Counter32),
        "Counter64" => text.parse().ok().map(SnmpValue::Counter64),
        "Gauge32" | "Unsigned32" => leading_number(text).parse().ok().map(SnmpValue::Gauge32),
        "Timeticks" => parse_ticks(text).map(SnmpValue::TimeTicks),
        "IpAddress" => text.parse::<Ipv4Addr>().ok().map(SnmpValue::IpAddress),
        "OID" => Some(SnmpValue::ObjectIdentifier(text.to_string())),
        _ => None,
    };
    typed.unwrap_or_else(|| SnmpValue::Opaque(text.to_string()))
}

fn unquote(text: &str) -> String {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text);
    inner.replace("\\\"", "\"")
}

fn parse_hex(text: &str) -> Option<Vec<u8>> {
    text.split_whitespace()
        .map(|byte| u8::from_str_radix(byte, 16).ok())
        .collect()
}

/// `up(1)` or `1000 Mbit/s` style values: keep the number.
fn leading_number(text: &str) -> &str {
    if let (Some(open), Some(close)) = (text.find('('), text.rfind(')')) {
        if open < close {
            return &text[open + 1..close];
        }
    }
    text.split_whitespace().next().unwrap_or(text)
}

/// `(123456) 0:20:34.56` -> 123456
fn parse_ticks(text: &str) -> Option<u32> {
    let inner = text.strip_prefix('(')?;
    let (ticks, _) = inner.split_once(')')?;
    ticks.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_lines() {
        let out = "\
.1.3.6.1.2.1.31.1.1.1.1.2 = STRING: \"eth0\"
.1.3.6.1.2.1.31.1.1.1.6.2 = Counter64: 123456789
.1.3.6.1.2.1.31.1.1.1.2.2 = Counter32: 42
.1.3.6.1.2.1.31.1.1.1.15.2 = Gauge32: 1000
.1.3.6.1.2.1.31.1.1.1.17.2 = INTEGER: 1
.1.3.6.1.2.1.31.1.1.1.19.2 = Timeticks: (4500) 0:00:45.00
";
        let binds = parse_walk_output(out);
        assert_eq!(binds.len(), 6);
        assert_eq!(binds[0].oid, ".1.3.6.1.2.1.31.1.1.1.1.2");
        assert_eq!(binds[0].value, SnmpValue::OctetString(b"eth0".to_vec()));
        assert_eq!(binds[1].value, SnmpValue::Counter64(123_456_789));
        assert_eq!(binds[2].value, SnmpValue::Counter32(42));
        assert_eq!(binds[3].value, SnmpValue::Gauge32(1000));
        assert_eq!(binds[4].value, SnmpValue::Integer(1));
        assert_eq!(binds[5].value, SnmpValue::TimeTicks(4500));
    }

    #[test]
    fn test_multiline_string_continues_previous_binding() {
        let out = ".1.3.6.1.2.1.31.1.1.1.18.3 = STRING: \"uplink\nto core\"\n.1.3.6.1.2.1.31.1.1.1.1.3 = STRING: \"ge-0/0/3\"\n";
        let binds = parse_walk_output(out);
        assert_eq!(binds.len(), 2);
        assert_eq!(binds[0].value, SnmpValue::OctetString(b"uplink\nto core".to_vec()));
        assert_eq!(binds[1].value, SnmpValue::OctetString(b"ge-0/0/3".to_vec()));
    }

    #[test]
    fn test_end_markers_are_dropped() {
        let out = ".1.3.6.1.2.1.31.1.1.1.1.1 = STRING: \"lo\"\n\
                   .1.3.6.1.2.1.31.1.1.1 = No more variables left in this MIB View (It is past the end of the MIB tree)\n";
        let binds = parse_walk_output(out);
        assert_eq!(binds.len(), 1);
    }

    #[test]
    fn test_other_value_shapes() {
        assert_eq!(parse_value("Hex-STRING: 00 1A 2B "), SnmpValue::OctetString(vec![0x00, 0x1a, 0x2b]));
        assert_eq!(parse_value("\"\""), SnmpValue::OctetString(Vec::new()));
        assert_eq!(parse_value("INTEGER: up(1)"), SnmpValue::Integer(1));
        assert_eq!(parse_value("Gauge32: 1000 Mbit/s"), SnmpValue::Gauge32(1000));
        assert_eq!(parse_value("IpAddress: 10.1.2.3"), SnmpValue::IpAddress(Ipv4Addr::new(10, 1, 2, 3)));
        assert_eq!(parse_value("OID: .1.3.6.1.4.1.9"), SnmpValue::ObjectIdentifier(".1.3.6.1.4.1.9".into()));
        assert_eq!(parse_value("Counter32: lots"), SnmpValue::Opaque("lots".into()));
        assert_eq!(parse_value("BITS: 80"), SnmpValue::Opaque("80".into()));
    }

    #[test]
    fn test_leading_noise_is_ignored() {
        let out = "Created directory: /var/lib/snmp\n.1.3.6.1.2.1.31.1.1.1.1.1 = STRING: \"lo\"\n";
        let binds = parse_walk_output(out);
        assert_eq!(binds.len(), 1);
        assert_eq!(binds[0].oid, ".1.3.6.1.2.1.31.1.1.1.1.1");
    }
}
