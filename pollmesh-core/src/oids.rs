//! Static OID tables: which subtree each module walks, and the field name of
//! every known column. Built once, shared read-only by all workers.

use std::collections::HashMap;
use std::sync::LazyLock;

/// Subtree walked for a polling module, with its column names.
#[derive(Debug)]
pub struct ModuleWalk {
    pub module: &'static str,
    /// Subtree root, with a leading dot.
    pub base: &'static str,
    columns: &'static [(u32, &'static str)],
}

impl ModuleWalk {
    pub fn columns(&self) -> impl Iterator<Item = (u32, &'static str)> {
        self.columns.iter().copied()
    }
}

// IF-MIB::ifXEntry
const IF_X_ENTRY: &[(u32, &str)] = &[
    (1, "ifName"),
    (2, "ifInMulticastPkts"),
    (3, "ifInBroadcastPkts"),
    (4, "ifOutMulticastPkts"),
    (5, "ifOutBroadcastPkts"),
    (6, "ifHCInOctets"),
    (7, "ifHCInUcastPkts"),
    (8, "ifHCInMulticastPkts"),
    (9, "ifHCInBroadcastPkts"),
    (10, "ifHCOutOctets"),
    (11, "ifHCOutUcastPkts"),
    (12, "ifHCOutMulticastPkts"),
    (13, "ifHCOutBroadcastPkts"),
    (14, "ifLinkUpDownTrapEnable"),
    (15, "ifHighSpeed"),
    (16, "ifPromiscuousMode"),
    (17, "ifConnectorPresent"),
    (18, "ifAlias"),
    (19, "ifCounterDiscontinuityTime"),
];

pub static MODULE_WALKS: &[ModuleWalk] = &[ModuleWalk {
    module: "ports",
    base: ".1.3.6.1.2.1.31.1.1.1",
    columns: IF_X_ENTRY,
}];

static FIELD_NAMES: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    MODULE_WALKS
        .iter()
        .flat_map(|walk| walk.columns().map(move |(arc, name)| (format!("{}.{arc}", walk.base), name)))
        .collect()
});

pub fn module_walk(module: &str) -> Option<&'static ModuleWalk> {
    MODULE_WALKS.iter().find(|walk| walk.module == module)
}

/// Field name of a column OID (without the index arc).
pub fn field_name(base: &str) -> Option<&'static str> {
    FIELD_NAMES.get(base).copied()
}

/// Splits `<base>.<index>` into the column base (with a leading dot) and the
/// numeric index. `None` when the last arc is not a non-negative integer.
pub fn split_index(oid: &str) -> Option<(String, u32)> {
    let trimmed = oid.trim().trim_start_matches('.');
    let (base, index) = trimmed.rsplit_once('.')?;
    if base.is_empty() {
        return None;
    }
    let index = index.parse::<u32>().ok()?;
    Some((format!(".{base}"), index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_index() {
        assert_eq!(
            split_index(".1.3.6.1.2.1.31.1.1.1.1.5"),
            Some((".1.3.6.1.2.1.31.1.1.1.1".to_string(), 5))
        );
        assert_eq!(
            split_index("1.3.6.1.2.1.31.1.1.1.6.10001"),
            Some((".1.3.6.1.2.1.31.1.1.1.6".to_string(), 10001))
        );
        assert_eq!(split_index(".1"), None);
        assert_eq!(split_index(".1.3.6.x"), None);
        assert_eq!(split_index(".1.3.6.-1"), None);
        assert_eq!(split_index(""), None);
    }

    #[test]
    fn test_ports_table() {
        let walk = module_walk("ports").unwrap();
        assert_eq!(walk.base, ".1.3.6.1.2.1.31.1.1.1");
        assert_eq!(walk.columns().count(), 19);
        assert_eq!(field_name(".1.3.6.1.2.1.31.1.1.1.1"), Some("ifName"));
        assert_eq!(field_name(".1.3.6.1.2.1.31.1.1.1.15"), Some("ifHighSpeed"));
        assert_eq!(field_name(".1.3.6.1.2.1.31.1.1.1.99"), None);
        assert!(module_walk("bgp-peers").is_none());
    }
}
