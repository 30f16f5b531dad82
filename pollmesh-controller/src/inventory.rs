//! Device inventory backed by a JSON file.
//!
//! The file holds an array of rows:
//!
//! ```json
//! [{"device_id": 1, "hostname": "core-sw1", "ip": [192, 168, 1, 1],
//!   "community": "public", "snmpver": "v2c", "port": 161,
//!   "transport": "udp", "os": "generic"}]
//! ```
//!
//! Each element is decoded on its own, so one malformed row does not spoil
//! the rest of the inventory.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

use pollmesh_core::{InventoryRow, PollError};

pub struct FileInventory {
    path: PathBuf,
}

impl FileInventory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every row. The outer error means the file itself is unusable.
    pub async fn read(&self) -> Result<Vec<pollmesh_core::Result<InventoryRow>>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read inventory {}", self.path.display()))?;
        let rows = decode_rows(&text)
            .with_context(|| format!("Inventory {} is not a JSON array", self.path.display()))?;
        info!(path = %self.path.display(), rows = rows.len(), "inventory loaded");
        Ok(rows)
    }
}

pub fn decode_rows(text: &str) -> serde_json::Result<Vec<pollmesh_core::Result<InventoryRow>>> {
    let elements: Vec<Value> = serde_json::from_str(text)?;
    Ok(elements
        .into_iter()
        .enumerate()
        .map(|(row, element)| {
            serde_json::from_value(element).map_err(|e| PollError::Inventory { row, reason: e.to_string() })
        })
        .collect())
}
