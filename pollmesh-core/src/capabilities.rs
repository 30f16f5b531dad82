//! Per-OS capability resolution
//!
//! Each OS has a YAML definition whose `poller_modules` map overrides the
//! global module defaults. Values are read as an explicit tri-state so the
//! enablement rule stays exhaustive:
//! - `true` / non-zero integer -> Enabled
//! - `false` / `0`             -> Disabled
//! - `null` / absent           -> Unspecified (fall through to the default)

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::error::{PollError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Toggle {
    Enabled,
    Disabled,
    #[default]
    Unspecified,
}

impl Toggle {
    pub fn is_enabled(self) -> bool {
        matches!(self, Toggle::Enabled)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawToggle {
    Bool(bool),
    Int(i64),
}

impl<'de> Deserialize<'de> for Toggle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<RawToggle>::deserialize(deserializer).map_err(|_| {
            serde::de::Error::custom("expected a boolean, an integer or null")
        })?;
        Ok(match raw {
            None => Toggle::Unspecified,
            Some(RawToggle::Bool(true)) => Toggle::Enabled,
            Some(RawToggle::Bool(false)) | Some(RawToggle::Int(0)) => Toggle::Disabled,
            Some(RawToggle::Int(_)) => Toggle::Enabled,
        })
    }
}

impl Serialize for Toggle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Toggle::Enabled => serializer.serialize_bool(true),
            Toggle::Disabled => serializer.serialize_bool(false),
            Toggle::Unspecified => serializer.serialize_none(),
        }
    }
}

/// Global default enablement, keyed by module name.
pub type ModuleDefaults = BTreeMap<String, Toggle>;

#[derive(Debug, Clone, Deserialize)]
pub struct GraphOverview {
    pub graph: String,
    pub text: Option<String>,
}

/// OS definition document. Only `poller_modules` feeds the pipeline; the rest
/// is parsed so type errors in a definition are caught up front.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OsDefinition {
    pub os: Option<String>,
    pub text: Option<String>,
    #[serde(rename = "type")]
    pub device_type: Option<String>,
    pub group: Option<String>,
    pub icon: Option<String>,
    #[serde(default)]
    pub mib_dir: Vec<String>,
    #[serde(default)]
    pub over: Vec<GraphOverview>,
    #[serde(default)]
    pub discovery: Vec<serde_yaml::Value>,
    #[serde(default)]
    pub good_if: Vec<String>,
    #[serde(default, rename = "bad_ifXEntry")]
    pub bad_if_x_entry: Vec<String>,
    #[serde(default)]
    pub ifname: Toggle,
    #[serde(default)]
    pub nobulk: Toggle,
    #[serde(default)]
    pub poller_modules: BTreeMap<String, Toggle>,
    #[serde(default)]
    pub discovery_modules: BTreeMap<String, Toggle>,
    #[serde(default)]
    pub register_mibs: BTreeMap<String, serde_yaml::Value>,
}

/// Resolved module overrides for one OS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub os: String,
    overrides: BTreeMap<String, Toggle>,
}

impl CapabilitySet {
    pub fn new(os: impl Into<String>, overrides: BTreeMap<String, Toggle>) -> Self {
        Self { os: os.into(), overrides }
    }

    /// Empty set: every module follows the global default.
    pub fn defaults_only(os: impl Into<String>) -> Self {
        Self::new(os, BTreeMap::new())
    }

    pub fn get(&self, module: &str) -> Toggle {
        self.overrides.get(module).copied().unwrap_or_default()
    }

    pub fn overrides(&self) -> &BTreeMap<String, Toggle> {
        &self.overrides
    }
}

/// Override if specified, else the global default; neither means disabled.
pub fn is_module_enabled(defaults: &ModuleDefaults, overrides: &CapabilitySet, module: &str) -> bool {
    match overrides.get(module) {
        Toggle::Enabled => true,
        Toggle::Disabled => false,
        Toggle::Unspecified => defaults.get(module).copied().unwrap_or_default().is_enabled(),
    }
}

/// Source of raw definition documents.
pub trait DefinitionStore: Send + Sync {
    /// Returns the document for `os_id`, or `DefinitionNotFound`.
    fn fetch(&self, os_id: &str) -> Result<String>;
}

/// Reads `<dir>/<os>.yaml`.
#[derive(Debug, Clone)]
pub struct FileDefinitionStore {
    dir: PathBuf,
}

impl FileDefinitionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DefinitionStore for FileDefinitionStore {
    fn fetch(&self, os_id: &str) -> Result<String> {
        let path = self.dir.join(format!("{os_id}.yaml"));
        std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PollError::DefinitionNotFound(os_id.to_string()),
            _ => PollError::DefinitionInvalid {
                os: os_id.to_string(),
                reason: format!("cannot read {}: {e}", path.display()),
            },
        })
    }
}

/// In-memory definitions, keyed by OS id.
#[derive(Debug, Clone, Default)]
pub struct MemoryDefinitionStore {
    documents: HashMap<String, String>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, os_id: impl Into<String>, document: impl Into<String>) -> Self {
        self.documents.insert(os_id.into(), document.into());
        self
    }
}

impl DefinitionStore for MemoryDefinitionStore {
    fn fetch(&self, os_id: &str) -> Result<String> {
        self.documents
            .get(os_id)
            .cloned()
            .ok_or_else(|| PollError::DefinitionNotFound(os_id.to_string()))
    }
}

/// Resolves and caches capability sets. Safe to share across tasks.
pub struct CapabilityResolver {
    store: Box<dyn DefinitionStore>,
    cache: RwLock<HashMap<String, Arc<CapabilitySet>>>,
}

impl CapabilityResolver {
    pub fn new(store: impl DefinitionStore + 'static) -> Self {
        Self {
            store: Box::new(store),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, os_id: &str) -> Result<Arc<CapabilitySet>> {
        if let Some(set) = self.cache.read().get(os_id) {
            return Ok(set.clone());
        }
        if !is_valid_os_id(os_id) {
            return Err(PollError::DefinitionNotFound(os_id.to_string()));
        }

        let document = self.store.fetch(os_id)?;
        let definition: OsDefinition =
            serde_yaml::from_str(&document).map_err(|e| PollError::DefinitionInvalid {
                os: os_id.to_string(),
                reason: e.to_string(),
            })?;

        if let Some(declared) = definition.os.as_deref() {
            if declared != os_id {
                return Err(PollError::DefinitionInvalid {
                    os: os_id.to_string(),
                    reason: format!("document declares os '{declared}'"),
                });
            }
        }

        debug!(os = os_id, overrides = definition.poller_modules.len(), "loaded capability definition");
        let set = Arc::new(CapabilitySet::new(os_id, definition.poller_modules));
        self.cache.write().insert(os_id.to_string(), set.clone());
        Ok(set)
    }

    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }
}

fn is_valid_os_id(os_id: &str) -> bool {
    !os_id.is_empty()
        && !os_id.starts_with('.')
        && os_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
