/*!
# pollmesh-core

Job dispatch and telemetry aggregation for distributed SNMP polling.

- `capabilities`: per-OS module overrides (tri-state) and the enablement rule
- `producer`: inventory pass -> lazy sequence of `PollJob`
- `oids` / `aggregate`: static OID tables and the per-job record fold
- `worker`: one job -> one walk -> one `StatisticMessage`, plus the task pool
- `bus`: publish/subscribe boundary (MQTT and in-memory)
*/

pub mod address;
pub mod aggregate;
pub mod bus;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod models;
pub mod oids;
pub mod producer;
pub mod walker;
pub mod worker;

pub use address::DeviceAddress;
pub use aggregate::Aggregation;
pub use bus::{MemoryBus, MessageBus, MqttBus};
pub use capabilities::{is_module_enabled, CapabilityResolver, CapabilitySet, ModuleDefaults, Toggle};
pub use config::{load_config, PollmeshConfig};
pub use error::{PollError, Result};
pub use models::{Device, InventoryRow, PollJob, ProtocolParams, Stat, StatKind, StatRecord, StatisticMessage};
pub use producer::{produce, DefinitionFallback, JobProducer, PassSummary};
pub use walker::{ProtocolWalker, SnmpValue, VarBind, WalkSession};
pub use worker::{PollWorker, WorkerStats};
