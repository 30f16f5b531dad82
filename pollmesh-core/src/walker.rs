//! Boundary with the protocol walker.
//!
//! The pipeline never speaks SNMP itself: a `ProtocolWalker` opens a session
//! for a job's target and the session streams typed (OID, value) pairs for a
//! subtree. Dropping the session releases whatever it holds (sockets, child
//! processes), on success and failure alike.

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::Result;
use crate::models::ProtocolParams;

/// Typed value as reported by the remote agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    OctetString(Vec<u8>),
    Integer(i64),
    Counter32(u32),
    Counter64(u64),
    Gauge32(u32),
    TimeTicks(u32),
    IpAddress(Ipv4Addr),
    ObjectIdentifier(String),
    /// Anything the walker could not type more precisely, kept verbatim.
    Opaque(String),
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: String,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: impl Into<String>, value: SnmpValue) -> Self {
        Self { oid: oid.into(), value }
    }
}

#[async_trait]
pub trait ProtocolWalker: Send + Sync {
    /// Opens a session to `target`. Must give up after `timeout`.
    async fn open(&self, target: &ProtocolParams, timeout: Duration) -> Result<Box<dyn WalkSession>>;
}

pub trait WalkSession: Send {
    /// Streams every pair under `base`. An `Err` item ends the walk.
    fn bulk_walk<'a>(&'a mut self, base: &'a str) -> BoxStream<'a, Result<VarBind>>;
}
