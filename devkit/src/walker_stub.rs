/*!
Scripted protocol walker for tests without devices.

Each target IP gets a `WalkScript`: the pairs its agent "returns", plus the
ways it can misbehave (refuse the session, stall, die mid-walk). Every open
and walk is recorded for assertions.
*/

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use pollmesh_core::{PollError, ProtocolParams, ProtocolWalker, Result, VarBind, WalkSession};

#[derive(Debug, Clone, Default)]
pub struct WalkScript {
    pub pairs: Vec<VarBind>,
    /// Fail the walk after this many pairs.
    pub fail_after: Option<usize>,
    /// Refuse the session with this reason.
    pub open_error: Option<String>,
    pub open_delay: Duration,
    /// Pause before each pair; lets concurrent walks interleave.
    pub pair_delay: Duration,
}

impl WalkScript {
    pub fn new(pairs: Vec<VarBind>) -> Self {
        Self { pairs, ..Self::default() }
    }

    pub fn failing_after(mut self, pairs: usize) -> Self {
        self.fail_after = Some(pairs);
        self
    }

    pub fn refusing(reason: impl Into<String>) -> Self {
        Self {
            open_error: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn with_pair_delay(mut self, delay: Duration) -> Self {
        self.pair_delay = delay;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkRecord {
    pub target: String,
    pub base: String,
}

/// `ProtocolWalker` answering from scripts keyed by target IP (or hostname
/// for devices without a usable address). Cheap to clone; clones share
/// scripts and recordings.
#[derive(Clone, Default)]
pub struct ScriptedWalker {
    scripts: Arc<Mutex<HashMap<String, WalkScript>>>,
    opened: Arc<Mutex<Vec<String>>>,
    walks: Arc<Mutex<Vec<WalkRecord>>>,
}

impl ScriptedWalker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, target: impl Into<String>, script: WalkScript) -> Self {
        self.set_script(target, script);
        self
    }

    pub fn set_script(&self, target: impl Into<String>, script: WalkScript) {
        self.scripts.lock().insert(target.into(), script);
    }

    /// Targets a session was requested for, in order.
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn walks(&self) -> Vec<WalkRecord> {
        self.walks.lock().clone()
    }
}

#[async_trait]
impl ProtocolWalker for ScriptedWalker {
    async fn open(&self, target: &ProtocolParams, _timeout: Duration) -> Result<Box<dyn WalkSession>> {
        self.opened.lock().push(target.ip.clone());
        let script = self.scripts.lock().get(&target.ip).cloned();
        let Some(script) = script else {
            return Err(PollError::Session {
                target: target.ip.clone(),
                reason: "no route to host".into(),
            });
        };

        if !script.open_delay.is_zero() {
            tokio::time::sleep(script.open_delay).await;
        }
        if let Some(reason) = script.open_error.clone() {
            return Err(PollError::Session { target: target.ip.clone(), reason });
        }

        debug!(target_ip = %target.ip, pairs = script.pairs.len(), "scripted session opened");
        Ok(Box::new(ScriptedSession {
            target: target.ip.clone(),
            script,
            walks: self.walks.clone(),
        }))
    }
}

struct ScriptedSession {
    target: String,
    script: WalkScript,
    walks: Arc<Mutex<Vec<WalkRecord>>>,
}

impl WalkSession for ScriptedSession {
    fn bulk_walk<'a>(&'a mut self, base: &'a str) -> BoxStream<'a, Result<VarBind>> {
        self.walks.lock().push(WalkRecord {
            target: self.target.clone(),
            base: base.to_string(),
        });

        let prefix = format!("{base}.");
        let in_subtree: Vec<VarBind> = self
            .script
            .pairs
            .iter()
            .filter(|pair| pair.oid.starts_with(&prefix))
            .cloned()
            .collect();

        let failure = self.script.fail_after.map(|after| PollError::Walk {
            target: self.target.clone(),
            base: base.to_string(),
            reason: format!("agent stopped responding after {after} pairs"),
        });
        let limit = self.script.fail_after.unwrap_or(usize::MAX);
        let items = in_subtree
            .into_iter()
            .take(limit)
            .map(Ok)
            .chain(failure.map(Err));

        let delay = self.script.pair_delay;
        stream::iter(items)
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::{PollmeshMessageBuilder, IF_HC_IN_OCTETS, IF_NAME};
    use pollmesh_core::SnmpValue;

    const PORTS_BASE: &str = ".1.3.6.1.2.1.31.1.1.1";

    fn target(ip: &str) -> ProtocolParams {
        PollmeshMessageBuilder::job("sw", ip, "ports").snmp
    }

    fn pairs() -> Vec<VarBind> {
        vec![
            PollmeshMessageBuilder::if_x(IF_NAME, 1, SnmpValue::OctetString(b"lo".to_vec())),
            PollmeshMessageBuilder::if_x(IF_NAME, 2, SnmpValue::OctetString(b"eth0".to_vec())),
            PollmeshMessageBuilder::if_x(IF_HC_IN_OCTETS, 2, SnmpValue::Counter64(7)),
            VarBind::new(".1.3.6.1.2.1.2.2.1.2.1", SnmpValue::OctetString(b"outside".to_vec())),
        ]
    }

    async fn collect(walker: &ScriptedWalker, ip: &str) -> Vec<Result<VarBind>> {
        let mut session = walker.open(&target(ip), Duration::from_secs(1)).await.unwrap();
        let items = session.bulk_walk(PORTS_BASE).collect().await;
        items
    }

    #[tokio::test]
    async fn test_walk_stays_in_subtree() {
        let walker = ScriptedWalker::new().with_script("10.0.0.1", WalkScript::new(pairs()));
        let items = collect(&walker, "10.0.0.1").await;
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(|item| item.is_ok()));
        assert_eq!(walker.opened(), vec!["10.0.0.1".to_string()]);
        assert_eq!(walker.walks()[0].base, PORTS_BASE);
    }

    #[tokio::test]
    async fn test_fail_after() {
        let walker = ScriptedWalker::new().with_script("10.0.0.1", WalkScript::new(pairs()).failing_after(2));
        let items = collect(&walker, "10.0.0.1").await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok() && items[1].is_ok());
        assert!(matches!(items[2], Err(PollError::Walk { .. })));
    }

    #[tokio::test]
    async fn test_unknown_and_refusing_targets() {
        let walker = ScriptedWalker::new().with_script("10.0.0.2", WalkScript::refusing("auth failure"));
        let unknown = walker.open(&target("10.0.0.1"), Duration::from_secs(1)).await;
        assert!(matches!(unknown.err(), Some(PollError::Session { .. })));
        let refused = walker.open(&target("10.0.0.2"), Duration::from_secs(1)).await;
        assert!(matches!(refused.err(), Some(PollError::Session { reason, .. }) if reason == "auth failure"));
        assert_eq!(walker.opened().len(), 2);
    }
}
