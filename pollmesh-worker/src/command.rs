//! `ProtocolWalker` backed by the net-snmp command line tools.
//!
//! Each bulk walk is one `snmpbulkwalk` child process. The child is killed if
//! the walk outlives its deadline or the session is dropped early.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

use pollmesh_core::config::WalkConf;
use pollmesh_core::{PollError, ProtocolParams, ProtocolWalker, Result, VarBind, WalkSession};

use crate::output::parse_walk_output;

pub struct CommandWalker {
    command: String,
    max_duration: Duration,
}

impl CommandWalker {
    pub fn new(conf: &WalkConf) -> Self {
        Self {
            command: conf.command.clone(),
            max_duration: conf.max_duration(),
        }
    }
}

/// Maps the inventory's version strings to net-snmp's `-v` argument.
/// Bulk requests do not exist in v1.
fn bulk_version(version: &str) -> Option<&'static str> {
    match version.trim().to_ascii_lowercase().as_str() {
        "2c" | "v2c" | "2" => Some("2c"),
        _ => None,
    }
}

/// stderr lines net-snmp prints when no agent answered at all.
const NO_SESSION: &[&str] = &["Timeout: No Response from", "Unknown host", "No route to host"];

fn is_no_session(reason: &str) -> bool {
    NO_SESSION.iter().any(|marker| reason.contains(marker))
}

/// net-snmp agent spec: `udp:10.0.0.1:161`, `udp6:[fe80::1]:161`.
fn agent_spec(target: &ProtocolParams) -> String {
    let transport = if target.transport.is_empty() { "udp" } else { target.transport.as_str() };
    if target.ip.contains(':') {
        format!("{transport}:[{}]:{}", target.ip, target.port)
    } else {
        format!("{transport}:{}:{}", target.ip, target.port)
    }
}

#[async_trait]
impl ProtocolWalker for CommandWalker {
    async fn open(&self, target: &ProtocolParams, timeout: Duration) -> Result<Box<dyn WalkSession>> {
        let version = bulk_version(&target.version).ok_or_else(|| PollError::Session {
            target: target.ip.clone(),
            reason: format!("SNMP version '{}' cannot bulk walk", target.version),
        })?;

        let version_check = AsyncCommand::new(&self.command)
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        // A slow `-V` still proves the tool is installed.
        if let Ok(Err(e)) = tokio::time::timeout(timeout, version_check).await {
            return Err(PollError::Session {
                target: target.ip.clone(),
                reason: format!("cannot run {}: {e}", self.command),
            });
        }

        Ok(Box::new(CommandSession {
            command: self.command.clone(),
            version,
            target: target.clone(),
            request_timeout: timeout,
            max_duration: self.max_duration,
        }))
    }
}

struct CommandSession {
    command: String,
    version: &'static str,
    target: ProtocolParams,
    request_timeout: Duration,
    max_duration: Duration,
}

impl CommandSession {
    fn args(&self, base: &str) -> Vec<String> {
        vec![
            format!("-v{}", self.version),
            "-c".into(),
            self.target.community.clone(),
            "-On".into(),
            "-Oe".into(),
            "-t".into(),
            self.request_timeout.as_secs().max(1).to_string(),
            "-r".into(),
            "1".into(),
            agent_spec(&self.target),
            base.to_string(),
        ]
    }

    fn walk_error(&self, base: &str, reason: String) -> PollError {
        PollError::Walk {
            target: self.target.ip.clone(),
            base: base.to_string(),
            reason,
        }
    }

    /// Runs the walk to completion. Pairs printed before a failure are
    /// returned alongside it; the caller still sees the error last.
    async fn run(&self, base: &str) -> (Vec<VarBind>, Option<PollError>) {
        debug!(agent = %self.target.ip, base, "spawning {}", self.command);
        let child = AsyncCommand::new(&self.command)
            .args(self.args(base))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => return (Vec::new(), Some(self.walk_error(base, format!("spawn failed: {e}")))),
        };

        let output = match tokio::time::timeout(self.max_duration, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return (Vec::new(), Some(self.walk_error(base, e.to_string()))),
            Err(_) => {
                let reason = format!("walk exceeded {:?}", self.max_duration);
                return (Vec::new(), Some(self.walk_error(base, reason)));
            }
        };

        let pairs = parse_walk_output(&String::from_utf8_lossy(&output.stdout));
        if output.status.success() {
            return (pairs, None);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = match stderr.trim() {
            "" => format!("exited with {}", output.status),
            msg => msg.lines().next().unwrap_or(msg).to_string(),
        };
        // Nothing came back, so there never was a session.
        if pairs.is_empty() && is_no_session(&reason) {
            warn!(agent = %self.target.ip, base, "agent unreachable: {reason}");
            let target = self.target.ip.clone();
            return (pairs, Some(PollError::Session { target, reason }));
        }
        warn!(agent = %self.target.ip, base, pairs = pairs.len(), "walk failed: {reason}");
        (pairs, Some(self.walk_error(base, reason)))
    }
}

impl WalkSession for CommandSession {
    fn bulk_walk<'a>(&'a mut self, base: &'a str) -> BoxStream<'a, Result<VarBind>> {
        stream::once(self.run(base))
            .flat_map(|(pairs, failure)| {
                stream::iter(pairs.into_iter().map(Ok).chain(failure.map(Err)))
            })
            .boxed()
    }
}
