use std::time::Duration;

/// Errors raised anywhere along the dispatch/aggregation pipeline.
///
/// Per-job variants (`Session`, `Walk`, `Publish`, `UnsupportedModule`) are
/// handled inside the worker and never cross into another job. `BusUnavailable`
/// ends the owning process.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("no capability definition for os '{0}'")]
    DefinitionNotFound(String),
    #[error("invalid capability definition for os '{os}': {reason}")]
    DefinitionInvalid { os: String, reason: String },
    #[error("inventory row {row}: {reason}")]
    Inventory { row: usize, reason: String },
    #[error("session to {target} failed: {reason}")]
    Session { target: String, reason: String },
    #[error("session to {target} not opened within {timeout:?}")]
    SessionTimeout { target: String, timeout: Duration },
    #[error("walk of {base} on {target} failed: {reason}")]
    Walk { target: String, base: String, reason: String },
    #[error("module '{0}' has no walk table")]
    UnsupportedModule(String),
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("bus unavailable: {0}")]
    BusUnavailable(String),
    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PollError {
    /// Errors confined to a single job; the worker pool keeps running.
    pub fn is_per_job(&self) -> bool {
        matches!(
            self,
            PollError::Session { .. }
                | PollError::SessionTimeout { .. }
                | PollError::Walk { .. }
                | PollError::UnsupportedModule(_)
                | PollError::Publish { .. }
        )
    }
}

pub type Result<T, E = PollError> = std::result::Result<T, E>;
