use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a container runtime adapter.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{command} exited with code {exit_code:?}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Container id cannot be empty")]
    EmptyContainerId,

    #[error("Can't spawn container runtime: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Container engine error: {0}")]
    Engine(String),

    #[error("Can't parse container runtime output: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Workload {0} not found")]
    WorkloadNotFound(Uuid),

    #[error("No container deployed for workload {0}")]
    ContainerNotFound(Uuid),

    #[error("Container image is required for deployment")]
    ImageRequired,

    #[error("{0}")]
    Invalid(String),

    #[error("Another operation is in progress for workload {0}")]
    Busy(Uuid),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("Workload store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// A best-effort operation that was attempted and did not succeed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoftFailure {
    pub target: String,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub enum CleanupOutcome {
    Removed,
    Failed(SoftFailure),
}

impl CleanupOutcome {
    pub fn failed(target: &str, reason: impl ToString) -> Self {
        CleanupOutcome::Failed(SoftFailure {
            target: target.to_string(),
            reason: reason.to_string(),
        })
    }
}
