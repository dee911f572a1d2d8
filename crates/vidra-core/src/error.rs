use std::fmt;

use thiserror::Error;
use vidra_model::{TaskId, TaskStatus};

/// Errors returned by [`crate::Supervisor`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("capacity exceeded: {max} tasks already live")]
    CapacityExceeded { max: usize },

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("timed out after {waited_ms}ms; {stragglers} task(s) still running")]
    Timeout { waited_ms: u64, stragglers: usize },

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error("start canceled while waiting for capacity")]
    Canceled,

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Failure of a single attempt of a unit of work.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkError {
    /// Recoverable failure; the attempt may be retried.
    #[error("{reason}")]
    Fail { reason: String },

    /// The unit of work panicked; caught at the supervisor boundary.
    #[error("panicked: {reason}")]
    Panicked { reason: String },

    /// The unit of work observed cancellation and gave up.
    #[error("canceled")]
    Canceled,
}

impl WorkError {
    pub fn fail(reason: impl fmt::Display) -> Self {
        WorkError::Fail {
            reason: reason.to_string(),
        }
    }

    pub fn panicked(reason: impl Into<String>) -> Self {
        WorkError::Panicked {
            reason: reason.into(),
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, WorkError::Panicked { .. })
    }
}

/// One entry of a failed health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthIssue {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub reason: String,
}

/// Informational health failure: tasks in `ERROR` plus live tasks whose health probe failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub issues: Vec<HealthIssue>,
}

impl HealthReport {
    /// Ids of the tasks that ended in `ERROR`.
    pub fn failed_ids(&self) -> Vec<&TaskId> {
        self.issues
            .iter()
            .filter(|i| i.status == TaskStatus::Error)
            .map(|i| &i.id)
            .collect()
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} unhealthy task(s)", self.issues.len())?;
        for (i, issue) in self.issues.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{} ({}) {}: {}", issue.id, issue.name, issue.status, issue.reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for HealthReport {}
