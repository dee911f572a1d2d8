use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Lifecycle state of a supervised task.
///
/// Transitions are monotonic: `Starting -> Running -> Stopping -> {Stopped | Error}`.
/// `Stopping` is skipped when the task ends on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Registered, runner not yet scheduled.
    Starting,
    /// Runner loop is active.
    Running,
    /// Cancellation was signalled; waiting for the unit of work to return.
    Stopping,
    /// Finished cleanly: success or cancellation.
    Stopped,
    /// Retries exhausted.
    Error,
}

impl TaskStatus {
    /// Returns `true` if no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Stopped | TaskStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Starting => "STARTING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Stopping => "STOPPING",
            TaskStatus::Stopped => "STOPPED",
            TaskStatus::Error => "ERROR",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TaskStatus::Starting => 0,
            TaskStatus::Running => 1,
            TaskStatus::Stopping => 2,
            TaskStatus::Stopped | TaskStatus::Error => 3,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle ordering.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTING" => Ok(TaskStatus::Starting),
            "RUNNING" => Ok(TaskStatus::Running),
            "STOPPING" => Ok(TaskStatus::Stopping),
            "STOPPED" => Ok(TaskStatus::Stopped),
            "ERROR" => Ok(TaskStatus::Error),
            other => Err(ModelError::unknown("task status", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Stopped.is_terminal());
        assert!(TaskStatus::Error.is_terminal());

        assert!(!TaskStatus::Starting.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Stopping.is_terminal());
    }

    #[test]
    fn transitions_are_monotonic() {
        assert!(TaskStatus::Starting.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Stopping));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Error));
        assert!(TaskStatus::Stopping.can_transition_to(TaskStatus::Stopped));

        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Starting));
        assert!(!TaskStatus::Stopped.can_transition_to(TaskStatus::Error));
        assert!(!TaskStatus::Error.can_transition_to(TaskStatus::Stopped));
    }

    #[test]
    fn wire_spelling() {
        let json = serde_json::to_string(&TaskStatus::Stopping).unwrap();
        assert_eq!(json, r#""STOPPING""#);

        let back: TaskStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TaskStatus::Stopping);
        assert_eq!("ERROR".parse::<TaskStatus>(), Ok(TaskStatus::Error));
        assert!("error".parse::<TaskStatus>().is_err());
    }
}
