use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::{TaskId, TaskStatus, time_serde};

/// Point-in-time view of one live task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    /// Unique task identifier.
    pub id: TaskId,
    /// Caller-supplied label (not unique).
    pub name: String,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Number of attempts started so far.
    pub attempts: u32,
    /// When the task was registered.
    #[serde(with = "time_serde")]
    pub started_at: SystemTime,
    /// Milliseconds since registration.
    pub uptime_ms: u64,
    /// Last error reported by the unit of work, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Aggregate view of the supervisor registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    /// Tasks currently registered (any non-removed state).
    pub total: usize,
    /// Tasks in `RUNNING` state.
    pub active: usize,
    /// Configured concurrency ceiling.
    pub max: usize,
    /// Capacity slots still free.
    pub available: usize,
    pub tasks: Vec<TaskInfo>,
}

/// A task that ended in `ERROR`, kept for health reporting after removal from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTask {
    pub id: TaskId,
    pub name: String,
    pub error: String,
    #[serde(with = "time_serde")]
    pub failed_at: SystemTime,
}

/// Final outcome handed to a task's exit callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    pub id: TaskId,
    pub name: String,
    /// Always terminal: `Stopped` or `Error`.
    pub status: TaskStatus,
    pub attempts: u32,
    /// `true` when the last attempt returned successfully.
    pub succeeded: bool,
    pub last_error: Option<String>,
}
