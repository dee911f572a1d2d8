use std::time::{Instant, SystemTime};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use vidra_model::{TaskId, TaskInfo, TaskStatus};

use crate::HealthHook;

/// Registry entry for one supervised task.
///
/// Owned by the registry; callers only ever see [`TaskInfo`] copies.
pub(crate) struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub started_at: SystemTime,
    pub started: Instant,
    pub status: TaskStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Fires the task's own cancellation scope.
    pub cancel: CancellationToken,
    /// Flips to `true` once the runner has exited.
    pub done: watch::Receiver<bool>,
    pub health: Option<HealthHook>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        name: String,
        cancel: CancellationToken,
        done: watch::Receiver<bool>,
        health: Option<HealthHook>,
    ) -> Self {
        Self {
            id,
            name,
            started_at: SystemTime::now(),
            started: Instant::now(),
            status: TaskStatus::Starting,
            attempts: 0,
            last_error: None,
            cancel,
            done,
            health,
        }
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            attempts: self.attempts,
            started_at: self.started_at,
            uptime_ms: self.started.elapsed().as_millis() as u64,
            last_error: self.last_error.clone(),
        }
    }

    /// Apply `next` if it moves the lifecycle forward.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}
