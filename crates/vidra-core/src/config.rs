use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use vidra_model::{TaskExit, TaskId};

use crate::{CoreError, WorkError};

const DEFAULT_MAX_TASKS: usize = 100;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_HISTORY_LIMIT: usize = 1024;

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Supervisor-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorConfig {
    /// Hard ceiling on live tasks.
    pub max_tasks: usize,
    /// How long `stop`/`stop_all`/`shutdown` wait for tasks to exit.
    #[serde(rename = "shutdownTimeoutMs", with = "vidra_model::serde_ms")]
    pub shutdown_timeout: Duration,
    /// How many finished task ids and failures are remembered.
    pub history_limit: usize,
}

impl SupervisorConfig {
    pub fn with_max_tasks(mut self, max_tasks: usize) -> Self {
        self.max_tasks = max_tasks;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), CoreError> {
        if self.max_tasks == 0 {
            return Err(CoreError::InvalidConfig("maxTasks must be at least 1".into()));
        }
        // Finished ids are what make a repeated stop a no-op.
        if self.history_limit == 0 {
            return Err(CoreError::InvalidConfig("historyLimit must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            max_tasks: DEFAULT_MAX_TASKS,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Called after every failed attempt.
pub type ErrorHook = Arc<dyn Fn(&TaskId, &WorkError) + Send + Sync>;
/// Probed by [`crate::Supervisor::health_check`] while the task is live.
pub type HealthHook = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;
/// Called exactly once when the task reaches a terminal status.
pub type ExitHook = Box<dyn FnOnce(TaskExit) + Send + Sync>;

/// Per-task settings passed to [`crate::Supervisor::start`].
pub struct TaskConfig {
    pub name: String,
    /// Caller scope; cancelling it stops the task like `stop` would.
    pub parent: Option<CancellationToken>,
    /// Failed attempts tolerated before the task ends in `ERROR`.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub on_error: Option<ErrorHook>,
    pub health: Option<HealthHook>,
    pub on_exit: Option<ExitHook>,
}

impl TaskConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            on_error: None,
            health: None,
            on_exit: None,
        }
    }

    pub fn with_parent(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&TaskId, &WorkError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn with_health<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        self.health = Some(Arc::new(f));
        self
    }

    pub fn on_exit<F>(mut self, f: F) -> Self
    where
        F: FnOnce(TaskExit) + Send + Sync + 'static,
    {
        self.on_exit = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for TaskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskConfig")
            .field("name", &self.name)
            .field("has_parent", &self.parent.is_some())
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("has_on_error", &self.on_error.is_some())
            .field("has_health", &self.health.is_some())
            .field("has_on_exit", &self.on_exit.is_some())
            .finish()
    }
}
