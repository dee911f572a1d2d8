mod runner;

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use vidra_model::{
    FailedTask, SupervisorStatus, TaskId, TaskInfo, TaskPage, TaskQuery, TaskStatus,
};

use crate::{
    CoreError, HealthIssue, HealthReport, SupervisorConfig, TaskConfig, WorkRef,
    record::TaskRecord, state::Registry,
};
use runner::{Runner, panic_message};

/// State shared by the supervisor handle and every runner.
pub(crate) struct Shared {
    cfg: SupervisorConfig,
    registry: Registry,
    /// One permit per live task; FIFO, so queued starts are served in order.
    permits: Arc<Semaphore>,
    /// Supervisor-wide cancellation scope; every task token is a child.
    root: CancellationToken,
    closed: AtomicBool,
    seq: AtomicU64,
}

/// Runs tasks under a concurrency ceiling with retries, panic isolation and bounded shutdown.
///
/// Cloning is cheap; all clones drive the same registry.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn new(cfg: SupervisorConfig) -> Result<Self, CoreError> {
        cfg.validate()?;
        info!(
            max_tasks = cfg.max_tasks,
            shutdown_timeout_ms = cfg.shutdown_timeout.as_millis() as u64,
            "supervisor is ready"
        );

        let shared = Shared {
            registry: Registry::new(cfg.history_limit),
            permits: Arc::new(Semaphore::new(cfg.max_tasks)),
            root: CancellationToken::new(),
            closed: AtomicBool::new(false),
            seq: AtomicU64::new(0),
            cfg,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.cfg
    }

    /// Free capacity slots right now.
    pub fn available(&self) -> usize {
        self.shared.permits.available_permits()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Register and launch a task without waiting.
    ///
    /// Fails with [`CoreError::CapacityExceeded`] when every slot is taken.
    /// Must be called from within a tokio runtime.
    pub fn start(&self, config: TaskConfig, work: WorkRef) -> Result<TaskId, CoreError> {
        self.ensure_open()?;
        let permit = match Arc::clone(&self.shared.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => {
                debug!(task = %config.name, "start rejected at capacity");
                return Err(CoreError::CapacityExceeded {
                    max: self.shared.cfg.max_tasks,
                });
            }
            Err(TryAcquireError::Closed) => return Err(CoreError::ShuttingDown),
        };
        Ok(self.launch(config, work, permit))
    }

    /// Like [`Supervisor::start`], but waits for a free slot instead of failing.
    ///
    /// Waiters are served in call order. Gives up with [`CoreError::ShuttingDown`]
    /// on shutdown and [`CoreError::Canceled`] if the task's parent scope fires first.
    pub async fn start_queued(
        &self,
        config: TaskConfig,
        work: WorkRef,
    ) -> Result<TaskId, CoreError> {
        self.ensure_open()?;
        let parent = config.parent.clone().unwrap_or_default();
        let permits = Arc::clone(&self.shared.permits);

        let permit = tokio::select! {
            biased;
            _ = self.shared.root.cancelled() => return Err(CoreError::ShuttingDown),
            _ = parent.cancelled() => return Err(CoreError::Canceled),
            permit = permits.acquire_owned() => permit.map_err(|_| CoreError::ShuttingDown)?,
        };
        Ok(self.launch(config, work, permit))
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.is_shutting_down() {
            return Err(CoreError::ShuttingDown);
        }
        Ok(())
    }

    fn launch(&self, config: TaskConfig, work: WorkRef, permit: OwnedSemaphorePermit) -> TaskId {
        let id = self.next_id(&config.name);
        let token = self.shared.root.child_token();
        let (done_tx, done_rx) = watch::channel(false);

        self.shared.registry.insert(TaskRecord::new(
            id.clone(),
            config.name.clone(),
            token.clone(),
            done_rx,
            config.health.clone(),
        ));

        if let Some(parent) = &config.parent {
            link_parent(parent.clone(), token.clone());
        }

        info!(
            task = %id,
            name = %config.name,
            max_retries = config.max_retries,
            "task started"
        );

        let runner = Runner {
            shared: Arc::clone(&self.shared),
            id: id.clone(),
            config,
            work,
            token,
            done: done_tx,
            permit,
        };
        tokio::spawn(runner.run());
        id
    }

    fn next_id(&self, name: &str) -> TaskId {
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        TaskId::from(format!("{name}-{millis}-{seq}"))
    }

    /// Signal cancellation to one task without waiting for it.
    ///
    /// Ids of recently finished tasks are accepted silently.
    pub fn cancel(&self, id: &TaskId) -> Result<(), CoreError> {
        self.signal(id).map(|_| ())
    }

    fn signal(&self, id: &TaskId) -> Result<Option<watch::Receiver<bool>>, CoreError> {
        match self.shared.registry.mark_stopping(id) {
            Some((token, done)) => {
                token.cancel();
                Ok(Some(done))
            }
            None if self.shared.registry.was_finished(id) => Ok(None),
            None => Err(CoreError::NotFound(id.clone())),
        }
    }

    /// Cancel one task and wait for it to exit, up to the shutdown timeout.
    ///
    /// On [`CoreError::Timeout`] the task keeps running in the background.
    #[instrument(level = "debug", skip(self), fields(task = %id))]
    pub async fn stop(&self, id: &TaskId) -> Result<(), CoreError> {
        let Some(mut done) = self.signal(id)? else {
            debug!("task already finished");
            return Ok(());
        };

        let timeout = self.shared.cfg.shutdown_timeout;
        let stopped = tokio::time::timeout(timeout, done.wait_for(|finished| *finished))
            .await
            .is_ok();
        if stopped {
            return Ok(());
        }
        warn!(timeout_ms = timeout.as_millis() as u64, "task did not stop in time");
        Err(CoreError::Timeout {
            waited_ms: timeout.as_millis() as u64,
            stragglers: 1,
        })
    }

    /// Cancel every live task and wait until none is left, up to the shutdown timeout.
    #[instrument(level = "debug", skip(self))]
    pub async fn stop_all(&self) -> Result<(), CoreError> {
        let signalled = self.shared.registry.cancel_all();
        info!(tasks = signalled, "stopping all tasks");
        self.wait_idle().await
    }

    /// Close admission, cancel the root scope and wait for every task to exit.
    ///
    /// Subsequent starts fail with [`CoreError::ShuttingDown`].
    #[instrument(level = "debug", skip(self))]
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            debug!("shutdown already requested");
        } else {
            info!("shutdown requested");
        }
        self.shared.permits.close();
        self.shared.registry.cancel_all();
        self.shared.root.cancel();
        self.wait_idle().await
    }

    async fn wait_idle(&self) -> Result<(), CoreError> {
        let mut live = self.shared.registry.subscribe();
        let timeout = self.shared.cfg.shutdown_timeout;

        let idle = tokio::time::timeout(timeout, live.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if idle {
            info!("all tasks stopped within grace period");
            return Ok(());
        }
        let stragglers = self.shared.registry.len();
        warn!(stragglers, "grace exceeded; some tasks did not stop in time");
        Err(CoreError::Timeout {
            waited_ms: timeout.as_millis() as u64,
            stragglers,
        })
    }

    /// Consistent snapshot of the registry.
    pub fn get_status(&self) -> SupervisorStatus {
        let tasks = self.shared.registry.list_all();
        SupervisorStatus {
            total: tasks.len(),
            active: tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Running)
                .count(),
            max: self.shared.cfg.max_tasks,
            available: self.available(),
            tasks,
        }
    }

    pub fn get_task(&self, id: &TaskId) -> Option<TaskInfo> {
        self.shared.registry.get(id)
    }

    pub fn query(&self, q: &TaskQuery) -> TaskPage<TaskInfo> {
        self.shared.registry.query(q)
    }

    /// Tasks that ended in `ERROR`, oldest first.
    pub fn failures(&self) -> Vec<FailedTask> {
        self.shared.registry.failures()
    }

    /// Forget recorded failures, returning them.
    pub fn clear_failures(&self) -> Vec<FailedTask> {
        self.shared.registry.clear_failures()
    }

    /// Report failed tasks and live tasks whose health probe fails.
    ///
    /// Informational only: nothing is stopped or restarted.
    pub fn health_check(&self) -> Result<(), HealthReport> {
        let mut issues: Vec<HealthIssue> = self
            .shared
            .registry
            .failures()
            .into_iter()
            .map(|f| HealthIssue {
                id: f.id,
                name: f.name,
                status: TaskStatus::Error,
                reason: f.error,
            })
            .collect();

        for (id, name, status, probe) in self.shared.registry.health_probes() {
            let verdict = panic::catch_unwind(AssertUnwindSafe(|| probe()))
                .unwrap_or_else(|payload| Err(format!("health probe panicked: {}", panic_message(payload.as_ref()))));
            if let Err(reason) = verdict {
                issues.push(HealthIssue {
                    id,
                    name,
                    status,
                    reason,
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(HealthReport { issues })
        }
    }
}

/// Propagate cancellation of a caller scope into a task token.
///
/// The link ends as soon as either side fires; the runner cancels its own token on exit.
fn link_parent(parent: CancellationToken, child: CancellationToken) {
    if parent.is_cancelled() {
        child.cancel();
        return;
    }
    tokio::spawn(async move {
        tokio::select! {
            _ = parent.cancelled() => child.cancel(),
            _ = child.cancelled() => {}
        }
    });
}

#[cfg(test)]
mod tests;
